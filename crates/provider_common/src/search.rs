//! File name search over a directory tree
//!
//! The first level is listed completely before any subdirectory is entered,
//! so shallow matches arrive first. Unreadable entries are logged and
//! skipped; only cancellation aborts a search.

use crate::attributes::{BasicFileAttributes, FileKey, PosixFileAttributes};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::path::ByteStringListPath;
use std::collections::HashSet;
use std::time::{Duration, Instant};

struct Search<'a, F: FnMut(Vec<ByteStringListPath>)> {
    directory: &'a ByteStringListPath,
    query: String,
    interval: Duration,
    listener: F,
    cancel: Option<&'a CancellationToken>,
    matches: Vec<ByteStringListPath>,
    last_flush: Instant,
    visited: HashSet<FileKey>,
}

impl<'a, F: FnMut(Vec<ByteStringListPath>)> Search<'a, F> {
    fn check_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(token) => token.check("search cancelled"),
            None => Ok(()),
        }
    }

    fn visit(&mut self, path: &ByteStringListPath) -> Result<()> {
        if path != self.directory {
            let matched = path
                .file_name_bytes()
                .map_or(false, |name| name.to_string_lossy().to_lowercase().contains(&self.query));
            if matched {
                self.matches.push(path.clone());
            }
            if !self.matches.is_empty() && self.last_flush.elapsed() >= self.interval {
                (self.listener)(std::mem::take(&mut self.matches));
                self.last_flush = Instant::now();
            }
        }
        self.check_cancelled()
    }

    /// Follow links, falling back to the link itself when it dangles
    fn read_attributes(path: &ByteStringListPath) -> Result<PosixFileAttributes> {
        path.read_attributes(true).or_else(|_| path.read_attributes(false))
    }

    fn enter(&mut self, attributes: &PosixFileAttributes) -> bool {
        match attributes.file_key() {
            Some(key) => self.visited.insert(key),
            None => true,
        }
    }

    fn list(&self, directory: &ByteStringListPath) -> Result<Option<Vec<ByteStringListPath>>> {
        match directory.list() {
            Ok(children) => Ok(Some(children)),
            Err(e) if e.is_interrupted() => Err(e),
            Err(e) => {
                tracing::warn!("Cannot list {} while searching: {}", directory, e);
                Ok(None)
            }
        }
    }

    fn run(&mut self) -> Result<()> {
        let start = self.directory;
        let attributes = match Self::read_attributes(start) {
            Ok(attributes) => attributes,
            Err(e) => {
                tracing::warn!("Cannot search {}: {}", start, e);
                return self.visit(start);
            }
        };
        if !attributes.is_directory() {
            return self.visit(start);
        }
        self.enter(&attributes);
        let Some(children) = self.list(start)? else {
            return Ok(());
        };
        self.visit(start)?;
        let mut directories = Vec::new();
        for child in children {
            match Self::read_attributes(&child) {
                Ok(attributes) => {
                    self.visit(&child)?;
                    if attributes.is_directory() {
                        directories.push((child, attributes));
                    }
                }
                Err(e) => {
                    tracing::warn!("Cannot read {} while searching: {}", child, e);
                    self.visit(&child)?;
                }
            }
        }
        for (directory, attributes) in directories {
            self.walk(&directory, &attributes)?;
        }
        Ok(())
    }

    /// Depth-first below an already visited directory
    fn walk(&mut self, directory: &ByteStringListPath, attributes: &PosixFileAttributes) -> Result<()> {
        if !self.enter(attributes) {
            tracing::debug!("Skipping {}, already searched through a link", directory);
            return Ok(());
        }
        let Some(children) = self.list(directory)? else {
            return Ok(());
        };
        for child in children {
            match Self::read_attributes(&child) {
                Ok(attributes) => {
                    self.visit(&child)?;
                    if attributes.is_directory() {
                        self.walk(&child, &attributes)?;
                    }
                }
                Err(e) => {
                    tracing::warn!("Cannot read {} while searching: {}", child, e);
                    self.visit(&child)?;
                }
            }
        }
        Ok(())
    }
}

/// Find entries below `directory` whose name contains `query`, ignoring case
///
/// Matches are handed to `listener` in batches, at most once per `interval`
/// and once more at the end.
pub fn search(
    directory: &ByteStringListPath,
    query: &str,
    interval: Duration,
    listener: impl FnMut(Vec<ByteStringListPath>),
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let mut search = Search {
        directory,
        query: query.to_lowercase(),
        interval,
        listener,
        cancel,
        matches: Vec::new(),
        last_flush: Instant::now(),
        visited: HashSet::new(),
    };
    let result = search.run();
    if result.is_ok() && !search.matches.is_empty() {
        (search.listener)(std::mem::take(&mut search.matches));
    }
    result
}

impl ByteStringListPath {
    pub fn search(
        &self,
        query: &str,
        interval: Duration,
        listener: impl FnMut(Vec<ByteStringListPath>),
    ) -> Result<()> {
        search(self, query, interval, listener, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_string::ByteString;
    use crate::error::ProviderError;
    use crate::file_system::FileSystem;
    use crate::memory::MemoryFileSystem;
    use crate::path::FileSystemPaths;
    use std::sync::Arc;

    fn tree() -> Arc<dyn FileSystem> {
        let fs: Arc<dyn FileSystem> = MemoryFileSystem::new();
        for directory in ["/root/deep/deeper", "/root/other"] {
            fs.path(directory).unwrap().create_directories().unwrap();
        }
        for file in [
            "/root/deep/deeper/Report-final.txt",
            "/root/report.md",
            "/root/other/notes.txt",
            "/root/deep/REPORT.csv",
        ] {
            fs.path(file).unwrap().write_all_bytes(b"").unwrap();
        }
        fs
    }

    fn collect(fs: &Arc<dyn FileSystem>, query: &str) -> Vec<String> {
        let mut found = Vec::new();
        search(
            &fs.path("/root").unwrap(),
            query,
            Duration::from_secs(3600),
            |batch| found.extend(batch.iter().map(|path| path.to_string())),
            None,
        )
        .unwrap();
        found
    }

    #[test]
    fn test_first_level_before_descending() {
        let fs = tree();
        assert_eq!(
            collect(&fs, "report"),
            vec![
                "/root/report.md",
                "/root/deep/REPORT.csv",
                "/root/deep/deeper/Report-final.txt",
            ]
        );
    }

    #[test]
    fn test_searched_directory_excluded() {
        let fs = tree();
        assert!(collect(&fs, "root").is_empty());
        assert_eq!(collect(&fs, "deep"), vec!["/root/deep", "/root/deep/deeper"]);
    }

    #[test]
    fn test_link_cycle_visited_once() {
        let fs = tree();
        fs.path("/root/deep/loop")
            .unwrap()
            .create_symbolic_link(&ByteString::from("/root/deep"))
            .unwrap();
        assert_eq!(collect(&fs, "loop"), vec!["/root/deep/loop"]);
    }

    #[test]
    fn test_batches_flush_with_zero_interval() {
        let fs = tree();
        let mut batches = 0;
        fs.path("/root")
            .unwrap()
            .search("txt", Duration::ZERO, |batch| {
                assert_eq!(batch.len(), 1);
                batches += 1;
            })
            .unwrap();
        assert_eq!(batches, 2);
    }

    #[test]
    fn test_cancelled() {
        let fs = tree();
        let token = CancellationToken::new();
        token.cancel();
        let result = search(&fs.path("/root").unwrap(), "x", Duration::ZERO, |_| {}, Some(&token));
        assert!(matches!(result, Err(ProviderError::Interrupted(_))));
    }
}

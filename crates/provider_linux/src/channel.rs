//! Positional file I/O for byte channels

use crate::error::map_io;
use provider_common::channel::ChannelBackend;
use provider_common::{CancellationToken, Result};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::FileExt;

/// Chunk size between cancellation checks of a long read
const READ_CHUNK: usize = 64 * 1024;

pub struct FileBackend {
    file: File,
    name: String,
}

impl FileBackend {
    pub fn new(file: File, name: String) -> Self {
        Self { file, name }
    }
}

impl ChannelBackend for FileBackend {
    fn read_at(&self, position: u64, size: usize, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            cancel.check(&self.name)?;
            let end = size.min(filled + READ_CHUNK);
            match self.file.read_at(&mut bytes[filled..end], position + filled as u64) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(e, &self.name)),
            }
        }
        bytes.truncate(filled);
        Ok(bytes)
    }

    fn write_at(&self, position: u64, src: &[u8]) -> Result<()> {
        self.file
            .write_all_at(src, position)
            .map_err(|e| map_io(e, &self.name))
    }

    /// The file is opened with `O_APPEND`, so the kernel picks the offset
    fn append(&self, src: &[u8]) -> Result<()> {
        (&self.file).write_all(src).map_err(|e| map_io(e, &self.name))
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.file.set_len(size).map_err(|e| map_io(e, &self.name))
    }

    fn size(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|metadata| metadata.len())
            .map_err(|e| map_io(e, &self.name))
    }

    fn force(&self, metadata: bool) -> Result<()> {
        let synced = if metadata {
            self.file.sync_all()
        } else {
            self.file.sync_data()
        };
        synced.map_err(|e| map_io(e, &self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn backend(dir: &tempfile::TempDir, append: bool) -> FileBackend {
        let path = dir.path().join("data");
        let file = OpenOptions::new()
            .read(!append)
            .write(!append)
            .append(append)
            .create(true)
            .open(&path)
            .unwrap();
        FileBackend::new(file, path.display().to_string())
    }

    #[test]
    fn test_read_spans_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir, false);
        let data: Vec<u8> = (0..READ_CHUNK * 2 + 10).map(|i| (i % 199) as u8).collect();
        backend.write_at(0, &data).unwrap();
        let token = CancellationToken::new();
        assert_eq!(backend.read_at(0, data.len() + 100, &token).unwrap(), data);
        assert_eq!(backend.read_at(5, 3, &token).unwrap(), &data[5..8]);
        assert!(backend.read_at(data.len() as u64, 10, &token).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir, false);
        backend.write_at(0, b"abc").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(backend.read_at(0, 3, &token).unwrap_err().is_interrupted());
    }

    #[test]
    fn test_append_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir, true);
        backend.append(b"one").unwrap();
        backend.append(b"two").unwrap();
        assert_eq!(backend.size().unwrap(), 6);
        backend.truncate(2).unwrap();
        assert_eq!(backend.size().unwrap(), 2);
        assert_eq!(std::fs::read(dir.path().join("data")).unwrap(), b"on");
    }
}

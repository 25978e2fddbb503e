//! ByteStringListPath - hierarchical byte-oriented paths
//!
//! A path is a list of [`ByteString`] segments plus an absolute flag, bound to
//! the [`FileSystem`] that created it:
//! - Parsing collapses redundant separators and rejects nul bytes
//! - The empty path is relative with a single empty segment
//! - Derived paths are new values; nothing is mutated in place

use crate::byte_string::{ByteString, ByteStringBuilder};
use crate::error::{ProviderError, Result};
use crate::file_system::FileSystem;
use crate::uri;
use once_cell::sync::OnceCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const DOT: &[u8] = b".";
const DOT_DOT: &[u8] = b"..";

#[derive(Clone)]
pub struct ByteStringListPath {
    inner: Arc<PathInner>,
}

struct PathInner {
    file_system: Arc<dyn FileSystem>,
    absolute: bool,
    segments: Vec<ByteString>,
    /// Canonical byte form, computed on first use
    bytes: OnceCell<ByteString>,
}

impl ByteStringListPath {
    /// Parse raw path bytes using the file system's separator
    pub fn parse(file_system: &Arc<dyn FileSystem>, raw: &[u8]) -> Result<Self> {
        if raw.contains(&0) {
            return Err(ProviderError::invalid_path(raw, "contains nul byte"));
        }
        let separator = file_system.separator();
        let absolute = raw.first() == Some(&separator);
        let mut segments: Vec<ByteString> = raw
            .split(|b| *b == separator)
            .filter(|segment| !segment.is_empty())
            .map(ByteString::from_bytes)
            .collect();
        if !absolute && segments.is_empty() {
            segments.push(ByteString::empty());
        }
        Ok(Self::new_unchecked(file_system.clone(), absolute, segments))
    }

    /// Build from pre-split segments, validating each one
    pub fn from_segments(
        file_system: &Arc<dyn FileSystem>,
        absolute: bool,
        segments: Vec<ByteString>,
    ) -> Result<Self> {
        let separator = file_system.separator();
        for segment in &segments {
            if segment.contains_byte(0) {
                return Err(ProviderError::invalid_path(segment.as_bytes(), "contains nul byte"));
            }
            if segment.contains_byte(separator) {
                return Err(ProviderError::invalid_path(
                    segment.as_bytes(),
                    "segment contains separator",
                ));
            }
        }
        let is_empty_path = segments.len() == 1 && segments[0].is_empty();
        if !is_empty_path && segments.iter().any(ByteString::is_empty) {
            return Err(ProviderError::invalid_path(b"", "empty segment"));
        }
        if absolute && is_empty_path {
            return Ok(Self::new_unchecked(file_system.clone(), true, Vec::new()));
        }
        let mut segments = segments;
        if !absolute && segments.is_empty() {
            segments.push(ByteString::empty());
        }
        Ok(Self::new_unchecked(file_system.clone(), absolute, segments))
    }

    /// The empty relative path of a file system
    pub fn empty(file_system: &Arc<dyn FileSystem>) -> Self {
        Self::new_unchecked(file_system.clone(), false, vec![ByteString::empty()])
    }

    /// The root path of a file system
    pub fn root_of(file_system: &Arc<dyn FileSystem>) -> Self {
        Self::new_unchecked(file_system.clone(), true, Vec::new())
    }

    fn new_unchecked(
        file_system: Arc<dyn FileSystem>,
        absolute: bool,
        segments: Vec<ByteString>,
    ) -> Self {
        Self {
            inner: Arc::new(PathInner {
                file_system,
                absolute,
                segments,
                bytes: OnceCell::new(),
            }),
        }
    }

    fn derive(&self, absolute: bool, segments: Vec<ByteString>) -> Self {
        if !absolute && segments.is_empty() {
            return Self::empty(&self.inner.file_system);
        }
        Self::new_unchecked(self.inner.file_system.clone(), absolute, segments)
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.inner.file_system
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.absolute
    }

    pub fn is_empty(&self) -> bool {
        !self.inner.absolute && self.inner.segments.len() == 1 && self.inner.segments[0].is_empty()
    }

    pub fn segments(&self) -> &[ByteString] {
        &self.inner.segments
    }

    pub fn names(&self) -> impl Iterator<Item = &ByteString> {
        self.inner.segments.iter()
    }

    pub fn name_count(&self) -> usize {
        self.inner.segments.len()
    }

    pub fn get_name(&self, index: usize) -> Result<Self> {
        let segment = self.inner.segments.get(index).ok_or_else(|| {
            ProviderError::InvalidArgument(format!("Name index {} out of range", index))
        })?;
        Ok(self.derive(false, vec![segment.clone()]))
    }

    pub fn root(&self) -> Option<Self> {
        if self.inner.absolute {
            Some(Self::root_of(&self.inner.file_system))
        } else {
            None
        }
    }

    pub fn file_name(&self) -> Option<Self> {
        self.inner
            .segments
            .last()
            .map(|segment| self.derive(false, vec![segment.clone()]))
    }

    pub fn file_name_bytes(&self) -> Option<ByteString> {
        self.inner.segments.last().cloned()
    }

    pub fn parent(&self) -> Option<Self> {
        match self.inner.segments.len() {
            0 => None,
            1 => self.root(),
            len => Some(self.derive(self.inner.absolute, self.inner.segments[..len - 1].to_vec())),
        }
    }

    /// Relative path of the names in `[begin, end)`
    pub fn subpath(&self, begin: usize, end: usize) -> Result<Self> {
        if begin >= end || end > self.name_count() {
            return Err(ProviderError::InvalidArgument(format!(
                "Invalid subpath range {}..{} for {} names",
                begin,
                end,
                self.name_count()
            )));
        }
        Ok(self.derive(false, self.inner.segments[begin..end].to_vec()))
    }

    /// Segment-wise prefix test; always false across file systems
    pub fn starts_with(&self, other: &Self) -> bool {
        if !self.same_file_system(other) || self.inner.absolute != other.inner.absolute {
            return false;
        }
        self.inner.segments.starts_with(&other.inner.segments)
    }

    /// Segment-wise suffix test; an absolute `other` must match entirely
    pub fn ends_with(&self, other: &Self) -> bool {
        if !self.same_file_system(other) {
            return false;
        }
        if other.inner.absolute {
            return self == other;
        }
        self.inner.segments.ends_with(&other.inner.segments)
    }

    /// Remove `.` segments and fold `..` into the preceding name
    ///
    /// Leading `..` survives in relative paths and is dropped at the root.
    pub fn normalize(&self) -> Self {
        let mut normalized: Vec<ByteString> = Vec::with_capacity(self.inner.segments.len());
        for segment in &self.inner.segments {
            if segment == DOT {
                continue;
            }
            if segment == DOT_DOT {
                match normalized.last() {
                    None => {
                        if !self.inner.absolute {
                            normalized.push(segment.clone());
                        }
                    }
                    Some(last) if last == DOT_DOT => normalized.push(segment.clone()),
                    Some(_) => {
                        normalized.pop();
                    }
                }
                continue;
            }
            normalized.push(segment.clone());
        }
        if normalized.len() == 1 && normalized[0].is_empty() && self.is_empty() {
            return self.clone();
        }
        self.derive(self.inner.absolute, normalized)
    }

    pub fn resolve(&self, other: &Self) -> Result<Self> {
        self.check_same_file_system(other)?;
        if other.inner.absolute {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }
        let mut segments = self.inner.segments.clone();
        segments.extend(other.inner.segments.iter().cloned());
        Ok(self.derive(self.inner.absolute, segments))
    }

    pub fn resolve_bytes(&self, other: &[u8]) -> Result<Self> {
        let other = Self::parse(&self.inner.file_system, other)?;
        self.resolve(&other)
    }

    pub fn resolve_str(&self, other: &str) -> Result<Self> {
        self.resolve_bytes(other.as_bytes())
    }

    /// Append a single name without re-parsing it
    pub fn resolve_name(&self, name: &ByteString) -> Result<Self> {
        let other = Self::from_segments(&self.inner.file_system, false, vec![name.clone()])?;
        self.resolve(&other)
    }

    pub fn resolve_sibling(&self, other: &Self) -> Result<Self> {
        self.check_same_file_system(other)?;
        match self.parent() {
            Some(parent) => parent.resolve(other),
            None => Ok(other.clone()),
        }
    }

    /// Relative path from `self` to `other`; both must share absoluteness
    pub fn relativize(&self, other: &Self) -> Result<Self> {
        self.check_same_file_system(other)?;
        if self.inner.absolute != other.inner.absolute {
            return Err(ProviderError::InvalidArgument(format!(
                "Cannot relativize {} against {} of different type",
                other, self
            )));
        }
        if self.is_empty() {
            return Ok(other.clone());
        }
        if self == other {
            return Ok(Self::empty(&self.inner.file_system));
        }
        let own = &self.inner.segments;
        let others: &[ByteString] = if other.is_empty() {
            &[]
        } else {
            &other.inner.segments
        };
        let common = own
            .iter()
            .zip(others.iter())
            .take_while(|(left, right)| left == right)
            .count();
        let mut segments = vec![ByteString::from_bytes(DOT_DOT); own.len() - common];
        segments.extend(others[common..].iter().cloned());
        Ok(self.derive(false, segments))
    }

    /// Resolve against the file system's default directory
    pub fn to_absolute_path(&self) -> Result<Self> {
        if self.inner.absolute {
            return Ok(self.clone());
        }
        let default_directory = self.inner.file_system.default_directory();
        let directory = Self::parse(&self.inner.file_system, default_directory.as_bytes())?;
        if !directory.is_absolute() {
            return Err(ProviderError::InvalidPath {
                input: default_directory.to_string_lossy(),
                reason: "default directory is not absolute".into(),
            });
        }
        directory.resolve(self)
    }

    /// Canonical byte form: segments joined by the separator, with a leading
    /// separator for absolute paths
    pub fn to_byte_string(&self) -> ByteString {
        self.inner
            .bytes
            .get_or_init(|| {
                let separator = self.inner.file_system.separator();
                let mut builder = ByteStringBuilder::new();
                if self.inner.absolute {
                    builder.append_byte(separator);
                }
                for (index, segment) in self.inner.segments.iter().enumerate() {
                    if index > 0 {
                        builder.append_byte(separator);
                    }
                    builder.append(segment);
                }
                builder.into_byte_string()
            })
            .clone()
    }

    /// `scheme://authority/percent-encoded/absolute/path`
    pub fn to_uri(&self) -> Result<String> {
        let absolute = self.to_absolute_path()?;
        let file_system = &self.inner.file_system;
        let mut path = ByteStringBuilder::new();
        if absolute.inner.segments.is_empty() {
            path.append_byte(b'/');
        }
        for segment in &absolute.inner.segments {
            path.append_byte(b'/');
            path.append(segment);
        }
        Ok(format!(
            "{}://{}{}",
            file_system.scheme(),
            file_system.uri_authority().encode(),
            uri::encode_path(path.into_byte_string().as_bytes())
        ))
    }

    /// Inverse of [`to_uri`](Self::to_uri); query and fragment are ignored
    pub fn from_uri(file_system: &Arc<dyn FileSystem>, value: &str) -> Result<Self> {
        let rest = value
            .strip_prefix(file_system.scheme())
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| {
                ProviderError::ProviderMismatch(format!(
                    "URI {} does not have scheme {}",
                    value,
                    file_system.scheme()
                ))
            })?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let encoded_path = match rest.strip_prefix("//") {
            Some(authority_and_path) => match authority_and_path.find('/') {
                Some(index) => &authority_and_path[index..],
                None => "/",
            },
            None => rest,
        };
        let path = uri::decode(encoded_path)?;
        if !path.starts_with(b"/") {
            return Err(ProviderError::InvalidArgument(format!(
                "URI path is not absolute: {}",
                value
            )));
        }
        let segments = path
            .split(b"/")
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .collect();
        Self::from_segments(file_system, true, segments)
    }

    /// Order by canonical bytes; paths of different providers cannot be compared
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering> {
        if self.inner.file_system.scheme() != other.inner.file_system.scheme() {
            return Err(ProviderError::ProviderMismatch(format!(
                "Cannot compare {} path with {} path",
                self.inner.file_system.scheme(),
                other.inner.file_system.scheme()
            )));
        }
        Ok(self.to_byte_string().cmp(&other.to_byte_string()))
    }

    pub fn same_file_system(&self, other: &Self) -> bool {
        self.inner.file_system.id() == other.inner.file_system.id()
    }

    fn check_same_file_system(&self, other: &Self) -> Result<()> {
        if self.same_file_system(other) {
            Ok(())
        } else {
            Err(ProviderError::ProviderMismatch(format!(
                "{} belongs to another file system than {}",
                other, self
            )))
        }
    }
}

/// Resolve `other` from a different file system against `base`, one name at a time
pub fn resolve_foreign(base: &ByteStringListPath, other: &ByteStringListPath) -> Result<ByteStringListPath> {
    if base.same_file_system(other) {
        return base.resolve(other);
    }
    let mut resolved = if other.is_absolute() {
        base.root().ok_or_else(|| {
            ProviderError::InvalidArgument(format!(
                "Cannot resolve absolute {} against relative {}",
                other, base
            ))
        })?
    } else {
        base.clone()
    };
    if other.is_empty() {
        return Ok(resolved);
    }
    for name in other.names() {
        resolved = resolved.resolve_name(name)?;
    }
    Ok(resolved)
}

impl PartialEq for ByteStringListPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.same_file_system(other)
                && self.inner.absolute == other.inner.absolute
                && self.inner.segments == other.inner.segments)
    }
}

impl Eq for ByteStringListPath {}

impl Hash for ByteStringListPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.file_system.id().hash(state);
        self.inner.absolute.hash(state);
        self.inner.segments.hash(state);
    }
}

impl fmt::Display for ByteStringListPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_byte_string(), f)
    }
}

impl fmt::Debug for ByteStringListPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ByteStringListPath({}:{:?})",
            self.inner.file_system.scheme(),
            self.to_byte_string()
        )
    }
}

/// Path construction helpers on a file system handle
pub trait FileSystemPaths {
    fn path(&self, raw: &str) -> Result<ByteStringListPath>;
    fn path_bytes(&self, raw: &[u8]) -> Result<ByteStringListPath>;
    fn root_path(&self) -> ByteStringListPath;
    fn path_from_uri(&self, uri: &str) -> Result<ByteStringListPath>;
}

impl FileSystemPaths for Arc<dyn FileSystem> {
    fn path(&self, raw: &str) -> Result<ByteStringListPath> {
        ByteStringListPath::parse(self, raw.as_bytes())
    }

    fn path_bytes(&self, raw: &[u8]) -> Result<ByteStringListPath> {
        ByteStringListPath::parse(self, raw)
    }

    fn root_path(&self) -> ByteStringListPath {
        ByteStringListPath::root_of(self)
    }

    fn path_from_uri(&self, uri: &str) -> Result<ByteStringListPath> {
        ByteStringListPath::from_uri(self, uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFileSystem;

    fn fs() -> Arc<dyn FileSystem> {
        MemoryFileSystem::new()
    }

    fn p(fs: &Arc<dyn FileSystem>, raw: &str) -> ByteStringListPath {
        fs.path(raw).unwrap()
    }

    #[test]
    fn test_parse_collapses_separators() {
        let fs = fs();
        let path = p(&fs, "//a///b/");
        assert!(path.is_absolute());
        assert_eq!(path.name_count(), 2);
        assert_eq!(path.to_byte_string(), ByteString::from("/a/b"));
        assert!(p(&fs, "").is_empty());
        assert_eq!(p(&fs, "/").name_count(), 0);
    }

    #[test]
    fn test_parse_rejects_nul() {
        let fs = fs();
        let error = fs.path_bytes(b"/a\0b").unwrap_err();
        assert!(matches!(error, ProviderError::InvalidPath { .. }));
    }

    #[test]
    fn test_canonical_round_trip() {
        let fs = fs();
        for raw in ["/", "/a", "/a/b/c", "a", "a/b", "../x", ""] {
            assert_eq!(p(&fs, raw).to_byte_string(), ByteString::from(raw));
        }
        let raw = [b'/', 0xff, b'/', 0xfe];
        assert_eq!(fs.path_bytes(&raw).unwrap().to_byte_string().as_bytes(), &raw);
    }

    #[test]
    fn test_parent_and_file_name() {
        let fs = fs();
        assert_eq!(p(&fs, "/a/b").parent(), Some(p(&fs, "/a")));
        assert_eq!(p(&fs, "/a").parent(), Some(p(&fs, "/")));
        assert_eq!(p(&fs, "/").parent(), None);
        assert_eq!(p(&fs, "a").parent(), None);
        assert_eq!(p(&fs, "/a/b").file_name(), Some(p(&fs, "b")));
        assert_eq!(p(&fs, "/").file_name(), None);
    }

    #[test]
    fn test_resolve() {
        let fs = fs();
        let base = p(&fs, "/a");
        assert_eq!(base.resolve(&p(&fs, "b/c")).unwrap(), p(&fs, "/a/b/c"));
        assert_eq!(base.resolve(&p(&fs, "/x")).unwrap(), p(&fs, "/x"));
        assert_eq!(base.resolve(&p(&fs, "")).unwrap(), base);
        assert_eq!(p(&fs, "").resolve(&p(&fs, "x")).unwrap(), p(&fs, "x"));
        assert_eq!(base.resolve_sibling(&p(&fs, "z")).unwrap(), p(&fs, "/z"));
    }

    #[test]
    fn test_resolve_other_file_system_is_mismatch() {
        let (first, second) = (fs(), fs());
        let error = p(&first, "/a").resolve(&p(&second, "b")).unwrap_err();
        assert!(matches!(error, ProviderError::ProviderMismatch(_)));
        assert!(!p(&first, "/a/b").starts_with(&p(&second, "/a")));
    }

    #[test]
    fn test_normalize() {
        let fs = fs();
        assert_eq!(p(&fs, "/a/./b/../c").normalize(), p(&fs, "/a/c"));
        assert_eq!(p(&fs, "/../a").normalize(), p(&fs, "/a"));
        assert_eq!(p(&fs, "../a/../..").normalize(), p(&fs, "../.."));
        assert_eq!(p(&fs, "a/..").normalize(), p(&fs, ""));
        assert_eq!(p(&fs, "./.").normalize(), p(&fs, ""));
        for raw in ["/a/./b/../c", "../a/../..", "a/b/../../..", "/..", "", "."] {
            let once = p(&fs, raw).normalize();
            assert_eq!(once.normalize(), once, "normalize not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_relativize() {
        let fs = fs();
        let a = p(&fs, "/a/b");
        assert!(a.relativize(&a).unwrap().is_empty());
        assert_eq!(a.relativize(&p(&fs, "/a/c/d")).unwrap(), p(&fs, "../c/d"));
        assert_eq!(a.relativize(&p(&fs, "/a/b/c")).unwrap(), p(&fs, "c"));
        assert_eq!(a.relativize(&p(&fs, "/")).unwrap(), p(&fs, "../.."));
        assert!(a.relativize(&p(&fs, "x")).is_err());
        assert_eq!(p(&fs, "").relativize(&p(&fs, "x/y")).unwrap(), p(&fs, "x/y"));
    }

    #[test]
    fn test_resolve_relativize_identity() {
        let fs = fs();
        let descendants = [("/a/b", "/a/b/c/d"), ("/", "/y/z"), ("a/b", "a/b/c"), ("", "x/y"), ("/a", "/a")];
        for (a, b) in descendants {
            let (a, b) = (p(&fs, a), p(&fs, b));
            let relative = a.relativize(&b).unwrap();
            assert_eq!(a.resolve(&relative).unwrap(), b, "{} -> {}", a, b);
        }

        // resolve is lexical, so `..` segments survive until normalized
        let divergent = [("/a/b", "/a/c/d"), ("/a/b/c", "/a"), ("/x", "/y/z"), ("a", "b")];
        for (a, b) in divergent {
            let (a, b) = (p(&fs, a), p(&fs, b));
            let resolved = a.resolve(&a.relativize(&b).unwrap()).unwrap();
            assert_ne!(resolved, b);
            assert_eq!(resolved.normalize(), b, "{} -> {}", a, b);
        }
    }

    #[test]
    fn test_starts_and_ends_with() {
        let fs = fs();
        let path = p(&fs, "/a/bc/d");
        assert!(path.starts_with(&p(&fs, "/a/bc")));
        assert!(!path.starts_with(&p(&fs, "/a/b")));
        assert!(!path.starts_with(&p(&fs, "a")));
        assert!(path.ends_with(&p(&fs, "bc/d")));
        assert!(!path.ends_with(&p(&fs, "c/d")));
        assert!(path.ends_with(&p(&fs, "/a/bc/d")));
    }

    #[test]
    fn test_subpath_and_names() {
        let fs = fs();
        let path = p(&fs, "/a/b/c");
        assert_eq!(path.subpath(1, 3).unwrap(), p(&fs, "b/c"));
        assert!(path.subpath(2, 2).is_err());
        assert_eq!(path.get_name(0).unwrap(), p(&fs, "a"));
        assert!(path.get_name(3).is_err());
    }

    #[test]
    fn test_uri_round_trip() {
        let fs = fs();
        let path = fs.path_bytes(b"/dir/a b/\xe4?").unwrap();
        let uri = path.to_uri().unwrap();
        assert_eq!(uri, "memory:///dir/a%20b/%E4%3F");
        assert_eq!(fs.path_from_uri(&uri).unwrap(), path);
        assert_eq!(fs.path_from_uri("memory:///x?query#frag").unwrap(), p(&fs, "/x"));
        assert!(fs.path_from_uri("file:///x").is_err());
    }

    #[test]
    fn test_relative_uri_uses_default_directory() {
        let fs = fs();
        assert_eq!(p(&fs, "x").to_uri().unwrap(), "memory:///x");
    }

    #[test]
    fn test_try_cmp() {
        let fs = fs();
        assert_eq!(p(&fs, "/a").try_cmp(&p(&fs, "/b")).unwrap(), Ordering::Less);
        let other = self::fs();
        assert_eq!(p(&fs, "/a").try_cmp(&p(&other, "/a")).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_resolve_foreign() {
        let (first, second) = (fs(), fs());
        let resolved = resolve_foreign(&p(&first, "/base"), &p(&second, "x/y")).unwrap();
        assert_eq!(resolved, p(&first, "/base/x/y"));
        let resolved = resolve_foreign(&p(&first, "/base"), &p(&second, "/abs")).unwrap();
        assert_eq!(resolved, p(&first, "/abs"));
    }
}

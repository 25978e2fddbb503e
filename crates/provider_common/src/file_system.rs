//! The storage backend contract and path-level convenience operations
//!
//! A backend implements [`FileSystem`]; optional capabilities default to
//! [`ProviderError::Unsupported`] so callers always get a typed answer.

use crate::attributes::{BasicFileAttributes, ContentProviderFileAttributes, FileTimes, PosixFileAttributes, PosixGroup, PosixUser};
use crate::byte_string::ByteString;
use crate::channel::{ChannelReader, ChannelWriter, SeekableByteChannel};
use crate::error::{ProviderError, Result};
use crate::mode::{PosixFileMode, PosixFileModeBit};
use crate::options::{AccessModes, CopyOptions, OpenOption, OpenOptions};
use crate::path::ByteStringListPath;
use crate::uri::UriAuthority;
use crate::watch::WatchService;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FILE_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token of a file system instance
///
/// Cross-provider operations compare tokens to decide between native and
/// foreign copy/move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileSystemId(u64);

impl FileSystemId {
    pub fn next() -> Self {
        Self(NEXT_FILE_SYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fs#{}", self.0)
    }
}

pub trait FileSystem: Send + Sync {
    // ===== Identity =====

    fn id(&self) -> FileSystemId;

    /// URI scheme, also used to decide whether two paths are comparable
    fn scheme(&self) -> &str;

    fn separator(&self) -> u8 {
        b'/'
    }

    fn uri_authority(&self) -> UriAuthority {
        UriAuthority::EMPTY
    }

    /// Directory relative paths are resolved against
    fn default_directory(&self) -> ByteString {
        ByteString::from("/")
    }

    fn is_read_only(&self) -> bool {
        false
    }

    // ===== Attributes =====

    fn read_attributes(&self, path: &ByteStringListPath, follow_links: bool) -> Result<PosixFileAttributes>;

    fn read_content_provider_attributes(
        &self,
        path: &ByteStringListPath,
    ) -> Result<ContentProviderFileAttributes> {
        Err(ProviderError::Unsupported(format!(
            "{} has no content provider attributes",
            path
        )))
    }

    fn set_times(&self, path: &ByteStringListPath, _times: &FileTimes, _follow_links: bool) -> Result<()> {
        Err(ProviderError::Unsupported(format!("set_times on {}", path)))
    }

    fn set_mode(&self, path: &ByteStringListPath, _mode: PosixFileMode, _follow_links: bool) -> Result<()> {
        Err(ProviderError::Unsupported(format!("set_mode on {}", path)))
    }

    fn set_owner(&self, path: &ByteStringListPath, _owner: &PosixUser, _follow_links: bool) -> Result<()> {
        Err(ProviderError::Unsupported(format!("set_owner on {}", path)))
    }

    fn set_group(&self, path: &ByteStringListPath, _group: &PosixGroup, _follow_links: bool) -> Result<()> {
        Err(ProviderError::Unsupported(format!("set_group on {}", path)))
    }

    fn set_selinux_context(
        &self,
        path: &ByteStringListPath,
        _context: &ByteString,
        _follow_links: bool,
    ) -> Result<()> {
        Err(ProviderError::Unsupported(format!("set_selinux_context on {}", path)))
    }

    /// Check existence and, where the backend knows a mode, permissions
    fn check_access(&self, path: &ByteStringListPath, modes: AccessModes) -> Result<()> {
        let attributes = self.read_attributes(path, true)?;
        if modes.write && self.is_read_only() {
            return Err(ProviderError::ReadOnlyFileSystem);
        }
        let Some(mode) = attributes.mode else {
            return Ok(());
        };
        let denied = (modes.read && !mode.contains(PosixFileModeBit::OwnerRead))
            || (modes.write && !mode.contains(PosixFileModeBit::OwnerWrite))
            || (modes.execute && !mode.contains(PosixFileModeBit::OwnerExecute));
        if denied {
            return Err(ProviderError::AccessDenied(path.to_string()));
        }
        Ok(())
    }

    // ===== Content and tree =====

    fn list_directory(&self, path: &ByteStringListPath) -> Result<Vec<ByteStringListPath>>;

    fn new_byte_channel(
        &self,
        path: &ByteStringListPath,
        options: &OpenOptions,
        mode: Option<PosixFileMode>,
    ) -> Result<Box<dyn SeekableByteChannel>>;

    fn create_directory(&self, path: &ByteStringListPath, mode: Option<PosixFileMode>) -> Result<()>;

    fn create_symbolic_link(&self, link: &ByteStringListPath, _target: &ByteString) -> Result<()> {
        Err(ProviderError::Unsupported(format!("create_symbolic_link at {}", link)))
    }

    fn read_symbolic_link(&self, link: &ByteStringListPath) -> Result<ByteString> {
        Err(ProviderError::Unsupported(format!("read_symbolic_link at {}", link)))
    }

    fn delete(&self, path: &ByteStringListPath) -> Result<()>;

    /// Copy within this file system; both paths belong to it
    fn copy_native(&self, source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()>;

    /// Move within this file system; both paths belong to it
    fn move_native(&self, source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()>;

    // ===== Change notification =====

    fn new_watch_service(&self) -> Result<Box<dyn WatchService>> {
        Err(ProviderError::Unsupported(format!("{} cannot be watched", self.scheme())))
    }
}

/// Fail with `ProviderMismatch` unless `path` belongs to the file system `id`
pub fn check_provider(id: FileSystemId, path: &ByteStringListPath) -> Result<()> {
    if path.file_system().id() == id {
        Ok(())
    } else {
        Err(ProviderError::ProviderMismatch(format!(
            "{} does not belong to {}",
            path, id
        )))
    }
}

/// Convenience operations that forward to the path's file system
impl ByteStringListPath {
    pub fn read_attributes(&self, follow_links: bool) -> Result<PosixFileAttributes> {
        self.file_system().read_attributes(self, follow_links)
    }

    pub fn exists(&self, follow_links: bool) -> bool {
        self.read_attributes(follow_links).is_ok()
    }

    pub fn is_directory(&self, follow_links: bool) -> bool {
        self.read_attributes(follow_links)
            .map(|attributes| attributes.is_directory())
            .unwrap_or(false)
    }

    pub fn is_regular_file(&self, follow_links: bool) -> bool {
        self.read_attributes(follow_links)
            .map(|attributes| attributes.is_regular_file())
            .unwrap_or(false)
    }

    pub fn list(&self) -> Result<Vec<ByteStringListPath>> {
        self.file_system().list_directory(self)
    }

    pub fn new_byte_channel(&self, options: &[OpenOption]) -> Result<Box<dyn SeekableByteChannel>> {
        let options = OpenOptions::from_options(options)?;
        self.file_system().new_byte_channel(self, &options, None)
    }

    pub fn new_input_stream(&self, follow_links: bool) -> Result<ChannelReader> {
        let options = OpenOptions {
            no_follow_links: !follow_links,
            ..OpenOptions::for_read()
        };
        let channel = self.file_system().new_byte_channel(self, &options, None)?;
        Ok(ChannelReader::new(channel))
    }

    /// Open for writing; no options means create, truncate and write
    pub fn new_output_stream(&self, options: &[OpenOption]) -> Result<ChannelWriter> {
        let options = if options.is_empty() {
            OpenOptions::for_write()
        } else {
            let mut options = OpenOptions::from_options(options)?;
            if options.read {
                return Err(ProviderError::InvalidArgument("READ not allowed for output".into()));
            }
            options.write = true;
            options
        };
        let channel = self.file_system().new_byte_channel(self, &options, None)?;
        Ok(ChannelWriter::new(channel))
    }

    pub fn read_all_bytes(&self) -> Result<Vec<u8>> {
        use std::io::Read;

        let mut reader = self.new_input_stream(true)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        reader.close()?;
        Ok(bytes)
    }

    pub fn write_all_bytes(&self, bytes: &[u8]) -> Result<()> {
        use std::io::Write;

        let mut writer = self.new_output_stream(&[])?;
        writer.write_all(bytes)?;
        writer.close()
    }

    pub fn create_directory(&self) -> Result<()> {
        self.file_system().create_directory(self, None)
    }

    /// Create this directory and any missing parents
    pub fn create_directories(&self) -> Result<()> {
        if self.is_directory(true) {
            return Ok(());
        }
        if let Some(parent) = self.parent() {
            parent.create_directories()?;
        }
        match self.create_directory() {
            Err(error) if error.is_file_already_exists() && self.is_directory(true) => Ok(()),
            result => result,
        }
    }

    pub fn create_symbolic_link(&self, target: &ByteString) -> Result<()> {
        self.file_system().create_symbolic_link(self, target)
    }

    pub fn read_symbolic_link(&self) -> Result<ByteString> {
        self.file_system().read_symbolic_link(self)
    }

    pub fn delete(&self) -> Result<()> {
        self.file_system().delete(self)
    }

    /// `Ok(false)` when there was nothing to delete
    pub fn delete_if_exists(&self) -> Result<bool> {
        match self.delete() {
            Ok(()) => Ok(true),
            Err(error) if error.is_no_such_file() => Ok(false),
            Err(error) => Err(error),
        }
    }

    pub fn set_times(&self, times: &FileTimes, follow_links: bool) -> Result<()> {
        self.file_system().set_times(self, times, follow_links)
    }

    pub fn set_mode(&self, mode: PosixFileMode, follow_links: bool) -> Result<()> {
        self.file_system().set_mode(self, mode, follow_links)
    }

    pub fn check_access(&self, modes: AccessModes) -> Result<()> {
        self.file_system().check_access(self, modes)
    }
}

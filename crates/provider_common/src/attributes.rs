//! File attribute snapshots
//!
//! Attributes are read eagerly by the backend and never refreshed in place;
//! callers that need fresh values read again.

use crate::byte_string::ByteString;
use crate::mode::{PosixFileMode, PosixFileType};
use std::time::SystemTime;

/// Identity of a file on its backend, like `(st_dev, st_ino)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub device: u64,
    pub inode: u64,
}

/// Owner of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PosixUser {
    pub id: u32,
    pub name: Option<ByteString>,
}

/// Group of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PosixGroup {
    pub id: u32,
    pub name: Option<ByteString>,
}

/// Attributes every backend can provide
pub trait BasicFileAttributes {
    fn last_modified_time(&self) -> SystemTime;
    fn last_access_time(&self) -> SystemTime;
    fn creation_time(&self) -> SystemTime;
    fn file_type(&self) -> PosixFileType;
    fn size(&self) -> u64;
    fn file_key(&self) -> Option<FileKey>;

    /// MIME type reported by the backend itself, if it knows one
    fn mime_type(&self) -> Option<&str> {
        None
    }

    fn is_regular_file(&self) -> bool {
        self.file_type().is_regular_file()
    }

    fn is_directory(&self) -> bool {
        self.file_type().is_directory()
    }

    fn is_symbolic_link(&self) -> bool {
        self.file_type().is_symbolic_link()
    }

    fn is_other(&self) -> bool {
        self.file_type().is_other()
    }
}

/// Full POSIX attribute snapshot
///
/// Equality is structural, which the polling watch service relies on to
/// detect modifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixFileAttributes {
    pub last_modified_time: SystemTime,
    pub last_access_time: SystemTime,
    pub creation_time: SystemTime,
    pub file_type: PosixFileType,
    pub size: u64,
    pub file_key: Option<FileKey>,
    pub owner: Option<PosixUser>,
    pub group: Option<PosixGroup>,
    /// Absent when the backend has no notion of permissions
    pub mode: Option<PosixFileMode>,
    pub selinux_context: Option<ByteString>,
}

impl Default for PosixFileAttributes {
    fn default() -> Self {
        Self {
            last_modified_time: SystemTime::UNIX_EPOCH,
            last_access_time: SystemTime::UNIX_EPOCH,
            creation_time: SystemTime::UNIX_EPOCH,
            file_type: PosixFileType::Unknown,
            size: 0,
            file_key: None,
            owner: None,
            group: None,
            mode: None,
            selinux_context: None,
        }
    }
}

impl PosixFileAttributes {
    pub fn owner(&self) -> Option<&PosixUser> {
        self.owner.as_ref()
    }

    pub fn group(&self) -> Option<&PosixGroup> {
        self.group.as_ref()
    }

    pub fn mode(&self) -> Option<PosixFileMode> {
        self.mode
    }

    pub fn selinux_context(&self) -> Option<&ByteString> {
        self.selinux_context.as_ref()
    }
}

impl BasicFileAttributes for PosixFileAttributes {
    fn last_modified_time(&self) -> SystemTime {
        self.last_modified_time
    }

    fn last_access_time(&self) -> SystemTime {
        self.last_access_time
    }

    fn creation_time(&self) -> SystemTime {
        self.creation_time
    }

    fn file_type(&self) -> PosixFileType {
        self.file_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn file_key(&self) -> Option<FileKey> {
        self.file_key
    }
}

/// Attributes of a file served by a content-provider style backend
///
/// Such backends only know a modification time, a size and a MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentProviderFileAttributes {
    pub last_modified_time: SystemTime,
    pub file_type: PosixFileType,
    pub size: u64,
    pub mime_type: Option<String>,
}

impl BasicFileAttributes for ContentProviderFileAttributes {
    fn last_modified_time(&self) -> SystemTime {
        self.last_modified_time
    }

    fn last_access_time(&self) -> SystemTime {
        self.last_modified_time
    }

    fn creation_time(&self) -> SystemTime {
        self.last_modified_time
    }

    fn file_type(&self) -> PosixFileType {
        self.file_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn file_key(&self) -> Option<FileKey> {
        None
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }
}

/// Timestamps to apply; `None` leaves a timestamp untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileTimes {
    pub last_modified_time: Option<SystemTime>,
    pub last_access_time: Option<SystemTime>,
    pub creation_time: Option<SystemTime>,
}

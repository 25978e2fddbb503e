//! Provider error taxonomy

use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised by paths, channels, watch services and cross-provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    // ===== Fail-fast input errors =====
    #[error("Invalid path {input:?}: {reason}")]
    InvalidPath { input: String, reason: String },

    #[error("Provider mismatch: {0}")]
    ProviderMismatch(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ===== Use after close =====
    #[error("Channel is closed")]
    ClosedChannel,

    #[error("Channel is not readable")]
    NonReadableChannel,

    #[error("Channel is not writable")]
    NonWritableChannel,

    #[error("Watch service is closed")]
    ClosedWatchService,

    #[error("Path observable is closed")]
    ClosedObservable,

    // ===== Cancellation =====
    #[error("Interrupted: {0}")]
    Interrupted(String),

    // ===== POSIX-style domain errors =====
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("No such file: {0}")]
    NoSuchFile(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Too many levels of symbolic links: {0}")]
    SymbolicLinkLoop(String),

    #[error("Cannot move atomically: {from} -> {to}")]
    AtomicMoveNotSupported { from: String, to: String },

    #[error("Read-only file system")]
    ReadOnlyFileSystem,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    // ===== Backend and ambient failures =====
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{error} ({count} suppressed)", count = .suppressed.len())]
    Suppressed {
        error: Box<ProviderError>,
        suppressed: Vec<ProviderError>,
    },
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn invalid_path(input: &[u8], reason: impl Into<String>) -> Self {
        ProviderError::InvalidPath {
            input: String::from_utf8_lossy(input).into_owned(),
            reason: reason.into(),
        }
    }

    pub fn interrupted(what: impl Into<String>) -> Self {
        ProviderError::Interrupted(what.into())
    }

    /// Map an OS error onto the domain taxonomy, naming the path involved
    pub fn from_io(error: io::Error, path: impl fmt::Display) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => ProviderError::NoSuchFile(path.to_string()),
            io::ErrorKind::AlreadyExists => ProviderError::FileAlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => ProviderError::AccessDenied(path.to_string()),
            io::ErrorKind::Interrupted => ProviderError::Interrupted(path.to_string()),
            _ => ProviderError::from(error),
        }
    }

    /// Attach a secondary failure that happened while unwinding from this one
    pub fn with_suppressed(self, other: ProviderError) -> Self {
        match self {
            ProviderError::Suppressed { error, mut suppressed } => {
                suppressed.push(other);
                ProviderError::Suppressed { error, suppressed }
            }
            error => ProviderError::Suppressed {
                error: Box::new(error),
                suppressed: vec![other],
            },
        }
    }

    /// The error that caused the failure, ignoring suppressed cleanup errors
    pub fn primary(&self) -> &ProviderError {
        match self {
            ProviderError::Suppressed { error, .. } => error.primary(),
            error => error,
        }
    }

    pub fn suppressed(&self) -> &[ProviderError] {
        match self {
            ProviderError::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.primary(), ProviderError::Interrupted(_))
    }

    pub fn is_no_such_file(&self) -> bool {
        matches!(self.primary(), ProviderError::NoSuchFile(_))
    }

    pub fn is_file_already_exists(&self) -> bool {
        matches!(self.primary(), ProviderError::FileAlreadyExists(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.primary(), ProviderError::Unsupported(_))
    }

    /// Can the caller retry or surface this to the user and carry on?
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.primary(),
            ProviderError::InvalidPath { .. }
                | ProviderError::ProviderMismatch(_)
                | ProviderError::Config(_)
        )
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self.primary() {
            ProviderError::NoSuchFile(_) => io::ErrorKind::NotFound,
            ProviderError::FileAlreadyExists(_) => io::ErrorKind::AlreadyExists,
            ProviderError::AccessDenied(_) | ProviderError::ReadOnlyFileSystem => {
                io::ErrorKind::PermissionDenied
            }
            ProviderError::InvalidPath { .. } | ProviderError::InvalidArgument(_) => {
                io::ErrorKind::InvalidInput
            }
            ProviderError::Unsupported(_) => io::ErrorKind::Unsupported,
            ProviderError::Io(error) => error.kind(),
            // Never io::ErrorKind::Interrupted: std copy loops retry on it.
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<io::Error> for ProviderError {
    fn from(error: io::Error) -> Self {
        if error.get_ref().map_or(false, |inner| inner.is::<ProviderError>()) {
            if let Some(inner) = error.into_inner() {
                if let Ok(provider_error) = inner.downcast::<ProviderError>() {
                    return *provider_error;
                }
            }
            return ProviderError::Io(io::Error::other("unrecoverable wrapped error"));
        }
        ProviderError::Io(error)
    }
}

impl From<ProviderError> for io::Error {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Io(error) => error,
            error => io::Error::new(error.io_kind(), error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppressed_keeps_primary() {
        let error = ProviderError::AccessDenied("/a".into())
            .with_suppressed(ProviderError::NoSuchFile("/b".into()))
            .with_suppressed(ProviderError::ReadOnlyFileSystem);
        assert!(matches!(error.primary(), ProviderError::AccessDenied(_)));
        assert_eq!(error.suppressed().len(), 2);
        assert!(error.to_string().contains("2 suppressed"));
    }

    #[test]
    fn test_io_round_trip_preserves_variant() {
        let io_error: io::Error = ProviderError::ClosedChannel.into();
        let back = ProviderError::from(io_error);
        assert!(matches!(back, ProviderError::ClosedChannel));
    }

    #[test]
    fn test_interrupted_is_not_io_interrupted() {
        let io_error: io::Error = ProviderError::interrupted("read").into();
        assert_ne!(io_error.kind(), io::ErrorKind::Interrupted);
        assert!(ProviderError::from(io_error).is_interrupted());
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let error = ProviderError::from_io(io::Error::from(io::ErrorKind::NotFound), "/x");
        assert!(error.is_no_such_file());
        let error = ProviderError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/x");
        assert!(error.is_file_already_exists());
    }
}

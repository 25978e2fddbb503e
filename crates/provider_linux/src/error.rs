//! OS error mapping

use provider_common::ProviderError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failures specific to the local backend
#[derive(Error, Debug)]
pub enum LinuxProviderError {
    #[error("Native watcher failed for {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },

    #[error("Cross-device move from {from} to {to}")]
    CrossDevice { from: String, to: String },
}

impl From<LinuxProviderError> for ProviderError {
    fn from(error: LinuxProviderError) -> Self {
        match error {
            LinuxProviderError::Watch { path, source } => match source.kind {
                notify::ErrorKind::PathNotFound => ProviderError::NoSuchFile(path),
                notify::ErrorKind::Io(io_error) => map_io(io_error, path),
                kind => ProviderError::Io(io::Error::other(format!("{:?} watching {}", kind, path))),
            },
            LinuxProviderError::CrossDevice { from, to } => ProviderError::AtomicMoveNotSupported { from, to },
        }
    }
}

/// [`ProviderError::from_io`] plus the errno values `io::ErrorKind` does not name on our MSRV
pub fn map_io(error: io::Error, path: impl fmt::Display) -> ProviderError {
    let path = path.to_string();
    match error.raw_os_error() {
        Some(libc::ENOTDIR) => ProviderError::NotDirectory(path),
        Some(libc::EISDIR) => ProviderError::IsDirectory(path),
        Some(libc::ENOTEMPTY) => ProviderError::DirectoryNotEmpty(path),
        Some(libc::EROFS) => ProviderError::ReadOnlyFileSystem,
        Some(libc::ELOOP) => ProviderError::SymbolicLinkLoop(path),
        _ => ProviderError::from_io(error, path),
    }
}

pub fn is_cross_device(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let cases = [
            (libc::ENOTDIR, "NotDirectory"),
            (libc::EISDIR, "IsDirectory"),
            (libc::ENOTEMPTY, "DirectoryNotEmpty"),
            (libc::ELOOP, "SymbolicLinkLoop"),
        ];
        for (errno, expected) in cases {
            let mapped = map_io(io::Error::from_raw_os_error(errno), "/x");
            assert!(format!("{:?}", mapped).starts_with(expected), "{:?}", mapped);
        }
        assert!(matches!(
            map_io(io::Error::from_raw_os_error(libc::EROFS), "/x"),
            ProviderError::ReadOnlyFileSystem
        ));
        assert!(map_io(io::Error::from(io::ErrorKind::NotFound), "/x").is_no_such_file());
    }

    #[test]
    fn test_cross_device_becomes_atomic_move_error() {
        assert!(is_cross_device(&io::Error::from_raw_os_error(libc::EXDEV)));
        let error: ProviderError = LinuxProviderError::CrossDevice {
            from: "/a".into(),
            to: "/b".into(),
        }
        .into();
        assert!(matches!(error, ProviderError::AtomicMoveNotSupported { .. }));
    }
}

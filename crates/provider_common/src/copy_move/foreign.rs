//! Copy and move between different file systems
//!
//! Only the entry itself is transferred: a directory arrives empty and a
//! symbolic link keeps its target bytes. Copying timestamps is best effort.

use super::copy_stream;
use crate::attributes::{BasicFileAttributes, FileTimes, PosixFileAttributes};
use crate::error::{ProviderError, Result};
use crate::mode::PosixFileType;
use crate::options::{CopyOptions, OpenOption};
use crate::path::ByteStringListPath;

pub fn copy(source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
    if options.atomic_move {
        return Err(ProviderError::Unsupported(format!(
            "Atomic copy from {} to {}",
            source, target
        )));
    }
    options.check_cancelled()?;
    let attributes = source.read_attributes(options.follow_links())?;
    let file_type = attributes.file_type();
    if !matches!(
        file_type,
        PosixFileType::RegularFile | PosixFileType::Directory | PosixFileType::SymbolicLink
    ) {
        return Err(ProviderError::Unsupported(format!(
            "Cannot copy special file {} to another provider",
            source
        )));
    }
    if !options.replace_existing && target.exists(false) {
        return Err(ProviderError::FileAlreadyExists(target.to_string()));
    }

    match file_type {
        PosixFileType::RegularFile => copy_regular_file(source, target, options)?,
        PosixFileType::Directory => {
            if options.replace_existing {
                target.delete_if_exists()?;
            }
            target.create_directory()?;
            options.report_progress(attributes.size());
        }
        _ => {
            let link_target = source.read_symbolic_link()?;
            // Creation may be unsupported, so an existing target goes only after a clash
            match target.create_symbolic_link(&link_target) {
                Err(e) if e.is_file_already_exists() && options.replace_existing => {
                    target.delete_if_exists()?;
                    target.create_symbolic_link(&link_target)?;
                }
                result => result?,
            }
            options.report_progress(attributes.size());
        }
    }

    copy_times(target, &attributes, options);
    tracing::debug!("Copied {} to {}", source, target);
    Ok(())
}

fn copy_regular_file(source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
    if options.replace_existing {
        target.delete_if_exists()?;
    }
    let mut input = source.new_input_stream(options.follow_links())?;
    let mut output = target.new_output_stream(&[OpenOption::CreateNew, OpenOption::Write])?;
    let copied = copy_stream(&mut input, &mut output, options);
    let closed = output.close();
    let result = copied.and(closed);
    if let Err(e) = input.close() {
        tracing::warn!("Failed to close {}: {}", source, e);
    }
    if result.is_err() {
        if let Err(e) = target.delete_if_exists() {
            tracing::warn!("Failed to remove partial copy {}: {}", target, e);
        }
    }
    result
}

fn copy_times(target: &ByteStringListPath, attributes: &PosixFileAttributes, options: &CopyOptions) {
    let times = FileTimes {
        last_modified_time: Some(attributes.last_modified_time),
        last_access_time: options.copy_attributes.then_some(attributes.last_access_time),
        creation_time: options.copy_attributes.then_some(attributes.creation_time),
    };
    if let Err(e) = target.set_times(&times, false) {
        tracing::warn!("Failed to copy timestamps to {}: {}", target, e);
    }
}

/// Copy with attributes and without following links, then delete the source
///
/// When the source cannot be deleted the copy is rolled back, and a failed
/// rollback is attached to the original error.
pub fn move_path(source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
    if options.atomic_move {
        return Err(ProviderError::AtomicMoveNotSupported {
            from: source.to_string(),
            to: target.to_string(),
        });
    }
    let copy_options = CopyOptions {
        copy_attributes: true,
        no_follow_links: true,
        atomic_move: false,
        ..options.clone()
    };
    copy(source, target, &copy_options)?;
    match source.delete() {
        Ok(()) => Ok(()),
        Err(e) if e.is_no_such_file() => Err(e),
        Err(e) => {
            tracing::warn!("Failed to delete {} after copying, rolling back", source);
            match target.delete() {
                Ok(()) => Err(e),
                Err(rollback) => Err(e.with_suppressed(rollback)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_string::ByteString;
    use crate::file_system::FileSystem;
    use crate::memory::MemoryFileSystem;
    use crate::path::FileSystemPaths;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn two() -> (Arc<dyn FileSystem>, Arc<dyn FileSystem>) {
        (MemoryFileSystem::new(), MemoryFileSystem::new())
    }

    #[test]
    fn test_copy_regular_file_keeps_modified_time() {
        let (left, right) = two();
        let source = left.path("/a.bin").unwrap();
        source.write_all_bytes(b"contents").unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
        source
            .set_times(
                &FileTimes {
                    last_modified_time: Some(when),
                    ..FileTimes::default()
                },
                true,
            )
            .unwrap();
        let target = right.path("/b.bin").unwrap();
        copy(&source, &target, &CopyOptions::default()).unwrap();
        assert_eq!(target.read_all_bytes().unwrap(), b"contents");
        assert_eq!(target.read_attributes(true).unwrap().last_modified_time, when);
        assert!(source.exists(true));
    }

    #[test]
    fn test_existing_target_untouched() {
        let (left, right) = two();
        let source = left.path("/s").unwrap();
        source.write_all_bytes(b"new").unwrap();
        let target = right.path("/t").unwrap();
        target.write_all_bytes(b"old").unwrap();
        let error = copy(&source, &target, &CopyOptions::default()).unwrap_err();
        assert!(error.is_file_already_exists());
        assert_eq!(source.read_all_bytes().unwrap(), b"new");
        assert_eq!(target.read_all_bytes().unwrap(), b"old");

        let replace = CopyOptions {
            replace_existing: true,
            ..CopyOptions::default()
        };
        copy(&source, &target, &replace).unwrap();
        assert_eq!(target.read_all_bytes().unwrap(), b"new");
    }

    #[test]
    fn test_copy_directory_is_shallow() {
        let (left, right) = two();
        let source = left.path("/dir").unwrap();
        source.create_directory().unwrap();
        left.path("/dir/child").unwrap().write_all_bytes(b"x").unwrap();
        let target = right.path("/dir").unwrap();
        copy(&source, &target, &CopyOptions::default()).unwrap();
        assert!(target.is_directory(false));
        assert!(target.list().unwrap().is_empty());
    }

    #[test]
    fn test_copy_symbolic_link_without_following() {
        let (left, right) = two();
        let link = left.path("/link").unwrap();
        link.create_symbolic_link(&ByteString::from("/nowhere")).unwrap();
        let target = right.path("/link").unwrap();
        let options = CopyOptions {
            no_follow_links: true,
            ..CopyOptions::default()
        };
        copy(&link, &target, &options).unwrap();
        assert_eq!(target.read_symbolic_link().unwrap(), ByteString::from("/nowhere"));

        let replace = CopyOptions {
            replace_existing: true,
            ..options
        };
        copy(&link, &target, &replace).unwrap();
        assert_eq!(target.read_symbolic_link().unwrap(), ByteString::from("/nowhere"));
    }

    #[test]
    fn test_atomic_rejected() {
        let (left, right) = two();
        let source = left.path("/s").unwrap();
        source.write_all_bytes(b"x").unwrap();
        let target = right.path("/t").unwrap();
        let atomic = CopyOptions {
            atomic_move: true,
            ..CopyOptions::default()
        };
        assert!(copy(&source, &target, &atomic).unwrap_err().is_unsupported());
        assert!(matches!(
            move_path(&source, &target, &atomic),
            Err(ProviderError::AtomicMoveNotSupported { .. })
        ));
        assert!(!target.exists(false));
    }

    #[test]
    fn test_move_removes_source() {
        let (left, right) = two();
        let source = left.path("/s").unwrap();
        source.write_all_bytes(b"moving").unwrap();
        let target = right.path("/t").unwrap();
        move_path(&source, &target, &CopyOptions::default()).unwrap();
        assert!(!source.exists(false));
        assert_eq!(target.read_all_bytes().unwrap(), b"moving");
    }

    #[test]
    fn test_failed_source_delete_rolls_back() {
        let left = MemoryFileSystem::new();
        let left_fs: Arc<dyn FileSystem> = left.clone();
        let right: Arc<dyn FileSystem> = MemoryFileSystem::new();
        let source = left_fs.path("/s").unwrap();
        source.write_all_bytes(b"stay").unwrap();
        left.set_read_only(true);
        let target = right.path("/t").unwrap();
        let error = move_path(&source, &target, &CopyOptions::default()).unwrap_err();
        assert!(matches!(error.primary(), ProviderError::ReadOnlyFileSystem));
        assert!(!target.exists(false));
        assert!(source.exists(false));
    }
}

//! The host file system
//!
//! Paths are passed to the kernel byte for byte, so names that are not valid
//! UTF-8 survive listing, opening and renaming. Every mutation made through
//! this backend is reported to its [`LocalWatchHub`]; changes made by other
//! processes arrive through [`NativeWatcher`].

use crate::channel::FileBackend;
use crate::error::{is_cross_device, map_io, LinuxProviderError};
use crate::watcher::NativeWatcher;
use once_cell::sync::OnceCell;
use provider_common::attributes::{PosixGroup, PosixUser};
use provider_common::channel::{DeleteOnCloseChannel, FileByteChannel};
use provider_common::copy_move::{copy_stream, foreign};
use provider_common::file_system::check_provider;
use provider_common::watch::{LocalWatchHub, LocalWatchService, NotifyingByteChannel, PollingWatchService};
use provider_common::{
    ByteString, ByteStringListPath, CopyOptions, FileKey, FileSystem, FileSystemId, FileTimes, OpenOptions,
    PosixFileAttributes, PosixFileMode, PosixFileType, ProviderConfig, ProviderError, Result,
    SeekableByteChannel, WatchService,
};
use std::ffi::{CString, OsStr};
use std::fs::{self, DirBuilder, File, Metadata, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SCHEME: &str = "file";

/// Absolute host path for a provider path
pub(crate) fn host_path(path: &ByteStringListPath) -> Result<PathBuf> {
    let absolute = path.to_absolute_path()?.normalize().to_byte_string();
    Ok(PathBuf::from(OsStr::from_bytes(absolute.as_bytes())))
}

fn system_time(seconds: i64, nanos: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nanos.clamp(0, 999_999_999) as u64);
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs()) + nanos
    }
}

fn timespec(time: Option<SystemTime>) -> libc::timespec {
    // SAFETY: timespec is plain old data
    let mut spec: libc::timespec = unsafe { std::mem::zeroed() };
    let Some(time) = time else {
        spec.tv_nsec = libc::UTIME_OMIT;
        return spec;
    };
    let (seconds, nanos) = match time.duration_since(UNIX_EPOCH) {
        Ok(since) => (since.as_secs() as i64, i64::from(since.subsec_nanos())),
        Err(before) => {
            let before = before.duration();
            let seconds = -(before.as_secs() as i64);
            match before.subsec_nanos() {
                0 => (seconds, 0),
                nanos => (seconds - 1, 1_000_000_000 - i64::from(nanos)),
            }
        }
    };
    spec.tv_sec = seconds as libc::time_t;
    spec.tv_nsec = nanos as _;
    spec
}

/// utimensat(2); works without read or write permission on the file
fn set_host_times(
    host: &Path,
    modified: Option<SystemTime>,
    accessed: Option<SystemTime>,
    follow_links: bool,
) -> io::Result<()> {
    let host = CString::new(host.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    let times = [timespec(accessed), timespec(modified)];
    let flags = if follow_links { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    // SAFETY: both pointers are valid for the duration of the call
    let result = unsafe { libc::utimensat(libc::AT_FDCWD, host.as_ptr(), times.as_ptr(), flags) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn attributes(metadata: &Metadata) -> PosixFileAttributes {
    let modified = system_time(metadata.mtime(), metadata.mtime_nsec());
    PosixFileAttributes {
        last_modified_time: modified,
        last_access_time: system_time(metadata.atime(), metadata.atime_nsec()),
        creation_time: metadata.created().unwrap_or(modified),
        file_type: PosixFileType::from_mode(metadata.mode()),
        size: metadata.size(),
        file_key: Some(FileKey {
            device: metadata.dev(),
            inode: metadata.ino(),
        }),
        owner: Some(PosixUser {
            id: metadata.uid(),
            name: None,
        }),
        group: Some(PosixGroup {
            id: metadata.gid(),
            name: None,
        }),
        mode: Some(PosixFileMode::from_int(metadata.mode() & 0o7777)),
        selinux_context: None,
    }
}

fn same_file(left: &Metadata, right: &Metadata) -> bool {
    left.dev() == right.dev() && left.ino() == right.ino()
}

pub struct LocalFileSystem {
    id: FileSystemId,
    this: Weak<LocalFileSystem>,
    default_directory: ByteString,
    config: ProviderConfig,
    hub: Arc<LocalWatchHub>,
    native_watching: OnceCell<bool>,
}

impl LocalFileSystem {
    /// Relative paths resolve against the process working directory
    pub fn new(config: &ProviderConfig) -> Arc<Self> {
        let default_directory = std::env::current_dir()
            .map(|directory| ByteString::from_bytes(directory.as_os_str().as_bytes()))
            .unwrap_or_else(|_| ByteString::from("/"));
        Self::with_default_directory(default_directory, config)
    }

    pub fn with_default_directory(default_directory: ByteString, config: &ProviderConfig) -> Arc<Self> {
        let file_system = Arc::new_cyclic(|this| Self {
            id: FileSystemId::next(),
            this: this.clone(),
            default_directory,
            config: config.clone(),
            hub: LocalWatchHub::new(),
            native_watching: OnceCell::new(),
        });
        tracing::debug!("Local file system {} created", file_system.id);
        file_system
    }

    pub fn hub(&self) -> &Arc<LocalWatchHub> {
        &self.hub
    }

    /// Start the native watcher on first use; `false` when the OS refused
    fn native_watching(&self) -> bool {
        *self.native_watching.get_or_init(|| {
            let this: Weak<dyn FileSystem> = self.this.clone();
            match NativeWatcher::new(this, Arc::downgrade(&self.hub)) {
                Ok(watcher) => self.hub.set_native_source(Arc::new(watcher)),
                Err(e) => {
                    tracing::warn!("Native watching unavailable, polling instead: {}", e);
                    false
                }
            }
        })
    }

    fn metadata(&self, path: &ByteStringListPath, follow_links: bool) -> Result<Metadata> {
        let host = host_path(path)?;
        let metadata = if follow_links {
            fs::metadata(&host)
        } else {
            fs::symlink_metadata(&host)
        };
        metadata.map_err(|e| map_io(e, path))
    }

    /// chmod cannot reach a link itself on Linux
    fn reject_link(&self, path: &ByteStringListPath, follow_links: bool, what: &str) -> Result<()> {
        if !follow_links && self.metadata(path, false)?.file_type().is_symlink() {
            return Err(ProviderError::Unsupported(format!("{} on symbolic link {}", what, path)));
        }
        Ok(())
    }

    fn copy_file(
        &self,
        source: &ByteStringListPath,
        target: &ByteStringListPath,
        metadata: &Metadata,
        options: &CopyOptions,
    ) -> Result<()> {
        let mode = if options.copy_attributes {
            metadata.mode() & 0o7777
        } else {
            PosixFileMode::CREATE_FILE_DEFAULT.to_int()
        };
        let mut input = File::open(host_path(source)?).map_err(|e| map_io(e, source))?;
        let mut output = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(host_path(target)?)
            .map_err(|e| map_io(e, target))?;
        let copied = copy_stream(&mut input, &mut output, options);
        drop(output);
        if let Err(e) = copied {
            if let Err(cleanup) = fs::remove_file(host_path(target)?) {
                tracing::warn!("Failed to remove partial copy {}: {}", target, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Part of a copy, so watchers only see the creation
    fn copy_times(&self, target: &ByteStringListPath, metadata: &Metadata) -> Result<()> {
        let modified = system_time(metadata.mtime(), metadata.mtime_nsec());
        let accessed = system_time(metadata.atime(), metadata.atime_nsec());
        if let Err(e) = set_host_times(&host_path(target)?, Some(modified), Some(accessed), false) {
            tracing::warn!("Failed to copy timestamps to {}: {}", target, e);
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn id(&self) -> FileSystemId {
        self.id
    }

    fn scheme(&self) -> &str {
        SCHEME
    }

    fn default_directory(&self) -> ByteString {
        self.default_directory.clone()
    }

    fn read_attributes(&self, path: &ByteStringListPath, follow_links: bool) -> Result<PosixFileAttributes> {
        check_provider(self.id, path)?;
        Ok(attributes(&self.metadata(path, follow_links)?))
    }

    fn set_times(&self, path: &ByteStringListPath, times: &FileTimes, follow_links: bool) -> Result<()> {
        check_provider(self.id, path)?;
        if times.creation_time.is_some() {
            tracing::debug!("Creation time of {} cannot be set", path);
        }
        set_host_times(
            &host_path(path)?,
            times.last_modified_time,
            times.last_access_time,
            follow_links,
        )
        .map_err(|e| map_io(e, path))?;
        self.hub.on_entry_modified(path);
        Ok(())
    }

    fn set_mode(&self, path: &ByteStringListPath, mode: PosixFileMode, follow_links: bool) -> Result<()> {
        check_provider(self.id, path)?;
        self.reject_link(path, follow_links, "set_mode")?;
        fs::set_permissions(host_path(path)?, Permissions::from_mode(mode.to_int())).map_err(|e| map_io(e, path))?;
        self.hub.on_entry_modified(path);
        Ok(())
    }

    fn set_owner(&self, path: &ByteStringListPath, owner: &PosixUser, follow_links: bool) -> Result<()> {
        check_provider(self.id, path)?;
        let host = host_path(path)?;
        let changed = if follow_links {
            std::os::unix::fs::chown(&host, Some(owner.id), None)
        } else {
            std::os::unix::fs::lchown(&host, Some(owner.id), None)
        };
        changed.map_err(|e| map_io(e, path))?;
        self.hub.on_entry_modified(path);
        Ok(())
    }

    fn set_group(&self, path: &ByteStringListPath, group: &PosixGroup, follow_links: bool) -> Result<()> {
        check_provider(self.id, path)?;
        let host = host_path(path)?;
        let changed = if follow_links {
            std::os::unix::fs::chown(&host, None, Some(group.id))
        } else {
            std::os::unix::fs::lchown(&host, None, Some(group.id))
        };
        changed.map_err(|e| map_io(e, path))?;
        self.hub.on_entry_modified(path);
        Ok(())
    }

    fn list_directory(&self, path: &ByteStringListPath) -> Result<Vec<ByteStringListPath>> {
        check_provider(self.id, path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(host_path(path)?).map_err(|e| map_io(e, path))? {
            let entry = entry.map_err(|e| map_io(e, path))?;
            names.push(ByteString::from_bytes(entry.file_name().as_bytes()));
        }
        names.sort();
        names.iter().map(|name| path.resolve_name(name)).collect()
    }

    fn new_byte_channel(
        &self,
        path: &ByteStringListPath,
        options: &OpenOptions,
        mode: Option<PosixFileMode>,
    ) -> Result<Box<dyn SeekableByteChannel>> {
        check_provider(self.id, path)?;
        let options = options.validate()?;
        let host = host_path(path)?;
        let existed = fs::symlink_metadata(&host).is_ok();
        let writable = options.write || options.append;
        let file = fs::OpenOptions::new()
            .read(options.read)
            .write(options.write && !options.append)
            .append(options.append)
            .truncate(writable && options.truncate_existing)
            .create(writable && options.create)
            .create_new(writable && options.create_new)
            .mode(mode.unwrap_or(PosixFileMode::CREATE_FILE_DEFAULT).to_int())
            .custom_flags(if options.no_follow_links { libc::O_NOFOLLOW } else { 0 })
            .open(&host)
            .map_err(|e| map_io(e, path))?;
        if file.metadata().map_err(|e| map_io(e, path))?.is_dir() {
            return Err(ProviderError::IsDirectory(path.to_string()));
        }

        let backend = FileBackend::new(file, path.to_string());
        let mut channel: Box<dyn SeekableByteChannel> = Box::new(FileByteChannel::new(
            backend,
            &options,
            self.config.channel.to_read_policy(),
        ));
        if writable {
            if !existed {
                self.hub.on_entry_created(path);
            }
            channel = Box::new(NotifyingByteChannel::new(channel, path.clone(), self.hub.clone()));
        }
        if options.delete_on_close {
            channel = Box::new(DeleteOnCloseChannel::new(channel, path.clone()));
        }
        Ok(channel)
    }

    fn create_directory(&self, path: &ByteStringListPath, mode: Option<PosixFileMode>) -> Result<()> {
        check_provider(self.id, path)?;
        DirBuilder::new()
            .mode(mode.unwrap_or(PosixFileMode::CREATE_DIRECTORY_DEFAULT).to_int())
            .create(host_path(path)?)
            .map_err(|e| map_io(e, path))?;
        self.hub.on_entry_created(path);
        Ok(())
    }

    fn create_symbolic_link(&self, link: &ByteStringListPath, target: &ByteString) -> Result<()> {
        check_provider(self.id, link)?;
        std::os::unix::fs::symlink(OsStr::from_bytes(target.as_bytes()), host_path(link)?)
            .map_err(|e| map_io(e, link))?;
        self.hub.on_entry_created(link);
        Ok(())
    }

    fn read_symbolic_link(&self, link: &ByteStringListPath) -> Result<ByteString> {
        check_provider(self.id, link)?;
        let target = fs::read_link(host_path(link)?).map_err(|e| map_io(e, link))?;
        Ok(ByteString::from_bytes(target.as_os_str().as_bytes()))
    }

    fn delete(&self, path: &ByteStringListPath) -> Result<()> {
        check_provider(self.id, path)?;
        let host = host_path(path)?;
        let removed = if self.metadata(path, false)?.is_dir() {
            fs::remove_dir(&host)
        } else {
            fs::remove_file(&host)
        };
        removed.map_err(|e| map_io(e, path))?;
        self.hub.on_entry_deleted(path);
        Ok(())
    }

    fn copy_native(&self, source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
        check_provider(self.id, source)?;
        check_provider(self.id, target)?;
        if options.atomic_move {
            return Err(ProviderError::Unsupported("atomic copy".into()));
        }
        options.check_cancelled()?;
        let metadata = self.metadata(source, options.follow_links())?;
        if let Ok(existing) = self.metadata(target, false) {
            if same_file(&metadata, &existing) {
                return Ok(());
            }
            if !options.replace_existing {
                return Err(ProviderError::FileAlreadyExists(target.to_string()));
            }
            self.delete(target)?;
        }

        let file_type = metadata.file_type();
        if file_type.is_file() {
            self.copy_file(source, target, &metadata, options)?;
        } else if file_type.is_dir() {
            let mode = options
                .copy_attributes
                .then(|| PosixFileMode::from_int(metadata.mode() & 0o7777));
            DirBuilder::new()
                .mode(mode.unwrap_or(PosixFileMode::CREATE_DIRECTORY_DEFAULT).to_int())
                .create(host_path(target)?)
                .map_err(|e| map_io(e, target))?;
            options.report_progress(metadata.size());
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(host_path(source)?).map_err(|e| map_io(e, source))?;
            std::os::unix::fs::symlink(link_target, host_path(target)?).map_err(|e| map_io(e, target))?;
            options.report_progress(metadata.size());
        } else {
            return Err(ProviderError::Unsupported(format!("Cannot copy special file {}", source)));
        }

        if options.copy_attributes {
            self.copy_times(target, &metadata)?;
        }
        self.hub.on_entry_created(target);
        tracing::debug!("Copied {} to {}", source, target);
        Ok(())
    }

    fn move_native(&self, source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
        check_provider(self.id, source)?;
        check_provider(self.id, target)?;
        let metadata = self.metadata(source, false)?;
        if let Ok(existing) = self.metadata(target, false) {
            if same_file(&metadata, &existing) {
                return Ok(());
            }
            if !options.replace_existing {
                return Err(ProviderError::FileAlreadyExists(target.to_string()));
            }
            self.delete(target)?;
        }
        match fs::rename(host_path(source)?, host_path(target)?) {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) && options.atomic_move => {
                return Err(LinuxProviderError::CrossDevice {
                    from: source.to_string(),
                    to: target.to_string(),
                }
                .into());
            }
            Err(e) if is_cross_device(&e) => {
                tracing::debug!("{} and {} are on different devices, copying", source, target);
                return foreign::move_path(source, target, options);
            }
            Err(e) => return Err(map_io(e, source)),
        }
        self.hub.on_entry_deleted(source);
        self.hub.on_entry_created(target);
        tracing::debug!("Moved {} to {}", source, target);
        Ok(())
    }

    fn new_watch_service(&self) -> Result<Box<dyn WatchService>> {
        if self.native_watching() {
            Ok(Box::new(LocalWatchService::new(&self.hub, &self.config.watch)))
        } else {
            Ok(Box::new(PollingWatchService::new(&self.config.watch)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider_common::{FileSystemPaths, OpenOption, WatchEventKind};
    use std::io::Read;

    fn setup() -> (tempfile::TempDir, Arc<dyn FileSystem>) {
        let dir = tempfile::tempdir().unwrap();
        let default_directory = ByteString::from_bytes(dir.path().as_os_str().as_bytes());
        let fs: Arc<dyn FileSystem> = LocalFileSystem::with_default_directory(default_directory, &ProviderConfig::default());
        (dir, fs)
    }

    #[test]
    fn test_relative_paths_resolve_against_default_directory() {
        let (dir, fs) = setup();
        fs.path("note.txt").unwrap().write_all_bytes(b"hello").unwrap();
        assert_eq!(fs::read(dir.path().join("note.txt")).unwrap(), b"hello");
        let attributes = fs.path("note.txt").unwrap().read_attributes(true).unwrap();
        assert!(attributes.file_type.is_regular_file());
        assert_eq!(attributes.size, 5);
        assert!(attributes.file_key.is_some());
    }

    #[test]
    fn test_non_utf8_names_survive_listing() {
        let (dir, fs) = setup();
        let name = [b'r', 0xe9, b's', b'u', b'm', 0xe9];
        fs::write(dir.path().join(OsStr::from_bytes(&name)), b"x").unwrap();
        let listed = fs.path(".").unwrap().list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_name_bytes().unwrap().as_bytes(), &name);
        assert_eq!(listed[0].read_all_bytes().unwrap(), b"x");
    }

    #[test]
    fn test_error_mapping() {
        let (_dir, fs) = setup();
        let dir = fs.path("d").unwrap();
        dir.create_directory().unwrap();
        fs.path("d/f").unwrap().write_all_bytes(b"").unwrap();
        assert!(matches!(dir.delete(), Err(ProviderError::DirectoryNotEmpty(_))));
        assert!(dir.create_directory().unwrap_err().is_file_already_exists());
        assert!(matches!(
            fs.path("d/f/g").unwrap().create_directory(),
            Err(ProviderError::NotDirectory(_))
        ));
        assert!(matches!(dir.new_input_stream(true), Err(ProviderError::IsDirectory(_))));
        assert!(fs.path("missing").unwrap().read_attributes(true).unwrap_err().is_no_such_file());
    }

    #[test]
    fn test_symbolic_links() {
        let (_dir, fs) = setup();
        fs.path("target").unwrap().write_all_bytes(b"pointed").unwrap();
        let link = fs.path("link").unwrap();
        link.create_symbolic_link(&ByteString::from("target")).unwrap();
        assert_eq!(link.read_symbolic_link().unwrap(), ByteString::from("target"));
        assert!(link.read_attributes(false).unwrap().file_type.is_symbolic_link());
        assert_eq!(link.read_all_bytes().unwrap(), b"pointed");
        assert!(matches!(
            link.new_byte_channel(&[OpenOption::Read, OpenOption::NoFollowLinks]),
            Err(ProviderError::SymbolicLinkLoop(_))
        ));
        assert!(link
            .set_mode(PosixFileMode::from_int(0o600), false)
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn test_mode_and_times() {
        let (_dir, fs) = setup();
        let file = fs.path("f").unwrap();
        file.write_all_bytes(b"").unwrap();
        file.set_mode(PosixFileMode::from_int(0o640), true).unwrap();
        assert_eq!(file.read_attributes(true).unwrap().mode, Some(PosixFileMode::from_int(0o640)));
        let when = UNIX_EPOCH + Duration::from_secs(1_000_000);
        file.set_times(
            &FileTimes {
                last_modified_time: Some(when),
                ..FileTimes::default()
            },
            true,
        )
        .unwrap();
        assert_eq!(file.read_attributes(true).unwrap().last_modified_time, when);
    }

    #[test]
    fn test_times_without_read_permission() {
        let (_dir, fs) = setup();
        let file = fs.path("write_only").unwrap();
        file.write_all_bytes(b"x").unwrap();
        file.set_mode(PosixFileMode::from_int(0o200), true).unwrap();
        let when = UNIX_EPOCH + Duration::from_secs(2_000_000);
        file.set_times(
            &FileTimes {
                last_modified_time: Some(when),
                last_access_time: Some(when),
                ..FileTimes::default()
            },
            true,
        )
        .unwrap();
        let attributes = file.read_attributes(true).unwrap();
        assert_eq!(attributes.last_modified_time, when);
        assert_eq!(attributes.last_access_time, when);
    }

    #[test]
    fn test_times_on_link_itself() {
        let (_dir, fs) = setup();
        let target = fs.path("target").unwrap();
        target.write_all_bytes(b"x").unwrap();
        let before = target.read_attributes(true).unwrap().last_modified_time;
        let link = fs.path("link").unwrap();
        link.create_symbolic_link(&ByteString::from("target")).unwrap();
        let when = UNIX_EPOCH + Duration::from_millis(1_500);
        link.set_times(
            &FileTimes {
                last_modified_time: Some(when),
                ..FileTimes::default()
            },
            false,
        )
        .unwrap();
        assert_eq!(link.read_attributes(false).unwrap().last_modified_time, when);
        assert_eq!(target.read_attributes(true).unwrap().last_modified_time, before);
    }

    #[test]
    fn test_no_follow_open_never_reads_swapped_link() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (dir, fs) = setup();
        let root = dir.path().to_path_buf();
        fs::write(root.join("secret"), b"SECRET").unwrap();
        fs::write(root.join("p"), b"public").unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let swapper = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let _ = fs::remove_file(root.join("link_tmp"));
                    std::os::unix::fs::symlink(root.join("secret"), root.join("link_tmp")).unwrap();
                    fs::rename(root.join("link_tmp"), root.join("p")).unwrap();
                    fs::write(root.join("file_tmp"), b"public").unwrap();
                    fs::rename(root.join("file_tmp"), root.join("p")).unwrap();
                }
            })
        };

        let path = fs.path("p").unwrap();
        let (mut opened, mut refused) = (0, 0);
        for _ in 0..2000 {
            match path.new_byte_channel(&[OpenOption::Read, OpenOption::NoFollowLinks]) {
                Ok(channel) => {
                    let mut buffer = [0u8; 16];
                    let read = channel.read(&mut buffer).unwrap();
                    assert_ne!(&buffer[..read], b"SECRET");
                    channel.close().unwrap();
                    opened += 1;
                }
                Err(ProviderError::SymbolicLinkLoop(_)) => refused += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        stop.store(true, Ordering::Relaxed);
        swapper.join().unwrap();
        assert_eq!(opened + refused, 2000);
    }

    #[test]
    fn test_channel_append_and_delete_on_close() {
        let (dir, fs) = setup();
        let file = fs.path("log").unwrap();
        file.write_all_bytes(b"a").unwrap();
        let channel = file.new_byte_channel(&[OpenOption::Append]).unwrap();
        channel.write(b"bc").unwrap();
        assert_eq!(channel.position().unwrap(), 3);
        channel.close().unwrap();
        assert_eq!(file.read_all_bytes().unwrap(), b"abc");

        let scratch = fs.path("scratch").unwrap();
        let channel = scratch
            .new_byte_channel(&[OpenOption::CreateNew, OpenOption::Write, OpenOption::DeleteOnClose])
            .unwrap();
        channel.write(b"tmp").unwrap();
        assert!(dir.path().join("scratch").exists());
        channel.close().unwrap();
        assert!(!dir.path().join("scratch").exists());
    }

    #[test]
    fn test_copy_and_move_native() {
        let (_dir, fs) = setup();
        let source = fs.path("source").unwrap();
        source.write_all_bytes(b"payload").unwrap();
        source.set_mode(PosixFileMode::from_int(0o600), true).unwrap();
        let copy = fs.path("copy").unwrap();
        let options = CopyOptions {
            copy_attributes: true,
            ..CopyOptions::default()
        };
        fs.copy_native(&source, &copy, &options).unwrap();
        let copied = copy.read_attributes(true).unwrap();
        assert_eq!(copied.mode, Some(PosixFileMode::from_int(0o600)));
        assert_eq!(copied.last_modified_time, source.read_attributes(true).unwrap().last_modified_time);
        assert!(fs
            .copy_native(&source, &copy, &CopyOptions::default())
            .unwrap_err()
            .is_file_already_exists());

        let moved = fs.path("moved").unwrap();
        fs.move_native(&copy, &moved, &CopyOptions::default()).unwrap();
        assert!(!copy.exists(false));
        let mut reader = moved.new_input_stream(true).unwrap();
        let mut contents = String::new();
        reader.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "payload");
    }

    #[test]
    fn test_directory_copy_reports_one_creation() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFileSystem::with_default_directory(
            ByteString::from_bytes(dir.path().as_os_str().as_bytes()),
            &ProviderConfig::default(),
        );
        let fs: Arc<dyn FileSystem> = local.clone();
        let source = fs.path("source").unwrap();
        source.create_directory().unwrap();
        let link = fs.path("link").unwrap();
        link.create_symbolic_link(&ByteString::from("source")).unwrap();

        // No native source installed, so only this backend's own reports arrive
        let service = LocalWatchService::new(local.hub(), &ProviderConfig::default().watch);
        let key = service
            .register(
                &fs.path(".").unwrap(),
                &[WatchEventKind::Create, WatchEventKind::Delete, WatchEventKind::Modify],
            )
            .unwrap();
        let options = CopyOptions {
            copy_attributes: true,
            no_follow_links: true,
            ..CopyOptions::default()
        };
        fs.copy_native(&source, &fs.path("copy").unwrap(), &options).unwrap();
        fs.copy_native(&link, &fs.path("link_copy").unwrap(), &options).unwrap();

        let events = key.poll_events();
        assert_eq!(events.len(), 2, "{:?}", events);
        for (event, name) in events.iter().zip(["copy", "link_copy"]) {
            assert_eq!(event.kind, WatchEventKind::Create);
            assert_eq!(event.count, 1);
            assert_eq!(event.context, Some(fs.path(name).unwrap()));
        }
        service.close().unwrap();
    }

    #[test]
    fn test_own_mutations_reach_watch_service() {
        let (_dir, fs) = setup();
        let directory = fs.path("watched").unwrap();
        directory.create_directory().unwrap();
        let service = fs.new_watch_service().unwrap();
        let key = service.register(&directory, &[WatchEventKind::Create]).unwrap();
        let child = fs.path("watched/new").unwrap();
        child.write_all_bytes(b"1").unwrap();
        let signaled = service.poll_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(signaled, key);
        let events = signaled.poll_events();
        assert_eq!(events[0].kind, WatchEventKind::Create);
        assert_eq!(events[0].context, Some(child));
        service.close().unwrap();
    }
}

//! Subcommands

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use provider_common::attributes::BasicFileAttributes;
use provider_common::watch::PollingWatchService;
use provider_common::{
    ByteStringListPath, CopyOption, CopyOptions, FileSystem, FileSystemPaths, PathObservable, PosixFileMode,
    ProviderConfig, WatchEventKind, WatchService,
};
use provider_linux::LocalFileSystem;
use serde::Serialize;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "byteprovider")]
#[command(about = "File operations through the byte-exact provider kernel")]
pub struct Cli {
    /// Configuration file instead of the per-user provider.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for log files
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show attributes of a file
    Stat {
        path: PathBuf,
        /// Describe a symbolic link itself
        #[arg(long)]
        no_follow: bool,
        #[arg(long)]
        json: bool,
    },
    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Mode, size and name per entry
        #[arg(short, long)]
        long: bool,
    },
    /// Copy a single file, directory entry or link
    Cp {
        source: PathBuf,
        target: PathBuf,
        #[arg(long)]
        replace: bool,
        /// Keep mode and timestamps
        #[arg(short = 'p', long)]
        preserve: bool,
        #[arg(long)]
        no_follow: bool,
    },
    /// Move or rename
    Mv {
        source: PathBuf,
        target: PathBuf,
        #[arg(long)]
        replace: bool,
        /// Fail instead of copying across devices
        #[arg(long)]
        atomic: bool,
    },
    /// Print changes inside a directory until interrupted
    Watch {
        path: PathBuf,
        /// Poll instead of using native notifications
        #[arg(long)]
        poll: bool,
        /// Report any change as an overflow
        #[arg(long)]
        overflow: bool,
        /// Stop after this many events
        #[arg(long)]
        count: Option<u64>,
    },
    /// Print a line whenever a directory changes, at most once per interval
    Observe {
        path: PathBuf,
        /// Interval in milliseconds, configuration default when absent
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many notifications
        #[arg(long, default_value_t = 1)]
        count: u64,
    },
    /// Find entries whose name contains the query, ignoring case
    Search { directory: PathBuf, query: String },
    /// Change permissions, as octal (`644`) or symbolic (`rw-r--r--`)
    Mode { mode: String, path: PathBuf },
}

pub fn run(command: Command, config: &ProviderConfig) -> Result<()> {
    let fs: Arc<dyn FileSystem> = LocalFileSystem::new(config);
    match command {
        Command::Stat { path, no_follow, json } => stat(&resolve(&fs, &path)?, !no_follow, json),
        Command::Ls { path, long } => ls(&resolve(&fs, &path)?, long),
        Command::Cp {
            source,
            target,
            replace,
            preserve,
            no_follow,
        } => {
            let mut options = CopyOptions {
                replace_existing: replace,
                copy_attributes: preserve,
                no_follow_links: no_follow,
                ..CopyOptions::default()
            };
            options = with_progress(options, config);
            let source = resolve(&fs, &source)?;
            let target = resolve(&fs, &target)?;
            source.copy_to(&target, &options.to_options())?;
            println!("{} -> {}", source, target);
            Ok(())
        }
        Command::Mv {
            source,
            target,
            replace,
            atomic,
        } => {
            let mut options = Vec::new();
            if replace {
                options.push(CopyOption::ReplaceExisting);
            }
            if atomic {
                options.push(CopyOption::AtomicMove);
            }
            let source = resolve(&fs, &source)?;
            let target = resolve(&fs, &target)?;
            source.move_to(&target, &options)?;
            println!("{} -> {}", source, target);
            Ok(())
        }
        Command::Watch {
            path,
            poll,
            overflow,
            count,
        } => {
            let mut watch_config = config.watch.clone();
            watch_config.overflow_events |= overflow;
            let service: Box<dyn WatchService> = if poll {
                Box::new(PollingWatchService::new(&watch_config))
            } else {
                fs.new_watch_service()?
            };
            watch(service.as_ref(), &resolve(&fs, &path)?, count)
        }
        Command::Observe {
            path,
            interval_ms,
            count,
        } => {
            let interval = interval_ms.map_or_else(|| config.observe.interval(), Duration::from_millis);
            observe(&resolve(&fs, &path)?, interval, count)
        }
        Command::Search { directory, query } => {
            let directory = resolve(&fs, &directory)?;
            directory.search(&query, config.search.interval(), |found| {
                for path in found {
                    println!("{}", path);
                }
            })?;
            Ok(())
        }
        Command::Mode { mode, path } => {
            let mode = parse_mode(&mode)?;
            let path = resolve(&fs, &path)?;
            path.set_mode(mode, true)?;
            println!("{} {}", mode.to_mode_string(), path);
            Ok(())
        }
    }
}

fn resolve(fs: &Arc<dyn FileSystem>, path: &Path) -> Result<ByteStringListPath> {
    fs.path_bytes(path.as_os_str().as_bytes())
        .with_context(|| format!("Invalid path {}", path.display()))
}

fn parse_mode(value: &str) -> Result<PosixFileMode> {
    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        let mode = u32::from_str_radix(value, 8).with_context(|| format!("Invalid octal mode {}", value))?;
        if mode > 0o7777 {
            bail!("Mode {} has bits outside 07777", value);
        }
        return Ok(PosixFileMode::from_int(mode));
    }
    Ok(PosixFileMode::parse_mode_string(value)?)
}

fn with_progress(options: CopyOptions, config: &ProviderConfig) -> CopyOptions {
    let total = Arc::new(AtomicU64::new(0));
    options.with_progress(config.copy.progress_interval(), move |bytes| {
        let copied = total.fetch_add(bytes, Ordering::Relaxed) + bytes;
        tracing::info!(copied, "Copy progress");
    })
}

#[derive(Serialize)]
struct StatOutput {
    path: String,
    file_type: char,
    size: u64,
    mode: Option<String>,
    owner: Option<u32>,
    group: Option<u32>,
    modified: String,
    inode: Option<u64>,
    mime_type: String,
}

fn stat(path: &ByteStringListPath, follow_links: bool, json: bool) -> Result<()> {
    let attributes = path.read_attributes(follow_links)?;
    let output = StatOutput {
        path: path.to_string(),
        file_type: attributes.file_type().type_char(),
        size: attributes.size(),
        mode: attributes.mode().map(|mode| mode.to_ls_string(attributes.file_type())),
        owner: attributes.owner().map(|owner| owner.id),
        group: attributes.group().map(|group| group.id),
        modified: DateTime::<Local>::from(attributes.last_modified_time()).to_rfc3339(),
        inode: attributes.file_key().map(|key| key.inode),
        mime_type: provider_common::mime::resolve_mime_type(path, &attributes),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    println!("  Path: {}", output.path);
    println!("  Type: {}  Size: {}", output.mime_type, output.size);
    if let Some(mode) = &output.mode {
        println!("  Mode: {}", mode);
    }
    if let (Some(owner), Some(group)) = (output.owner, output.group) {
        println!(" Owner: {}:{}", owner, group);
    }
    println!("Modify: {}", output.modified);
    Ok(())
}

fn ls(path: &ByteStringListPath, long: bool) -> Result<()> {
    for child in path.list()? {
        let name = child
            .file_name_bytes()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if !long {
            println!("{}", name);
            continue;
        }
        match child.read_attributes(false) {
            Ok(attributes) => {
                let mode = attributes
                    .mode()
                    .map(|mode| mode.to_ls_string(attributes.file_type()))
                    .unwrap_or_else(|| "?".repeat(10));
                println!("{} {:>12} {}", mode, attributes.size(), name);
            }
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", child, e);
                println!("{} {:>12} {}", "?".repeat(10), "?", name);
            }
        }
    }
    Ok(())
}

fn watch(service: &dyn WatchService, path: &ByteStringListPath, count: Option<u64>) -> Result<()> {
    service.register(
        path,
        &[WatchEventKind::Create, WatchEventKind::Delete, WatchEventKind::Modify],
    )?;
    tracing::info!("Watching {}", path);
    let mut seen = 0u64;
    loop {
        let key = service.take()?;
        for event in key.poll_events() {
            let context = event.context.map(|path| path.to_string()).unwrap_or_default();
            println!("{:?}\t{}\t{}", event.kind, event.count, context);
            seen += 1;
        }
        if count.map_or(false, |count| seen >= count) {
            break;
        }
        if !key.reset() {
            tracing::info!("{} is no longer watchable", path);
            break;
        }
    }
    service.close()?;
    Ok(())
}

fn observe(path: &ByteStringListPath, interval: Duration, count: u64) -> Result<()> {
    let observable = path.observe(interval)?;
    let (sender, receiver) = std::sync::mpsc::channel();
    observable.add_observer(Arc::new(move || {
        let _ = sender.send(());
    }))?;
    for _ in 0..count {
        receiver.recv().context("Observer stopped")?;
        println!("{} changed at {}", path, Local::now().to_rfc3339());
    }
    observable.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("644").unwrap(), PosixFileMode::from_int(0o644));
        assert_eq!(parse_mode("rwxr-x---").unwrap(), PosixFileMode::from_int(0o750));
        assert!(parse_mode("17777").is_err());
        assert!(parse_mode("rwz").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["byteprovider", "-v", "cp", "-p", "a", "b"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Cp { preserve: true, replace: false, .. }));
        let cli = Cli::try_parse_from(["byteprovider", "watch", "--poll", "--count", "3", "dir"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { poll: true, count: Some(3), .. }));
    }
}

//! Host file system provider for Linux
//!
//! - [`LocalFileSystem`]: byte-exact paths over `std::fs`
//! - [`NativeWatcher`]: inotify events through `notify`
//! - Positional channel I/O with read-ahead

mod channel;
mod error;
mod file_system;
mod watcher;

pub use channel::FileBackend;
pub use error::{map_io, LinuxProviderError};
pub use file_system::{LocalFileSystem, SCHEME};
pub use watcher::NativeWatcher;

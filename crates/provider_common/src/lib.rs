//! Portable virtual file system kernel
//!
//! Everything a file system provider needs that does not depend on the
//! backing store:
//! - Byte string paths that survive non-UTF-8 names
//! - POSIX attributes, file modes and access checks
//! - Seekable byte channels with a prefetching read window
//! - Watch services, both pushed and polling
//! - Copy and move across providers with progress and cancellation
//! - Throttled directory observers and file name search
//!
//! [`memory::MemoryFileSystem`] is a complete in-memory provider built on
//! these pieces.

pub mod attributes;
pub mod byte_string;
pub mod cache;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod copy_move;
pub mod error;
pub mod file_system;
pub mod memory;
pub mod mime;
pub mod mode;
pub mod observable;
pub mod options;
pub mod path;
pub mod search;
pub mod uri;
pub mod watch;

pub use attributes::{BasicFileAttributes, FileKey, FileTimes, PosixFileAttributes};
pub use byte_string::{ByteString, ByteStringBuilder};
pub use cache::FileSystemCache;
pub use cancel::CancellationToken;
pub use channel::{ChannelReader, ChannelWriter, SeekableByteChannel};
pub use config::ProviderConfig;
pub use error::{ProviderError, Result};
pub use file_system::{FileSystem, FileSystemId};
pub use mode::{PosixFileMode, PosixFileModeBit, PosixFileType};
pub use observable::{PathObservable, WatchServicePathObservable};
pub use options::{AccessMode, CopyOption, CopyOptions, LinkOption, OpenOption, OpenOptions};
pub use path::{ByteStringListPath, FileSystemPaths};
pub use uri::UriAuthority;
pub use watch::{WatchEvent, WatchEventKind, WatchEventKinds, WatchKey, WatchService};

//! Seekable byte channels with read-ahead
//!
//! - [`SeekableByteChannel`]: the channel API handed to callers
//! - [`ChannelBackend`]: what a storage backend implements
//! - [`FileByteChannel`]: buffered channel over a backend, prefetching the
//!   next window in the background while the current one is consumed
//!
//! One lock serializes I/O and a second one guards the open state, so
//! `is_open` never waits behind a slow read.

mod delete_on_close;
mod read_task;
mod stream;

pub use delete_on_close::DeleteOnCloseChannel;
pub use read_task::ReadTask;
pub use stream::{ChannelReader, ChannelWriter};

use crate::cancel::CancellationToken;
use crate::error::{ProviderError, Result};
use crate::options::OpenOptions;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Read window, and upper bound of a single fetch
pub const DEFAULT_WINDOW_SIZE: usize = 1024 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

pub trait SeekableByteChannel: Send + Sync {
    /// Read into `dst`; `Ok(0)` with a non-empty `dst` means end of stream
    fn read(&self, dst: &mut [u8]) -> Result<usize>;
    fn write(&self, src: &[u8]) -> Result<usize>;
    fn position(&self) -> Result<u64>;
    fn set_position(&self, position: u64) -> Result<()>;
    fn size(&self) -> Result<u64>;
    fn truncate(&self, size: u64) -> Result<()>;
    fn force(&self, metadata: bool) -> Result<()>;
    fn is_open(&self) -> bool;
    /// Idempotent
    fn close(&self) -> Result<()>;
}

impl<T: SeekableByteChannel + ?Sized> SeekableByteChannel for Box<T> {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        (**self).read(dst)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        (**self).write(src)
    }

    fn position(&self) -> Result<u64> {
        (**self).position()
    }

    fn set_position(&self, position: u64) -> Result<()> {
        (**self).set_position(position)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn truncate(&self, size: u64) -> Result<()> {
        (**self).truncate(size)
    }

    fn force(&self, metadata: bool) -> Result<()> {
        (**self).force(metadata)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// Positional I/O primitives a storage backend provides
pub trait ChannelBackend: Send + Sync + 'static {
    /// Read up to `size` bytes at `position`; fewer only at end of file
    ///
    /// Long reads should poll `cancel` and give up once it is set.
    fn read_at(&self, position: u64, size: usize, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Write all of `src` at `position`
    fn write_at(&self, position: u64, src: &[u8]) -> Result<()>;

    fn append(&self, src: &[u8]) -> Result<()> {
        let position = self.size()?;
        self.write_at(position, src)
    }

    fn truncate(&self, size: u64) -> Result<()>;

    fn size(&self) -> Result<u64>;

    fn force(&self, _metadata: bool) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Start a fetch in the background
    fn read_async(self: Arc<Self>, position: u64, size: usize) -> Result<ReadTask>
    where
        Self: Sized,
    {
        ReadTask::spawn(move |cancel| self.read_at(position, size, cancel))
    }
}

/// How a [`FileByteChannel`] fetches and abandons read-ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    pub window_size: usize,
    pub timeout: Duration,
    /// Signal an abandoned prefetch to stop
    pub cancel_pending_read: bool,
    /// Block until a cancelled prefetch has stopped
    pub join_cancelled_read: bool,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout: DEFAULT_READ_TIMEOUT,
            cancel_pending_read: true,
            join_cancelled_read: false,
        }
    }
}

/// Most recent contiguous fetch plus the prefetch of the window after it
///
/// `data[cursor..]` is unread; `buffered_position` is the file offset just
/// past `data`, which is where the next fetch starts.
struct ReadBuffer {
    data: Vec<u8>,
    cursor: usize,
    buffered_position: u64,
    pending: Option<ReadTask>,
}

impl ReadBuffer {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
            buffered_position: 0,
            pending: None,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    fn read<B: ChannelBackend>(&mut self, dst: &mut [u8], backend: &Arc<B>, policy: &ReadPolicy) -> Result<usize> {
        if self.remaining() == 0 {
            self.fill(backend, policy)?;
            if self.remaining() == 0 {
                return Ok(0);
            }
        }
        let length = dst.len().min(self.remaining());
        dst[..length].copy_from_slice(&self.data[self.cursor..self.cursor + length]);
        self.cursor += length;
        Ok(length)
    }

    fn fill<B: ChannelBackend>(&mut self, backend: &Arc<B>, policy: &ReadPolicy) -> Result<()> {
        let task = match self.pending.take() {
            Some(task) => task,
            None => backend.clone().read_async(self.buffered_position, policy.window_size)?,
        };
        let data = task.wait(policy.timeout)?;
        self.data = data;
        self.cursor = 0;
        if self.data.is_empty() {
            return Ok(());
        }
        self.buffered_position += self.data.len() as u64;
        self.pending = Some(backend.clone().read_async(self.buffered_position, policy.window_size)?);
        Ok(())
    }

    /// Move the cursor, keeping the window when the target is inside it
    fn reposition(&mut self, old_position: u64, new_position: u64, policy: &ReadPolicy) {
        if old_position == new_position {
            return;
        }
        let new_cursor = self.cursor as i128 + (new_position as i128 - old_position as i128);
        if (0..=self.data.len() as i128).contains(&new_cursor) {
            self.cursor = new_cursor as usize;
        } else {
            self.discard(policy);
            self.buffered_position = new_position;
        }
    }

    fn discard(&mut self, policy: &ReadPolicy) {
        self.cancel_pending(policy);
        self.data.clear();
        self.cursor = 0;
    }

    fn cancel_pending(&mut self, policy: &ReadPolicy) {
        if let Some(task) = self.pending.take() {
            if policy.cancel_pending_read {
                task.cancel(policy.join_cancelled_read);
            }
        }
    }
}

struct ChannelState {
    position: u64,
    buffer: ReadBuffer,
}

/// Buffered seekable channel over a [`ChannelBackend`]
pub struct FileByteChannel<B: ChannelBackend> {
    backend: Arc<B>,
    readable: bool,
    writable: bool,
    append: bool,
    policy: ReadPolicy,
    io: Mutex<ChannelState>,
    open: Mutex<bool>,
}

impl<B: ChannelBackend> FileByteChannel<B> {
    pub fn new(backend: B, options: &OpenOptions, policy: ReadPolicy) -> Self {
        Self::with_backend(Arc::new(backend), options, policy)
    }

    pub fn with_backend(backend: Arc<B>, options: &OpenOptions, policy: ReadPolicy) -> Self {
        Self {
            backend,
            readable: options.read && !options.append,
            writable: options.write || options.append,
            append: options.append,
            policy,
            io: Mutex::new(ChannelState {
                position: 0,
                buffer: ReadBuffer::new(),
            }),
            open: Mutex::new(true),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.open.lock() {
            Ok(())
        } else {
            Err(ProviderError::ClosedChannel)
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(ProviderError::NonWritableChannel)
        }
    }
}

impl<B: ChannelBackend> SeekableByteChannel for FileByteChannel<B> {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if !self.readable {
            return Err(ProviderError::NonReadableChannel);
        }
        if dst.is_empty() {
            return Ok(0);
        }
        let mut state = self.io.lock();
        let read = state.buffer.read(dst, &self.backend, &self.policy)?;
        state.position += read as u64;
        Ok(read)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.ensure_writable()?;
        if src.is_empty() {
            return Ok(0);
        }
        let mut state = self.io.lock();
        if self.append {
            self.backend.append(src)?;
            state.position = self.backend.size()?;
        } else {
            let position = state.position;
            self.backend.write_at(position, src)?;
            let new_position = position + src.len() as u64;
            // Written bytes may overlap the window
            state.buffer.discard(&self.policy);
            state.buffer.buffered_position = new_position;
            state.position = new_position;
        }
        Ok(src.len())
    }

    fn position(&self) -> Result<u64> {
        self.ensure_open()?;
        let mut state = self.io.lock();
        if self.append {
            state.position = self.backend.size()?;
        }
        Ok(state.position)
    }

    fn set_position(&self, position: u64) -> Result<()> {
        self.ensure_open()?;
        if self.append {
            return Ok(());
        }
        let mut state = self.io.lock();
        let old_position = state.position;
        state.buffer.reposition(old_position, position, &self.policy);
        state.position = position;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        self.ensure_open()?;
        self.backend.size()
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        let mut state = self.io.lock();
        let current_size = self.backend.size()?;
        if size >= current_size {
            return Ok(());
        }
        self.backend.truncate(size)?;
        let position = state.position.min(size);
        state.buffer.discard(&self.policy);
        state.buffer.buffered_position = position;
        state.position = position;
        Ok(())
    }

    fn force(&self, metadata: bool) -> Result<()> {
        self.ensure_open()?;
        let _state = self.io.lock();
        self.backend.force(metadata)
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }

    fn close(&self) -> Result<()> {
        let mut open = self.open.lock();
        if !*open {
            return Ok(());
        }
        *open = false;
        let mut state = self.io.lock();
        state.buffer.discard(&self.policy);
        self.backend.close()
    }
}

impl<B: ChannelBackend> Drop for FileByteChannel<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close channel on drop: {}", e);
        }
    }
}

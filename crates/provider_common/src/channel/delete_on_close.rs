use super::SeekableByteChannel;
use crate::error::Result;
use crate::path::ByteStringListPath;

/// Deletes its file once the wrapped channel is closed
pub struct DeleteOnCloseChannel {
    inner: Box<dyn SeekableByteChannel>,
    path: ByteStringListPath,
}

impl DeleteOnCloseChannel {
    pub fn new(inner: Box<dyn SeekableByteChannel>, path: ByteStringListPath) -> Self {
        Self { inner, path }
    }
}

impl SeekableByteChannel for DeleteOnCloseChannel {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.inner.read(dst)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        self.inner.write(src)
    }

    fn position(&self) -> Result<u64> {
        self.inner.position()
    }

    fn set_position(&self, position: u64) -> Result<()> {
        self.inner.set_position(position)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.inner.truncate(size)
    }

    fn force(&self, metadata: bool) -> Result<()> {
        self.inner.force(metadata)
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> Result<()> {
        if !self.inner.is_open() {
            return Ok(());
        }
        let closed = self.inner.close();
        match self.path.delete_if_exists() {
            Ok(_) => closed,
            Err(e) => match closed {
                Ok(()) => Err(e),
                Err(close_error) => Err(close_error.with_suppressed(e)),
            },
        }
    }
}

impl Drop for DeleteOnCloseChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to delete {} on close: {}", self.path, e);
        }
    }
}

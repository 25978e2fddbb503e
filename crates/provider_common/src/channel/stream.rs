//! `std::io` adapters over channels

use super::SeekableByteChannel;
use crate::error::Result;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Input stream over a channel; closes the channel when dropped
pub struct ChannelReader {
    channel: Box<dyn SeekableByteChannel>,
}

impl ChannelReader {
    pub fn new(channel: Box<dyn SeekableByteChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &dyn SeekableByteChannel {
        self.channel.as_ref()
    }

    pub fn close(self) -> Result<()> {
        self.channel.close()
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.channel.read(buf)?)
    }
}

impl Seek for ChannelReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.channel.position()?.checked_add_signed(delta),
            SeekFrom::End(delta) => self.channel.size()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.channel.set_position(target)?;
        Ok(target)
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        if let Err(e) = self.channel.close() {
            tracing::warn!("Failed to close input stream: {}", e);
        }
    }
}

/// Output stream over a channel; closes the channel when dropped
pub struct ChannelWriter {
    channel: Box<dyn SeekableByteChannel>,
}

impl ChannelWriter {
    pub fn new(channel: Box<dyn SeekableByteChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &dyn SeekableByteChannel {
        self.channel.as_ref()
    }

    /// Close explicitly to observe errors that dropping would only log
    pub fn close(self) -> Result<()> {
        self.channel.close()
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.channel.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        if let Err(e) = self.channel.close() {
            tracing::warn!("Failed to close output stream: {}", e);
        }
    }
}

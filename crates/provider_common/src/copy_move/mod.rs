//! Copy and move between paths
//!
//! Paths on the same file system go to its native implementation; anything
//! else is streamed through [`foreign`].

pub mod foreign;

use crate::error::Result;
use crate::options::{CopyOption, CopyOptions};
use crate::path::ByteStringListPath;
use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

/// Buffer used for streaming copies
pub const BUFFER_SIZE: usize = 8192;

pub fn copy(source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
    if source.same_file_system(target) {
        source.file_system().copy_native(source, target, options)
    } else {
        foreign::copy(source, target, options)
    }
}

pub fn move_path(source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
    if source.same_file_system(target) {
        source.file_system().move_native(source, target, options)
    } else {
        foreign::move_path(source, target, options)
    }
}

impl ByteStringListPath {
    pub fn copy_to(&self, target: &ByteStringListPath, options: &[CopyOption]) -> Result<()> {
        copy(self, target, &CopyOptions::from_options(options))
    }

    pub fn move_to(&self, target: &ByteStringListPath, options: &[CopyOption]) -> Result<()> {
        move_path(self, target, &CopyOptions::from_options(options))
    }
}

/// Stream `input` into `output`, reporting bytes copied since the last report
///
/// Reports come at most once per `options.progress_interval`, plus one final
/// report once the input is exhausted. Checks for cancellation between chunks.
pub fn copy_stream(input: &mut impl Read, output: &mut impl Write, options: &CopyOptions) -> Result<u64> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut last_report = Instant::now();
    let mut unreported = 0u64;
    let mut total = 0u64;
    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        output.write_all(&buffer[..read])?;
        unreported += read as u64;
        total += read as u64;
        options.check_cancelled()?;
        if last_report.elapsed() >= options.progress_interval {
            options.report_progress(unreported);
            last_report = Instant::now();
            unreported = 0;
        }
    }
    output.flush()?;
    options.report_progress(unreported);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::error::ProviderError;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_copy_stream_reports_deltas() {
        let data = vec![7u8; BUFFER_SIZE * 5 + 3];
        let reports = Arc::new(Mutex::new(Vec::new()));
        let recorded = reports.clone();
        let options = CopyOptions::default().with_progress(Duration::ZERO, move |bytes| recorded.lock().push(bytes));
        let mut output = Vec::new();
        let total = copy_stream(&mut Cursor::new(&data), &mut output, &options).unwrap();
        assert_eq!(total, data.len() as u64);
        assert_eq!(output, data);
        let reports = reports.lock();
        assert_eq!(reports.iter().sum::<u64>(), data.len() as u64);
        assert_eq!(reports.len(), 7);
        assert_eq!(*reports.last().unwrap(), 0);
    }

    #[test]
    fn test_copy_stream_throttles() {
        let data = vec![1u8; BUFFER_SIZE * 4];
        let reports = Arc::new(Mutex::new(Vec::new()));
        let recorded = reports.clone();
        let options = CopyOptions::default()
            .with_progress(Duration::from_secs(3600), move |bytes| recorded.lock().push(bytes));
        copy_stream(&mut Cursor::new(&data), &mut Vec::new(), &options).unwrap();
        assert_eq!(*reports.lock(), vec![data.len() as u64]);
    }

    #[test]
    fn test_copy_stream_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let options = CopyOptions::default().with_cancellation(token);
        let result = copy_stream(&mut Cursor::new(vec![0u8; 10]), &mut Vec::new(), &options);
        assert!(matches!(result, Err(ProviderError::Interrupted(_))));
    }
}

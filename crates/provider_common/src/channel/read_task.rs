//! Background fetch handle used for read-ahead

use crate::cancel::CancellationToken;
use crate::error::{ProviderError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

static NEXT_READER_ID: AtomicUsize = AtomicUsize::new(0);

/// A fetch running on its own thread
///
/// The result is collected once with [`wait`](Self::wait), or the fetch is
/// abandoned with [`cancel`](Self::cancel).
pub struct ReadTask {
    receiver: Receiver<Result<Vec<u8>>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ReadTask {
    pub fn spawn<F>(fetch: F) -> Result<Self>
    where
        F: FnOnce(&CancellationToken) -> Result<Vec<u8>> + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = thread::Builder::new()
            .name(format!(
                "channel-read-{}",
                NEXT_READER_ID.fetch_add(1, Ordering::Relaxed)
            ))
            .spawn(move || {
                let result = fetch(&task_token);
                // The receiver is gone when the task was cancelled without joining
                let _ = sender.send(result);
            })?;
        Ok(Self {
            receiver,
            token,
            handle: Some(handle),
        })
    }

    /// Task that already holds its result, for backends that fetch synchronously
    pub fn completed(result: Result<Vec<u8>>) -> Self {
        let (sender, receiver) = bounded(1);
        let _ = sender.send(result);
        Self {
            receiver,
            token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Block until the fetch finishes or `timeout` elapses
    ///
    /// A timed-out fetch is cancelled and reported as `Interrupted`; backend
    /// failures are returned unchanged.
    pub fn wait(mut self, timeout: Duration) -> Result<Vec<u8>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                if self.token.is_cancelled() && result.is_err() {
                    return Err(ProviderError::interrupted("read cancelled"));
                }
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                self.token.cancel();
                Err(ProviderError::interrupted(format!(
                    "read timed out after {:?}",
                    timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Err(ProviderError::interrupted("read task ended without a result"))
            }
        }
    }

    /// Request cancellation, optionally blocking until the fetch acknowledges it
    pub fn cancel(mut self, join: bool) {
        self.token.cancel();
        if join {
            self.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Channel read task panicked");
            }
        }
    }
}

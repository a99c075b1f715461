//! The single cancellation primitive shared by every flow of a session.
//!
//! Readable synchronously from the input-capture thread and awaitable from
//! async tasks. Cancelling is idempotent.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct CancellationSignal {
    inner: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            inner: Arc::new(sender),
        }
    }

    /// Request cancellation. Returns `true` only for the call that flipped the signal.
    pub fn cancel(&self) -> bool {
        let previous = self.inner.send_replace(true);
        if !previous {
            log::debug!("Cancellation requested");
        }
        !previous
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.borrow()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut receiver = self.inner.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

use tokio::sync::mpsc;

/// Producer half of the captured-input queue, owned by the input-capture thread
#[derive(Debug, Clone)]
pub struct InputSender {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

/// Returned when the consumer half has been dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl InputSender {
    /// Append a chunk. Callable from any thread without blocking.
    pub fn push(&self, chunk: Vec<u8>) -> Result<(), QueueClosed> {
        self.sender.send(chunk).map_err(|_| QueueClosed)
    }
}

/// Consumer half of the captured-input queue, drained by the send path
#[derive(Debug)]
pub struct InputQueue {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Create a connected sender/queue pair
pub fn input_queue() -> (InputSender, InputQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (InputSender { sender }, InputQueue { receiver })
}

impl InputQueue {
    /// Wait for input, then drain everything queued behind it into one batch.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    pub async fn next_batch(&mut self) -> Option<Vec<u8>> {
        let mut batch = self.receiver.recv().await?;
        self.drain_into(&mut batch);
        Some(batch)
    }

    #[cfg(test)]
    pub(crate) fn drain(&mut self) -> Vec<u8> {
        let mut batch = Vec::new();
        self.drain_into(&mut batch);
        batch
    }

    fn drain_into(&mut self, batch: &mut Vec<u8>) {
        while let Ok(chunk) = self.receiver.try_recv() {
            batch.extend_from_slice(&chunk);
        }
    }
}

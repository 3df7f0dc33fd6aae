//! Bounded FIFO hand-off from the transport thread to the tick loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

/// Creates a connected producer/consumer pair holding at most `capacity`
/// payloads.
pub fn message_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (sender, receiver) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        QueueProducer {
            sender,
            dropped: Arc::clone(&dropped),
        },
        QueueConsumer { receiver, dropped },
    )
}

#[derive(Debug, Clone)]
pub struct QueueProducer {
    sender: Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl QueueProducer {
    /// Enqueues without blocking. A full queue drops `payload`; returns
    /// whether it was accepted.
    pub fn push(&self, payload: String) -> bool {
        match self.sender.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(payload)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    target: "traffic_bridge::transport",
                    payload_len = payload.len(),
                    dropped,
                    "queue.full_dropped"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[derive(Debug)]
pub struct QueueConsumer {
    receiver: Receiver<String>,
    dropped: Arc<AtomicU64>,
}

impl QueueConsumer {
    /// Removes everything queued at the time of the call, oldest first.
    /// Payloads pushed while draining wait for the next call.
    pub fn drain(&self) -> Vec<String> {
        let pending = self.receiver.len();
        let mut payloads = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.receiver.try_recv() {
                Ok(payload) => payloads.push(payload),
                Err(_) => break,
            }
        }
        payloads
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Payloads rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

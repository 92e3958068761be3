//! Outbound message queue
//!
//! Any number of producers, exactly one consumer (the sender loop). Both
//! halves wrap a Tokio mpsc channel, bounded or not depending on
//! [`QueueCapacity`].

use crate::config::QueueCapacity;
use tokio::sync::mpsc;

/// Why a message could not be queued; the message is handed back
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueueError {
    /// Bounded queue had no room
    Full(String),
    /// Consumer is gone
    Closed(String),
}

/// Producer half
#[derive(Debug, Clone)]
pub(crate) enum OutboundSender {
    Bounded(mpsc::Sender<String>),
    Unbounded(mpsc::UnboundedSender<String>),
}

/// Consumer half
#[derive(Debug)]
pub(crate) enum OutboundReceiver {
    Bounded(mpsc::Receiver<String>),
    Unbounded(mpsc::UnboundedReceiver<String>),
}

/// Create a queue with the given capacity
///
/// `Bounded(0)` is rejected by config validation before it gets here.
pub(crate) fn outbound_queue(capacity: QueueCapacity) -> (OutboundSender, OutboundReceiver) {
    match capacity {
        QueueCapacity::Bounded(size) => {
            let (tx, rx) = mpsc::channel(size.max(1));
            (OutboundSender::Bounded(tx), OutboundReceiver::Bounded(rx))
        }
        QueueCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (OutboundSender::Unbounded(tx), OutboundReceiver::Unbounded(rx))
        }
    }
}

impl OutboundSender {
    /// Queue a message, waiting for room if the queue is bounded and full
    pub async fn send(&self, message: String) -> Result<(), QueueError> {
        match self {
            Self::Bounded(tx) => tx.send(message).await.map_err(|e| QueueError::Closed(e.0)),
            Self::Unbounded(tx) => tx.send(message).map_err(|e| QueueError::Closed(e.0)),
        }
    }

    /// Queue a message without waiting
    pub fn try_send(&self, message: String) -> Result<(), QueueError> {
        match self {
            Self::Bounded(tx) => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(m) => QueueError::Full(m),
                mpsc::error::TrySendError::Closed(m) => QueueError::Closed(m),
            }),
            Self::Unbounded(tx) => tx.send(message).map_err(|e| QueueError::Closed(e.0)),
        }
    }
}

impl OutboundReceiver {
    /// Next message in FIFO order; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<String> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

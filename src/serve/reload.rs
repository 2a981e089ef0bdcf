//! Live-reload fan-out.
//!
//! Subscribers are message-passing endpoints with a single-slot inbox.
//! Publishing offers the event to every inbox without blocking: a full
//! inbox drops the event for that subscriber (a pending reload already
//! covers it), a closed inbox drops the subscriber.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// The hub owning all live-reload subscriber inboxes.
#[derive(Debug, Default)]
pub struct ReloadHub {
    subscribers: Mutex<Vec<mpsc::Sender<()>>>,
}

impl ReloadHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand back its single-slot inbox.
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publish one reload event to every live subscriber, never blocking
    /// the caller (the filesystem watcher).
    pub fn notify(&self) {
        self.subscribers.lock().retain(|tx| {
            match tx.try_send(()) {
                Ok(()) => true,
                // Inbox full: a reload is already pending for this client.
                Err(mpsc::error::TrySendError::Full(())) => true,
                // Client disconnected.
                Err(mpsc::error::TrySendError::Closed(())) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

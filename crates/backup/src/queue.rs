//! The unbounded queue between folder watchers and the dispatcher.
//!
//! Watchers only ever push; the dispatcher is the single consumer and may push
//! an event back onto the tail when the file is still locked.

use crate::change::ChangeEvent;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Producer half, cheap to clone into every watcher callback.
#[derive(Clone, Debug)]
pub struct ChangeSender {
    inner: UnboundedSender<ChangeEvent>,
}
impl ChangeSender {
    /// Enqueue an event. Returns `false` once the dispatcher has gone away.
    pub fn push(&self, event: ChangeEvent) -> bool {
        match self.inner.send(event) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(path = %err.0.file.path.display(), "Dropping change, dispatcher has stopped");
                false
            },
        }
    }
}

/// Consumer half, owned by the dispatcher.
#[derive(Debug)]
pub struct ChangeReceiver {
    inner: UnboundedReceiver<ChangeEvent>,
    // Kept so requeueing works even after every watcher is dropped.
    requeue: UnboundedSender<ChangeEvent>,
}
impl ChangeReceiver {
    /// Take the oldest event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        match self.inner.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Put an event back at the tail of the queue.
    pub fn requeue(&self, event: ChangeEvent) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.requeue.send(event);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub fn channel() -> (ChangeSender, ChangeReceiver) {
    let (tx, rx) = unbounded_channel();
    (ChangeSender { inner: tx.clone() }, ChangeReceiver { inner: rx, requeue: tx })
}

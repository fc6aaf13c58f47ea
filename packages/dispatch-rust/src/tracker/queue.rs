//! Bounded hand-off from tracker listeners to an async consumer.
//!
//! Listeners run under the tracker lock, so slow consumers (displays, network
//! forwarders) should subscribe through [`event_queue`] instead. The listener side
//! never blocks: when the buffer is full the oldest event is dropped and counted.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_core::ProgressEvent;
use tokio::sync::Notify;

use super::listener::OperationListener;

struct QueueInner {
    events: VecDeque<ProgressEvent>,
    dropped: u64,
    closed: bool,
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

/// Creates a queue holding at most `capacity` undelivered events.
///
/// Register the [`QueueListener`] with the tracker and consume from the
/// [`EventReceiver`]. A capacity of zero is treated as one.
#[must_use]
pub fn event_queue(capacity: usize) -> (QueueListener, EventReceiver) {
    let shared = Arc::new(QueueShared {
        inner: Mutex::new(QueueInner {
            events: VecDeque::new(),
            dropped: 0,
            closed: false,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });
    (
        QueueListener {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

/// Listener half of an [`event_queue`]. Dropping it closes the queue.
pub struct QueueListener {
    shared: Arc<QueueShared>,
}

impl OperationListener for QueueListener {
    fn on_event(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.events.len() >= self.shared.capacity {
                inner.events.pop_front();
                inner.dropped += 1;
            }
            inner.events.push_back(event.clone());
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}

impl Drop for QueueListener {
    fn drop(&mut self) {
        self.shared.inner.lock().closed = true;
        self.shared.notify.notify_one();
    }
}

/// Consumer half of an [`event_queue`].
pub struct EventReceiver {
    shared: Arc<QueueShared>,
}

impl EventReceiver {
    /// Waits for the next event.
    ///
    /// Returns `None` once the listener half has been dropped and the buffer is drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let mut inner = self.shared.inner.lock();
                if let Some(event) = inner.events.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Takes the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.shared.inner.lock().events.pop_front()
    }

    /// Events discarded because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.inner.lock().dropped
    }

    /// Events buffered and not yet received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.inner.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

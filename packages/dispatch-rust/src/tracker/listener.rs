//! Listener trait and the isolated fan-out set used by the tracker.
//!
//! Defines [`OperationListener`] for reacting to operation transitions and
//! [`ListenerSet`], which notifies every registered listener in registration
//! order while containing each listener's failures.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use switchyard_core::ProgressEvent;

/// Handle returned by `add_listener`, used to remove the listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Observer of operation transitions.
///
/// Called synchronously while the tracker's lock is held, so implementations
/// must not call back into the tracker and should return quickly. Slow
/// consumers belong behind [`event_queue`](super::queue::event_queue).
///
/// Used as `Arc<dyn OperationListener>`.
pub trait OperationListener: Send + Sync {
    /// Called once per transition, after the transition has been applied.
    ///
    /// # Errors
    ///
    /// An error is logged by the tracker and otherwise ignored.
    fn on_event(&self, event: &ProgressEvent) -> anyhow::Result<()>;
}

impl<F> OperationListener for F
where
    F: Fn(&ProgressEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Ordered set of listeners with per-listener failure isolation.
///
/// A listener that returns an error or panics is logged and skipped; the
/// remaining listeners still receive the event.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<(ListenerId, Arc<dyn OperationListener>)>,
    next_id: u64,
}

impl ListenerSet {
    /// Adds a listener and returns its handle.
    pub fn add(&mut self, listener: Arc<dyn OperationListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` to every listener, containing errors and panics.
    pub fn notify(&self, event: &ProgressEvent) {
        for (id, listener) in &self.listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        listener = id.0,
                        operation_id = event.operation_id(),
                        error = %err,
                        "progress listener failed"
                    );
                }
                Err(payload) => {
                    tracing::warn!(
                        listener = id.0,
                        operation_id = event.operation_id(),
                        panic = %panic_message(payload.as_ref()),
                        "progress listener panicked"
                    );
                }
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

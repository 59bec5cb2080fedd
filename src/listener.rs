use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Token issued at registration; the only way to unregister a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerHandle(u64);

/// Returned by a listener that can no longer receive events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("listener is gone")]
pub struct ListenerGone;

type Callback<T> = Box<dyn FnMut(&T) -> Result<(), ListenerGone> + Send>;

/// Ordered set of listeners for one event type. A listener whose callback
/// fails is dropped on the spot.
pub struct ListenerRegistry<T> {
    listeners: Vec<(ListenerHandle, Callback<T>)>,
    next_handle: u64,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_handle: 1,
        }
    }

    pub fn register<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&T) -> Result<(), ListenerGone> + Send + 'static,
    {
        let handle = ListenerHandle(self.next_handle);
        self.next_handle += 1;
        self.listeners.push((handle, Box::new(callback)));
        handle
    }

    pub fn unregister(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| *h != handle);
        self.listeners.len() != before
    }

    /// Deliver one event to every listener, pruning the dead ones.
    pub fn notify(&mut self, event: &T) {
        self.listeners.retain_mut(|(handle, callback)| match callback(event) {
            Ok(()) => true,
            Err(ListenerGone) => {
                debug!(handle = handle.0, "pruning dead listener");
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T: Clone + Send + 'static> ListenerRegistry<T> {
    /// Register a channel; the listener is pruned once the receiver is dropped.
    pub fn register_channel(&mut self, tx: mpsc::UnboundedSender<T>) -> ListenerHandle {
        self.register(move |event: &T| tx.send(event.clone()).map_err(|_| ListenerGone))
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Registration<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

struct Inner<T> {
    next_id: u64,
    current: Option<Registration<T>>,
}

/// A single-subscriber notification slot.
///
/// Subscribing replaces any previous subscriber, whose stream then ends.
/// Dropping a [`Subscription`] unsubscribes it unless it was already
/// replaced.
pub struct Slot<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                current: None,
            })),
        }
    }
}

impl<T: Send + 'static> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        if inner.current.replace(Registration { id, tx }).is_some() {
            tracing::debug!("Replacing existing subscriber");
        }

        Subscription {
            id,
            rx,
            slot: Arc::clone(&self.inner),
        }
    }

    /// Delivers `value` to the current subscriber. Returns false when there
    /// is none.
    pub fn notify(&self, value: T) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let delivered = match inner.current.as_ref() {
            Some(registration) => registration.tx.send(value).is_ok(),
            None => false,
        };
        if !delivered {
            inner.current = None;
        }
        delivered
    }

    pub fn has_subscriber(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.current.is_some())
            .unwrap_or(false)
    }
}

pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    slot: Arc<Mutex<Inner<T>>>,
}

impl<T> Subscription<T> {
    /// Next notification; `None` once this subscription has been replaced
    /// or the slot is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.slot.lock() {
            if inner.current.as_ref().map(|r| r.id) == Some(self.id) {
                inner.current = None;
            }
        }
    }
}

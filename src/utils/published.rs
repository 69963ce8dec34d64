//! Whole-value publication cell
//!
//! Holds the latest value of a single-writer, multi-reader figure. Every
//! write builds a fresh value and swaps it in, so a reader either sees the
//! previous value or the next one, never a mix. Push subscribers receive
//! the latest value through a `tokio::sync::watch` channel.

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

pub struct Published<T> {
    current: RwLock<T>,
    /// `None` once closed
    tx: Mutex<Option<watch::Sender<T>>>,
}

impl<T: Clone> Published<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial.clone());
        Self {
            current: RwLock::new(initial),
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Clone of the current value
    pub fn get(&self) -> T {
        self.current.read().clone()
    }

    /// Derive the next value from the current one and publish it
    pub fn update<F: FnOnce(&mut T)>(&self, f: F) -> T {
        let mut current = self.current.write();
        let mut next = current.clone();
        f(&mut next);
        *current = next.clone();
        if let Some(tx) = self.tx.lock().as_ref() {
            tx.send_replace(next.clone());
        }
        next
    }

    /// Publish a replacement value
    pub fn replace(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// Subscribe to future values; `None` after `close`
    pub fn subscribe(&self) -> Option<watch::Receiver<T>> {
        self.tx.lock().as_ref().map(|tx| tx.subscribe())
    }

    /// Drop the push channel. Existing receivers observe closure.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

//! Observability
//!
//! A [`Notifier`] is a registry of observer callbacks keyed by opaque
//! handles. Components embed one notifier per broadcast channel (pipeline
//! results, stage results, tracker events) and signal it synchronously from
//! their worker thread.
//!
//! Observers run in the signaller's thread: they must not block, must not
//! keep references into the signalled data beyond the call, and must not
//! re-enter the notifier they are being called from (the registry lock is
//! held for the duration of the signal).
//!
//! The callback signature is the type parameter, so each channel declares
//! exactly what it delivers:
//!
//! ```
//! use percept::notifier::Notifier;
//! use percept::errors::Status;
//!
//! let channel: Notifier<dyn Fn(&str, Status) + Send + Sync> = Notifier::new();
//! let id = channel.connect(Box::new(|msg, _status| println!("{msg}")));
//! channel.notify(|observer| observer("pass done", Status::Ok));
//! channel.disconnect(id);
//! ```

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Opaque handle returned by [`Notifier::connect`].
    pub struct ObserverId;
}

/// A multi-observer callback registry.
pub struct Notifier<F: ?Sized> {
    observers: Mutex<SlotMap<ObserverId, Box<F>>>,
}

impl<F: ?Sized> Default for Notifier<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> std::fmt::Debug for Notifier<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.lock().len())
            .finish()
    }
}

impl<F: ?Sized> Notifier<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Registers an observer and returns its handle.
    pub fn connect(&self, observer: Box<F>) -> ObserverId {
        self.observers.lock().insert(observer)
    }

    /// Removes an observer; returns whether the handle was known.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.observers.lock().remove(id).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Invokes `signal` once per registered observer, synchronously, in
    /// registration-independent order.
    pub fn notify(&self, mut signal: impl FnMut(&F)) {
        let observers = self.observers.lock();
        for observer in observers.values() {
            signal(observer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Channel = Notifier<dyn Fn(u32) + Send + Sync>;

    #[test]
    fn observers_receive_every_signal() {
        let channel: Channel = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        channel.connect(Box::new(move |v| {
            h.fetch_add(v as usize, Ordering::SeqCst);
        }));

        channel.notify(|cb| cb(2));
        channel.notify(|cb| cb(3));
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let channel: Channel = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let id = channel.connect(Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        channel.notify(|cb| cb(0));
        assert!(channel.disconnect(id));
        assert!(!channel.disconnect(id));
        channel.notify(|cb| cb(0));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(channel.is_empty());
    }

    #[test]
    fn multiple_observers_all_fire() {
        let channel: Channel = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = Arc::clone(&hits);
            channel.connect(Box::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        }
        channel.notify(|cb| cb(0));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(channel.len(), 3);
    }
}

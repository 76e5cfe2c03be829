//! Typed synchronous pub-sub for provider events (spec §9: "event emitters
//! become a small typed pub-sub: one slot per event name, emission is
//! synchronous").

use crate::error::ProviderError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Connection lifecycle state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
}

type StatusCallback = Box<dyn Fn(Status) + Send + Sync>;
type SyncedCallback = Box<dyn Fn(bool) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&ProviderError) + Send + Sync>;

/// One slot per event name. Registration returns nothing; there is no
/// unsubscribe handle because the only owner is the provider itself,
/// which clears all slots on `destroy()`.
#[derive(Default)]
pub struct EventEmitter {
    status: Mutex<Vec<StatusCallback>>,
    synced: Mutex<Vec<SyncedCallback>>,
    error: Mutex<Vec<ErrorCallback>>,
}

impl EventEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_status<F>(&self, cb: F)
    where
        F: Fn(Status) + Send + Sync + 'static,
    {
        self.status.lock().push(Box::new(cb));
    }

    pub fn on_synced<F>(&self, cb: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.synced.lock().push(Box::new(cb));
    }

    pub fn on_error<F>(&self, cb: F)
    where
        F: Fn(&ProviderError) + Send + Sync + 'static,
    {
        self.error.lock().push(Box::new(cb));
    }

    pub fn emit_status(&self, status: Status) {
        for cb in self.status.lock().iter() {
            cb(status);
        }
    }

    pub fn emit_synced(&self, synced: bool) {
        for cb in self.synced.lock().iter() {
            cb(synced);
        }
    }

    pub fn emit_error(&self, err: &ProviderError) {
        for cb in self.error.lock().iter() {
            cb(err);
        }
    }

    /// Detach every listener (spec §9: `destroy()` detaches observers).
    pub fn clear(&self) {
        self.status.lock().clear();
        self.synced.lock().clear();
        self.error.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_all_registered_listeners() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        emitter.on_status(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        emitter.on_status(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit_status(Status::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_detaches_all_listeners() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        emitter.on_synced(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.clear();
        emitter.emit_synced(true);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

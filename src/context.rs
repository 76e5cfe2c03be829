//! `ConnectionContext`: bundles one connect attempt (spec §3).
//!
//! Exactly one context is active per provider. Any background task whose
//! context id no longer matches the provider's current context is a
//! no-op — this is the "coroutine-style await + is-stale-check" pattern
//! from spec §9, made explicit instead of relying on closures holding a
//! now-stale `self`.

use crate::producer::Producer;
use crate::types::Offset;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Monotonic source for `ConnectionContext::id`. Process-wide is fine:
/// ids are only ever compared for equality against one provider's
/// current id, never across providers.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One connect attempt's resources (spec §3).
#[derive(Clone)]
pub struct ConnectionContext {
    pub id: u64,
    pub cancel: CancellationToken,
    pub start_offset: Arc<parking_lot::Mutex<Offset>>,
    pub producer: Arc<parking_lot::Mutex<Option<Producer>>>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            start_offset: Arc::new(parking_lot::Mutex::new(Offset::Beginning)),
            producer: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn set_start_offset(&self, offset: Offset) {
        *self.start_offset.lock() = offset;
    }

    pub fn start_offset(&self) -> Offset {
        self.start_offset.lock().clone()
    }

    pub fn set_producer(&self, producer: Producer) {
        *self.producer.lock() = Some(producer);
    }

    pub fn producer(&self) -> Option<Producer> {
        self.producer.lock().clone()
    }

    /// Abort every outstanding request tied to this context (spec §5:
    /// cancellation aborts I/O, the linger timer, and the heartbeat).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_contexts_get_distinct_ids() {
        let a = ConnectionContext::new();
        let b = ConnectionContext::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn cancel_is_observable_via_is_cancelled() {
        let ctx = ConnectionContext::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }
}

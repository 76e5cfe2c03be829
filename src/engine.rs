//! External capability interfaces the provider consumes but does not own
//! (spec §6.2–6.3). The CRDT and presence implementations live in the
//! embedding application; the provider only ever sees these traits.

use async_trait::async_trait;
use bytes::Bytes;

/// Origin tag the provider stamps on updates it applies, and checks on
/// updates it receives, to avoid feeding its own echo back to the
/// producer (spec §5 "Shared-resource policy").
pub const SERVER_ORIGIN: &str = "server";

/// The CRDT document the provider keeps converged with the remote log
/// (spec §6.2). Update generation, state-vector math, and application of
/// binary updates live entirely on the other side of this trait.
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Register a callback invoked with `(update_bytes, origin)` whenever
    /// the local document mutates. `origin` is compared against
    /// `SERVER_ORIGIN` by the caller to decide whether to feed the
    /// producer (spec §5).
    fn on_update(&self, cb: Box<dyn Fn(Bytes, String) + Send + Sync>);

    /// Apply a remote update. MUST be idempotent — re-applying the same
    /// bytes must not change the resulting document state.
    async fn apply(&self, update: Bytes, origin: &str) -> Result<(), String>;

    /// Stable per-document-instance identifier used to derive the
    /// producer id.
    fn client_id(&self) -> u64;
}

/// The ephemeral presence channel (spec §6.3).
#[async_trait]
pub trait AwarenessEngine: Send + Sync {
    /// Register a callback invoked with `(added, updated, removed, origin)`
    /// client-id lists whenever local or applied awareness state changes.
    fn on_update(&self, cb: Box<dyn Fn(Vec<u64>, Vec<u64>, Vec<u64>, String) + Send + Sync>);

    /// Encode the current state of the given clients for broadcast.
    fn encode(&self, client_ids: &[u64]) -> Bytes;

    /// Integrate a remote awareness payload.
    async fn apply(&self, payload: Bytes, origin: &str) -> Result<(), String>;

    /// Set the local client's awareness state (opaque to the provider).
    fn set_local_state(&self, value: Bytes);

    /// Clear the local client's awareness state (used by graceful
    /// disconnect to build the final "removed" payload).
    fn remove_local(&self);

    /// This instance's own client id.
    fn local_client_id(&self) -> u64;
}

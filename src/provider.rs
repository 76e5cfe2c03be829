//! Provider state machine (spec §4.H): owns the connection context and
//! orchestrates snapshot discovery, the producer, the updates consumer,
//! and (optionally) awareness.

use crate::awareness::{self, Broadcaster, REMOTE_ORIGIN};
use crate::client::Client;
use crate::config::ProviderConfig;
use crate::context::ConnectionContext;
use crate::engine::{AwarenessEngine, DocumentEngine, SERVER_ORIGIN};
use crate::error::ProviderError;
use crate::events::{EventEmitter, Status};
use crate::snapshot;
use crate::updates::{SyncCallbacks, UpdatesConsumer};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, warn};

struct AwarenessHandle {
    name: String,
    engine: Arc<dyn AwarenessEngine>,
}

struct State {
    status: Status,
    synced: bool,
    ctx: Option<ConnectionContext>,
}

/// The Yjs document provider: the public surface of this crate (spec §4.H).
#[derive(Clone)]
pub struct Provider {
    config: Arc<ProviderConfig>,
    client: Client,
    document_url: Arc<String>,
    engine: Arc<dyn DocumentEngine>,
    awareness: Arc<Option<AwarenessHandle>>,
    state: Arc<Mutex<State>>,
    events: Arc<EventEmitter>,
    active: Arc<AtomicBool>,
}

impl Provider {
    /// Build a provider bound to `config.base_url`/`config.doc_id`,
    /// driving `engine`. Awareness is opted into separately via
    /// [`with_awareness`](Self::with_awareness) before the first
    /// `connect()`.
    pub fn new(config: ProviderConfig, engine: Arc<dyn DocumentEngine>) -> Self {
        let mut builder = Client::builder().base_url(config.base_url.clone());
        for (key, value) in &config.headers {
            builder = builder.default_header(key, value.clone());
        }
        let client = builder.build().unwrap_or_default();
        let document_url = format!("/{}", config.doc_id.trim_start_matches('/'));

        let provider = Self {
            config: Arc::new(config),
            client,
            document_url: Arc::new(document_url),
            engine,
            awareness: Arc::new(None),
            state: Arc::new(Mutex::new(State {
                status: Status::Disconnected,
                synced: false,
                ctx: None,
            })),
            events: EventEmitter::new(),
            active: Arc::new(AtomicBool::new(true)),
        };

        provider.wire_local_updates();

        if provider.config.auto_connect {
            let p = provider.clone();
            tokio::spawn(async move {
                p.connect().await;
            });
        }

        provider
    }

    /// Opt into an awareness channel identified by `name`. Must be called
    /// before the first `connect()` (spec §9 open question: heartbeat
    /// and broadcast are allowed from `Connecting` onward, never before a
    /// context exists).
    pub fn with_awareness(mut self, name: impl Into<String>, engine: Arc<dyn AwarenessEngine>) -> Self {
        self.awareness = Arc::new(Some(AwarenessHandle { name: name.into(), engine }));
        self
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    pub fn is_synced(&self) -> bool {
        self.state.lock().synced
    }

    pub fn on_status<F: Fn(Status) + Send + Sync + 'static>(&self, cb: F) {
        self.events.on_status(cb);
    }

    pub fn on_synced<F: Fn(bool) + Send + Sync + 'static>(&self, cb: F) {
        self.events.on_synced(cb);
    }

    pub fn on_error<F: Fn(&ProviderError) + Send + Sync + 'static>(&self, cb: F) {
        self.events.on_error(cb);
    }

    /// Feed local document mutations (origin != "server") to the
    /// producer, avoiding the feedback loop spec §5 calls out.
    fn wire_local_updates(&self) {
        let this = self.clone();
        self.engine.on_update(Box::new(move |bytes, origin| {
            if origin == SERVER_ORIGIN {
                return;
            }
            if !this.active.load(Ordering::Acquire) {
                return;
            }
            let ctx = this.state.lock().ctx.clone();
            if let Some(ctx) = ctx {
                if let Some(producer) = ctx.producer() {
                    if let Err(e) = producer.append(bytes) {
                        warn!(error = %e, "local update dropped: producer rejected append");
                    }
                }
                this.state.lock().synced = false;
            }
        }));
    }

    /// Idempotent connect (spec §4.H). Only acts when `Disconnected`.
    pub async fn connect(&self) {
        {
            let mut state = self.state.lock();
            if state.status != Status::Disconnected {
                return;
            }
            state.status = Status::Connecting;
        }
        self.events.emit_status(Status::Connecting);

        let ctx = ConnectionContext::new();
        self.state.lock().ctx = Some(ctx.clone());

        match self.connect_inner(&ctx).await {
            Ok(()) => {}
            Err(ProviderError::Cancelled) => {}
            Err(e) => {
                if !self.active.load(Ordering::Acquire) || !self.is_current(&ctx) {
                    return;
                }
                error!(error = %e, "connect failed");
                self.events.emit_error(&e);
                self.disconnect().await;
            }
        }
    }

    async fn connect_inner(&self, ctx: &ConnectionContext) -> Result<(), ProviderError> {
        let headers = self.client.get_headers();
        let transport = self.client.transport();
        let url = self.client.resolve_url(&self.document_url);

        let discovery = snapshot::discover(&transport, &url, &headers, &ctx.cancel).await?;
        if !self.is_current(ctx) {
            return Ok(());
        }

        if let Some(bytes) = discovery.snapshot {
            if let Err(e) = self.engine.apply(bytes, SERVER_ORIGIN).await {
                warn!(error = %e, "document engine rejected snapshot");
            }
        }
        if !self.is_current(ctx) {
            return Ok(());
        }

        ctx.set_start_offset(discovery.start_offset.clone());

        let producer_id = format!("client-{}", self.engine.client_id());
        let producer = self
            .client
            .stream(&url)
            .producer(producer_id)
            .auto_claim(self.config.producer.auto_claim)
            .max_batch_bytes(self.config.producer.max_batch_bytes)
            .linger(self.config.producer.linger)
            .max_in_flight(self.config.producer.max_in_flight)
            .max_sequence_gap_retries(self.config.producer.max_sequence_gap_retries)
            .build();
        ctx.set_producer(producer);

        let consumer = UpdatesConsumer {
            transport: transport.clone(),
            url: url.clone(),
            headers: headers.clone(),
            engine: self.engine.clone(),
        };

        let (tx, rx) = oneshot::channel();
        let callbacks = self.sync_callbacks(ctx);
        let cancel = ctx.cancel.clone();
        let start_offset = discovery.start_offset;
        tokio::spawn(async move {
            consumer.run(start_offset, cancel, callbacks, tx).await;
        });

        let initial = rx.await.unwrap_or(Err(ProviderError::Cancelled));
        if !self.is_current(ctx) {
            return Ok(());
        }
        initial?;

        if let Some(handle) = self.awareness.as_ref() {
            self.start_awareness(ctx, &transport, &url, &headers, handle);
        }

        Ok(())
    }

    fn start_awareness(
        &self,
        ctx: &ConnectionContext,
        transport: &crate::transport::Transport,
        url: &str,
        headers: &[(String, String)],
        handle: &AwarenessHandle,
    ) {
        let broadcaster = Broadcaster::new(
            transport.clone(),
            url.to_string(),
            handle.name.clone(),
            headers.to_vec(),
        );

        {
            let engine = handle.engine.clone();
            let cancel = ctx.cancel.clone();
            tokio::spawn(awareness::run_consumer(
                transport.clone(),
                url.to_string(),
                handle.name.clone(),
                headers.to_vec(),
                engine,
                cancel,
            ));
        }
        {
            let engine = handle.engine.clone();
            let cancel = ctx.cancel.clone();
            tokio::spawn(awareness::run_heartbeat(broadcaster.clone(), engine, cancel));
        }
        self.wire_local_awareness(ctx, handle, broadcaster);
    }

    /// Feed local awareness changes (cursor moves, the initial beacon)
    /// into the broadcaster as soon as they happen, instead of waiting
    /// for the next heartbeat tick (spec §4.G).
    fn wire_local_awareness(&self, ctx: &ConnectionContext, handle: &AwarenessHandle, broadcaster: Broadcaster) {
        let ctx_id = ctx.id;
        let this = self.clone();
        let engine = handle.engine.clone();
        let cancel = ctx.cancel.clone();
        handle.engine.on_update(Box::new(move |added, updated, removed, origin| {
            if origin == REMOTE_ORIGIN {
                return;
            }
            if !this.is_current_id(ctx_id) {
                return;
            }
            let client_ids: Vec<u64> = added.into_iter().chain(updated).chain(removed).collect();
            if client_ids.is_empty() {
                return;
            }
            let payload = engine.encode(&client_ids);
            broadcaster.broadcast(payload, &cancel);
        }));
    }

    fn sync_callbacks(&self, ctx: &ConnectionContext) -> SyncCallbacks {
        let ctx_id = ctx.id;
        let this_a = self.clone();
        let this_b = self.clone();
        SyncCallbacks {
            mark_synced: Box::new(move || {
                if !this_a.is_current_id(ctx_id) {
                    return;
                }
                let was_connecting = {
                    let mut state = this_a.state.lock();
                    let was = state.status == Status::Connecting;
                    if was {
                        state.status = Status::Connected;
                    }
                    state.synced = true;
                    was
                };
                if was_connecting {
                    this_a.events.emit_status(Status::Connected);
                }
                this_a.events.emit_synced(true);
            }),
            set_synced: Box::new(move |synced| {
                if !this_b.is_current_id(ctx_id) {
                    return;
                }
                this_b.state.lock().synced = synced;
                this_b.events.emit_synced(synced);
            }),
        }
    }

    fn is_current(&self, ctx: &ConnectionContext) -> bool {
        self.is_current_id(ctx.id)
    }

    fn is_current_id(&self, id: u64) -> bool {
        self.active.load(Ordering::Acquire) && self.state.lock().ctx.as_ref().map(|c| c.id) == Some(id)
    }

    /// Idempotent disconnect (spec §4.H): `status(Disconnected)` fires
    /// before any further mutation, then the context is torn down.
    pub async fn disconnect(&self) {
        let ctx = {
            let mut state = self.state.lock();
            if state.status == Status::Disconnected {
                return;
            }
            state.status = Status::Disconnected;
            state.synced = false;
            state.ctx.take()
        };
        self.events.emit_status(Status::Disconnected);

        let Some(ctx) = ctx else { return };

        if let Some(handle) = self.awareness.as_ref() {
            let payload = handle.engine.encode(&[handle.engine.local_client_id()]);
            handle.engine.remove_local();
            let transport = self.client.transport();
            let headers = self.client.get_headers();
            let url = self.client.resolve_url(&self.document_url);
            let broadcaster = Broadcaster::new(transport, url, handle.name.clone(), headers);
            broadcaster.send_removal(payload, &ctx.cancel).await;
        }

        if let Some(producer) = ctx.producer() {
            producer.close().await;
        }

        ctx.cancel();
    }

    /// `disconnect()` plus detaching this provider's own event
    /// listeners (spec §9: the provider is an observer, not an owner, of
    /// the engines — it only ever detaches its own subscriptions).
    pub async fn destroy(&self) {
        self.disconnect().await;
        self.active.store(false, Ordering::Release);
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfigBuilder;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct NoopEngine {
        cb: StdMutex<Option<Box<dyn Fn(Bytes, String) + Send + Sync>>>,
    }

    #[async_trait]
    impl DocumentEngine for NoopEngine {
        fn on_update(&self, cb: Box<dyn Fn(Bytes, String) + Send + Sync>) {
            *self.cb.lock().unwrap() = Some(cb);
        }
        async fn apply(&self, _update: Bytes, _origin: &str) -> Result<(), String> {
            Ok(())
        }
        fn client_id(&self) -> u64 {
            42
        }
    }

    #[test]
    fn new_provider_starts_disconnected() {
        let config = ProviderConfigBuilder::new()
            .base_url("https://example.test")
            .doc_id("doc-1")
            .connect(false)
            .build()
            .unwrap();
        let engine = Arc::new(NoopEngine { cb: StdMutex::new(None) });
        let provider = Provider::new(config, engine);
        assert_eq!(provider.status(), Status::Disconnected);
        assert!(!provider.is_synced());
    }
}

//! Awareness consumer & broadcaster (spec §4.G): an SSE subscription for
//! remote presence updates plus a broadcaster that serializes concurrent
//! local awareness changes through a single send loop.

use crate::engine::AwarenessEngine;
use crate::error::ProviderError;
use crate::retry::{JitterMode, RetryConfig};
use crate::transport::{Request, SseEvent, Transport};
use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Remote-origin tag applied to awareness payloads received over SSE, so
/// the broadcaster never re-sends what it just received (spec §5).
pub const REMOTE_ORIGIN: &str = "remote";

fn awareness_retry_config() -> RetryConfig {
    RetryConfig::new()
        .with_initial_backoff(Duration::from_millis(100))
        .with_multiplier(1.5)
        .with_max_backoff(Duration::from_secs(2))
        .with_max_retries(30)
        .with_jitter(JitterMode::None)
}

/// Consumes remote awareness updates over SSE and forwards them to the
/// engine. Run as a background task for the lifetime of a connection
/// context; loops until `cancel` fires.
pub async fn run_consumer(
    transport: Transport,
    url: String,
    name: String,
    headers: Vec<(String, String)>,
    engine: Arc<dyn AwarenessEngine>,
    cancel: CancellationToken,
) {
    let retry = awareness_retry_config();
    let mut attempt = 0u32;
    let mut current_delay = Duration::ZERO;

    while !cancel.is_cancelled() {
        let req_url = format!(
            "{url}{sep}awareness={name}&offset=now&live=sse",
            sep = if url.contains('?') { "&" } else { "?" }
        );
        let mut req = Request::new(Method::GET, req_url);
        for (k, v) in &headers {
            req = req.header(k.clone(), v.clone());
        }

        match transport.execute_sse(req, &cancel).await {
            Ok((200, _headers, mut stream)) => {
                attempt = 0;
                current_delay = Duration::ZERO;
                loop {
                    match stream.next_event().await {
                        Ok(Some(SseEvent::Data(bytes))) => {
                            if let Err(e) = engine.apply(bytes, REMOTE_ORIGIN).await {
                                warn!(error = %e, "awareness engine rejected remote payload");
                            }
                        }
                        Ok(Some(SseEvent::Control { .. })) => {}
                        Ok(None) => break, // clean EOF, reconnect below
                        Err(ProviderError::Cancelled) => return,
                        Err(e) => {
                            debug!(error = %e, "awareness SSE read error, reconnecting");
                            break;
                        }
                    }
                }
                sleep(RECONNECT_DELAY).await;
            }
            Ok((404, _, _)) => {
                if attempt >= retry.max_retries {
                    warn!("awareness stream not found after max retries, giving up silently");
                    return;
                }
                current_delay = retry.next_backoff(attempt, current_delay);
                attempt += 1;
                sleep(current_delay).await;
            }
            Ok((status, headers, _)) => {
                debug!(status, "unexpected awareness SSE status, backing off");
                let _ = headers;
                sleep(RECONNECT_DELAY).await;
            }
            Err(ProviderError::Cancelled) => return,
            Err(e) => {
                debug!(error = %e, "awareness connection error, backing off");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Serializes concurrent local awareness broadcasts through one send
/// loop: local changes set `pending`; the loop drains it one batch at a
/// time via POST.
#[derive(Clone)]
pub struct Broadcaster {
    transport: Transport,
    url: String,
    name: String,
    headers: Vec<(String, String)>,
    pending: Arc<Mutex<Option<Bytes>>>,
    sending: Arc<Mutex<bool>>,
    notify: Arc<Notify>,
}

impl Broadcaster {
    pub fn new(transport: Transport, url: String, name: String, headers: Vec<(String, String)>) -> Self {
        Self {
            transport,
            url,
            name,
            headers,
            pending: Arc::new(Mutex::new(None)),
            sending: Arc::new(Mutex::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue a payload for broadcast; starts the send loop if idle.
    pub fn broadcast(&self, payload: Bytes, cancel: &CancellationToken) {
        *self.pending.lock() = Some(payload);

        let mut sending = self.sending.lock();
        if *sending {
            self.notify.notify_one();
            return;
        }
        *sending = true;
        drop(sending);

        let this = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            this.send_loop(&cancel).await;
        });
    }

    async fn send_loop(&self, cancel: &CancellationToken) {
        loop {
            let payload = self.pending.lock().take();
            let Some(payload) = payload else {
                *self.sending.lock() = false;
                return;
            };

            if let Err(e) = self.send(payload, cancel).await {
                if !matches!(e, ProviderError::Cancelled) {
                    debug!(error = %e, "awareness broadcast failed");
                }
            }
        }
    }

    async fn send(&self, payload: Bytes, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let url = format!(
            "{}{sep}awareness={}",
            self.url,
            self.name,
            sep = if self.url.contains('?') { "&" } else { "?" }
        );
        let mut req = Request::new(Method::POST, url).body(payload);
        for (k, v) in &self.headers {
            req = req.header(k.clone(), v.clone());
        }
        let resp = self.transport.execute(req, cancel).await?;
        if resp.status != 204 && resp.status != 200 {
            return Err(resp.headers.classify_error(resp.status, &self.url));
        }
        Ok(())
    }

    /// Send a final "removed" payload on graceful disconnect. Failures
    /// are swallowed (spec §4.G).
    pub async fn send_removal(&self, payload: Bytes, cancel: &CancellationToken) {
        if let Err(e) = self.send(payload, cancel).await {
            debug!(error = %e, "final awareness removal send failed, ignoring");
        }
    }
}

/// Background heartbeat: re-broadcasts the encoded local state every 15 s
/// to refresh the server-side TTL. Runs until `cancel` fires.
pub async fn run_heartbeat(
    broadcaster: Broadcaster,
    engine: Arc<dyn AwarenessEngine>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = sleep(HEARTBEAT_INTERVAL) => {}
        }
        let client_id = engine.local_client_id();
        let payload = engine.encode(&[client_id]);
        broadcaster.broadcast(payload, &cancel);
    }
}

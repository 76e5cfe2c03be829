//! Updates Consumer (spec §4.F): a resumable long-poll/SSE tailing loop
//! that delivers framed chunks to the document engine.
//!
//! Driven entirely by the owning `ConnectionContext`'s cancel token —
//! there is no separate generation counter here because a fresh context
//! (and therefore a fresh cancel token) is created on every `connect()`,
//! which gives the same "old generation's callbacks become no-ops"
//! property spec §4.F asks for.

use crate::engine::{DocumentEngine, SERVER_ORIGIN};
use crate::error::ProviderError;
use crate::framing;
use crate::transport::{SseEvent, Transport};
use crate::types::Offset;
use bytes::{Bytes, BytesMut};
use http::Method;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything the loop needs to talk to the network and the document.
pub struct UpdatesConsumer {
    pub transport: Transport,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub engine: Arc<dyn DocumentEngine>,
}

/// Callbacks into the provider's state machine. Kept as plain `Fn`s
/// rather than a trait so the provider can close over its own `Arc`s
/// without an extra indirection layer.
pub struct SyncCallbacks {
    pub mark_synced: Box<dyn Fn() + Send + Sync>,
    pub set_synced: Box<dyn Fn(bool) + Send + Sync>,
}

type InitialResultSlot = Option<oneshot::Sender<Result<(), ProviderError>>>;

impl UpdatesConsumer {
    /// Run the tailing loop until `cancel` fires. `initial_result` is
    /// resolved exactly once: `Ok(())` when the first sync completes,
    /// `Err(e)` if a fatal error occurs before that point (per spec
    /// §4.F, this is equivalent to "fail connect promise").
    pub async fn run(
        &self,
        start_offset: Offset,
        cancel: CancellationToken,
        callbacks: SyncCallbacks,
        initial_result: oneshot::Sender<Result<(), ProviderError>>,
    ) {
        let mut current_offset = start_offset;
        let mut initial_sync_pending = true;
        let mut initial_result: InitialResultSlot = Some(initial_result);
        let mut try_sse = true;

        while !cancel.is_cancelled() {
            let outcome = if try_sse {
                self.open_sse(
                    &mut current_offset,
                    &mut initial_sync_pending,
                    &callbacks,
                    &mut initial_result,
                    &cancel,
                )
                .await
            } else {
                self.open_long_poll(
                    &mut current_offset,
                    &mut initial_sync_pending,
                    &callbacks,
                    &mut initial_result,
                    &cancel,
                )
                .await
            };

            match outcome {
                Ok(StreamOutcome::SseUnavailable) => {
                    try_sse = false;
                    continue;
                }
                Ok(StreamOutcome::Reconnect) => {
                    // Stream closed cleanly (EOF / 204 timeout): reconnect.
                }
                Err(ProviderError::Cancelled) => return,
                Err(ProviderError::NotFound { .. }) => {
                    if initial_sync_pending && current_offset.is_beginning() {
                        info!("updates stream not found yet; treating as empty new document");
                        initial_sync_pending = false;
                        (callbacks.mark_synced)();
                        if let Some(tx) = initial_result.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    sleep(std::time::Duration::from_millis(100)).await;
                }
                Err(e) => {
                    if initial_sync_pending {
                        if let Some(tx) = initial_result.take() {
                            let _ = tx.send(Err(e));
                        }
                        return;
                    }
                    debug!(error = %e, "updates tail error after initial sync, backing off");
                    sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Apply remote items then settle the synced/initial-sync bookkeeping
    /// for one control boundary. Shared by the SSE and long-poll paths so
    /// both observe `up_to_date` the moment it arrives, not after the
    /// connection eventually closes.
    async fn apply_and_settle(
        &self,
        items: Vec<Bytes>,
        next_offset: Offset,
        up_to_date: bool,
        current_offset: &mut Offset,
        initial_sync_pending: &mut bool,
        callbacks: &SyncCallbacks,
        initial_result: &mut InitialResultSlot,
    ) {
        let had_items = !items.is_empty();
        for item in items {
            if let Err(e) = self.engine.apply(item, SERVER_ORIGIN).await {
                warn!(error = %e, "document engine rejected remote update");
            }
        }
        *current_offset = next_offset;

        if *initial_sync_pending && up_to_date {
            *initial_sync_pending = false;
            (callbacks.mark_synced)();
            if let Some(tx) = initial_result.take() {
                let _ = tx.send(Ok(()));
            }
        } else if had_items {
            (callbacks.set_synced)(true);
        }
    }

    async fn open_sse(
        &self,
        current_offset: &mut Offset,
        initial_sync_pending: &mut bool,
        callbacks: &SyncCallbacks,
        initial_result: &mut InitialResultSlot,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ProviderError> {
        let url = build_url(&self.url, current_offset, "sse");
        let req = self.request(url);
        let (status, headers, mut stream) = self.transport.execute_sse(req, cancel).await?;

        if status == 400 {
            return Ok(StreamOutcome::SseUnavailable);
        }
        if status != 200 || !headers.content_type.as_deref().unwrap_or("").contains("text/event-stream") {
            return Ok(StreamOutcome::SseUnavailable);
        }

        // Items accumulate only between one `data:` event and the next
        // `control:` event that closes out its boundary — never across
        // the whole (potentially ~60s-long, spec §5) connection.
        let mut pending_items: Vec<Bytes> = Vec::new();

        loop {
            match stream.next_event().await? {
                Some(SseEvent::Data(bytes)) => {
                    pending_items.extend(framing::parse(&bytes)?);
                }
                Some(SseEvent::Control { next_offset, up_to_date, .. }) => {
                    let items = std::mem::take(&mut pending_items);
                    self.apply_and_settle(
                        items,
                        next_offset,
                        up_to_date,
                        current_offset,
                        initial_sync_pending,
                        callbacks,
                        initial_result,
                    )
                    .await;
                }
                None => return Ok(StreamOutcome::Reconnect),
            }
        }
    }

    async fn open_long_poll(
        &self,
        current_offset: &mut Offset,
        initial_sync_pending: &mut bool,
        callbacks: &SyncCallbacks,
        initial_result: &mut InitialResultSlot,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ProviderError> {
        let url = build_url(&self.url, current_offset, "long-poll");
        let req = self.request(url).timeout(std::time::Duration::from_secs(65));
        let (status, headers, mut stream) = self.transport.execute_streaming(req, cancel).await?;

        match status {
            200 => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next_chunk().await? {
                    buf.extend_from_slice(&chunk);
                }
                let items = framing::parse(&buf.freeze())?;
                let next_offset = headers.next_offset.unwrap_or_else(|| current_offset.clone());
                self.apply_and_settle(
                    items,
                    next_offset,
                    headers.up_to_date,
                    current_offset,
                    initial_sync_pending,
                    callbacks,
                    initial_result,
                )
                .await;
                Ok(StreamOutcome::Reconnect)
            }
            204 => {
                let next_offset = headers.next_offset.unwrap_or_else(|| current_offset.clone());
                self.apply_and_settle(
                    Vec::new(),
                    next_offset,
                    true,
                    current_offset,
                    initial_sync_pending,
                    callbacks,
                    initial_result,
                )
                .await;
                Ok(StreamOutcome::Reconnect)
            }
            404 => Err(ProviderError::NotFound { url: self.url.clone() }),
            s => Err(headers.classify_error(s, &self.url)),
        }
    }

    fn request(&self, url: String) -> crate::transport::Request {
        let mut req = crate::transport::Request::new(Method::GET, url);
        for (k, v) in &self.headers {
            req = req.header(k.clone(), v.clone());
        }
        req
    }
}

enum StreamOutcome {
    Reconnect,
    SseUnavailable,
}

fn build_url(base: &str, offset: &Offset, live: &str) -> String {
    let sep = if base.contains('?') { "&" } else { "?" };
    format!("{base}{sep}offset={}&live={live}", offset.to_query_value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_query_params() {
        let url = build_url("https://example.com/s", &Offset::Beginning, "sse");
        assert_eq!(url, "https://example.com/s?offset=-1&live=sse");
    }

    #[test]
    fn build_url_extends_existing_query() {
        let url = build_url("https://example.com/s?x=1", &Offset::Now, "long-poll");
        assert_eq!(url, "https://example.com/s?x=1&offset=now&live=long-poll");
    }
}

//! Idempotent producer with exactly-once append semantics (spec §4.C).
//!
//! `append()` never suspends — it only enqueues — so batching and sends
//! happen on a background task pinned to the producer's own state lock,
//! following the same "lock, clone what's needed, unlock, spawn" shape
//! the teacher used for linger-triggered sends.

use crate::config::ProducerConfig;
use crate::error::{ProducerError, ProviderError};
use crate::framing;
use crate::raw::RawStream;
use crate::transport::{
    HEADER_CONTENT_TYPE, HEADER_PRODUCER_EPOCH, HEADER_PRODUCER_EXPECTED_SEQ, HEADER_PRODUCER_ID,
    HEADER_PRODUCER_SEQ, HEADER_STREAM_OFFSET,
};
use crate::types::Offset;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;

/// Type alias for the `on_error` callback (spec §4.C: async-delivered
/// per-batch failures).
pub type OnErrorCallback = Arc<dyn Fn(ProducerError) + Send + Sync>;

/// Builder for configuring an idempotent producer.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ProducerBuilder {
    stream: RawStream,
    producer_id: String,
    epoch: u64,
    config: ProducerConfig,
    content_type: Option<String>,
    on_error: Option<OnErrorCallback>,
}

impl ProducerBuilder {
    pub(crate) fn new(stream: RawStream, producer_id: String, config: ProducerConfig) -> Self {
        Self {
            stream,
            producer_id,
            epoch: 0,
            config,
            content_type: None,
            on_error: None,
        }
    }

    /// Set the starting epoch.
    pub fn epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Enable auto-claim on stale epoch.
    pub fn auto_claim(mut self, enabled: bool) -> Self {
        self.config.auto_claim = enabled;
        self
    }

    /// Set maximum batch size in bytes.
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    /// Set linger time before sending a batch.
    pub fn linger(mut self, duration: Duration) -> Self {
        self.config.linger = duration;
        self
    }

    /// Set maximum in-flight batches.
    pub fn max_in_flight(mut self, count: usize) -> Self {
        self.config.max_in_flight = count;
        self
    }

    /// Set the sequence-gap retry ceiling.
    pub fn max_sequence_gap_retries(mut self, retries: u32) -> Self {
        self.config.max_sequence_gap_retries = retries;
        self
    }

    /// Set content type for batch bodies.
    pub fn content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    /// Set the callback invoked for failures that are not surfaced
    /// synchronously from `append()` or `flush()`.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProducerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Build the producer and spawn its linger task.
    pub fn build(self) -> Producer {
        let content_type = self.content_type.unwrap_or_else(|| {
            self.stream
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| "application/octet-stream".to_string())
        });

        let linger = self.config.linger;

        let producer = Producer {
            stream: self.stream,
            producer_id: self.producer_id,
            state: Arc::new(Mutex::new(ProducerState {
                epoch: self.epoch,
                next_seq: 0,
                pending: Vec::new(),
                pending_bytes: 0,
                in_flight: 0,
                closed: false,
                last_offset: None,
                duplicate_count: 0,
                gap_retry_count: 0,
                batch_started_at: None,
            })),
            config: Arc::new(self.config),
            content_type: Arc::new(content_type),
            on_error: self.on_error,
            flush_notify: Arc::new(Notify::new()),
            in_flight_gauge: Arc::new(AtomicUsize::new(0)),
            next_call_id: Arc::new(AtomicU64::new(0)),
        };

        if linger > Duration::ZERO {
            let clone = producer.clone();
            tokio::spawn(async move {
                clone.linger_task().await;
            });
        }

        producer
    }
}

struct ProducerState {
    epoch: u64,
    next_seq: u64,
    /// Already-framed items awaiting a batch send.
    pending: Vec<Bytes>,
    pending_bytes: usize,
    in_flight: usize,
    closed: bool,
    last_offset: Option<Offset>,
    duplicate_count: u64,
    gap_retry_count: u32,
    batch_started_at: Option<Instant>,
}

/// Idempotent producer: fenced `(producer-id, epoch, seq)` appends with
/// batching, pipelining, and auto-claim on stale epoch (spec §4.C).
#[derive(Clone)]
pub struct Producer {
    stream: RawStream,
    producer_id: String,
    state: Arc<Mutex<ProducerState>>,
    config: Arc<ProducerConfig>,
    content_type: Arc<String>,
    on_error: Option<OnErrorCallback>,
    flush_notify: Arc<Notify>,
    in_flight_gauge: Arc<AtomicUsize>,
    next_call_id: Arc<AtomicU64>,
}

impl Producer {
    /// Enqueue an item for append. Non-blocking; never suspends.
    ///
    /// Returns synchronously only for "closed" or "empty input" — every
    /// other failure is delivered later via the configured `on_error`.
    pub fn append(&self, item: impl Into<Bytes>) -> Result<(), ProducerError> {
        let item = item.into();
        if item.is_empty() {
            return Err(ProducerError::InvalidInput {
                message: "item must not be empty".to_string(),
            });
        }

        let framed = framing::frame(&item);
        let framed_len = framed.len();

        let mut state = self.state.lock();
        if state.closed {
            return Err(ProducerError::Closed);
        }

        if state.pending.is_empty() {
            state.batch_started_at = Some(Instant::now());
        }
        state.pending.push(framed);
        state.pending_bytes += framed_len;

        if state.pending_bytes >= self.config.max_batch_bytes && state.in_flight < self.config.max_in_flight {
            self.send_locked(&mut state);
        }

        Ok(())
    }

    /// Resolve when every previously-enqueued item has an acknowledged
    /// offset, returning the last acknowledged offset and how many of
    /// the acknowledgements were duplicate (204) responses.
    pub async fn flush(&self) -> (Option<Offset>, u64) {
        loop {
            {
                let mut state = self.state.lock();
                if !state.pending.is_empty() && state.in_flight < self.config.max_in_flight {
                    self.send_locked(&mut state);
                }
                if state.pending.is_empty() && state.in_flight == 0 {
                    return (state.last_offset.clone(), state.duplicate_count);
                }
            }
            self.flush_notify.notified().await;
        }
    }

    /// Idempotent graceful shutdown: drains `pending`, waits for
    /// in-flight sends, then rejects any further `append()` calls.
    pub async fn close(&self) -> (Option<Offset>, u64) {
        let result = self.flush().await;
        self.state.lock().closed = true;
        result
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn next_seq(&self) -> u64 {
        self.state.lock().next_seq
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn linger_task(&self) {
        let linger = self.config.linger;
        loop {
            sleep(linger).await;

            let mut state = self.state.lock();
            if state.closed && state.pending.is_empty() {
                return;
            }
            let due = state
                .batch_started_at
                .is_some_and(|started| started.elapsed() >= linger);
            if due && !state.pending.is_empty() && state.in_flight < self.config.max_in_flight {
                self.send_locked(&mut state);
            }
        }
    }

    /// Dispatch the current `pending` buffer as one batch. Called with
    /// the state lock held; spawns the actual HTTP work so the lock is
    /// never held across an `.await`.
    fn send_locked(&self, state: &mut ProducerState) {
        if state.pending.is_empty() {
            return;
        }

        let batch: Vec<Bytes> = std::mem::take(&mut state.pending);
        state.pending_bytes = 0;
        state.batch_started_at = None;
        state.in_flight += 1;
        self.in_flight_gauge.fetch_add(1, Ordering::AcqRel);

        let seq = state.next_seq;
        let epoch = state.epoch;
        state.next_seq += 1;

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let producer = self.clone();

        tokio::spawn(async move {
            producer.drive_send(batch, seq, epoch, call_id, 0).await;
        });
    }

    /// Recursive send/retry loop for one batch "slot". `call_id` identifies
    /// the in-flight slot across retries so `in_flight` is decremented
    /// exactly once per original `send_locked` call.
    fn drive_send(
        &self,
        batch: Vec<Bytes>,
        seq: u64,
        epoch: u64,
        call_id: u64,
        gap_retries: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let body: Vec<u8> = batch.iter().flat_map(|b| b.iter().copied()).collect();
            let send_result = self.post_batch(&body, seq, epoch).await;

            match send_result {
                Ok((status, next_offset, server_epoch, expected_seq)) => {
                    match status {
                        200 | 204 => {
                            let mut state = self.state.lock();
                            state.last_offset = next_offset;
                            if status == 204 {
                                state.duplicate_count += 1;
                            }
                            state.gap_retry_count = 0;
                            state.in_flight -= 1;
                            self.in_flight_gauge.fetch_sub(1, Ordering::AcqRel);
                            drop(state);
                            self.flush_notify.notify_waiters();
                        }
                        403 => {
                            let server_epoch = server_epoch.unwrap_or(epoch);
                            if self.config.auto_claim {
                                let new_epoch = server_epoch + 1;
                                tracing::warn!(
                                    producer_id = %self.producer_id,
                                    old_epoch = epoch,
                                    new_epoch,
                                    "stale epoch, auto-claiming"
                                );
                                {
                                    let mut state = self.state.lock();
                                    state.epoch = new_epoch;
                                    state.next_seq = 1;
                                }
                                self.drive_send(batch, 0, new_epoch, call_id, 0).await;
                            } else {
                                self.fail_call(call_id, ProducerError::StaleEpoch {
                                    server_epoch,
                                    our_epoch: epoch,
                                });
                            }
                        }
                        409 => {
                            let expected = expected_seq.unwrap_or(0);
                            if gap_retries < self.config.max_sequence_gap_retries {
                                tracing::warn!(
                                    producer_id = %self.producer_id,
                                    expected,
                                    received = seq,
                                    attempt = gap_retries,
                                    "sequence gap, resetting and retrying"
                                );
                                {
                                    // `expected` is about to be consumed by this retry's
                                    // resend below, so the next fresh batch must start
                                    // one past it — leaving `next_seq == expected` here
                                    // would hand the same seq to the next `send_locked`
                                    // call too.
                                    let mut state = self.state.lock();
                                    state.next_seq = expected + 1;
                                }
                                let delay = Duration::from_millis(10 * (1u64 << gap_retries.min(6)));
                                sleep(delay).await;
                                self.drive_send(batch, expected, epoch, call_id, gap_retries + 1)
                                    .await;
                            } else {
                                self.fail_call(call_id, ProducerError::SequenceGap {
                                    expected,
                                    received: seq,
                                });
                            }
                        }
                        _ => {
                            self.fail_call(call_id, ProducerError::Stream {
                                message: format!("unexpected status {status}"),
                            });
                        }
                    }
                }
                Err(ProviderError::Cancelled) => {
                    let mut state = self.state.lock();
                    state.in_flight -= 1;
                    self.in_flight_gauge.fetch_sub(1, Ordering::AcqRel);
                    drop(state);
                    self.flush_notify.notify_waiters();
                }
                Err(e) => {
                    self.fail_call(call_id, e.into());
                }
            }
        })
    }

    fn fail_call(&self, _call_id: u64, err: ProducerError) {
        {
            let mut state = self.state.lock();
            state.in_flight -= 1;
            self.in_flight_gauge.fetch_sub(1, Ordering::AcqRel);
        }
        tracing::error!(producer_id = %self.producer_id, error = %err, "batch send failed");
        if let Some(cb) = &self.on_error {
            cb(err);
        }
        self.flush_notify.notify_waiters();
    }

    async fn post_batch(
        &self,
        body: &[u8],
        seq: u64,
        epoch: u64,
    ) -> Result<(u16, Option<Offset>, Option<u64>, Option<u64>), ProviderError> {
        let mut builder = self
            .stream
            .client
            .inner
            .post(&self.stream.url)
            .header(HEADER_CONTENT_TYPE, self.content_type.as_str())
            .header(HEADER_PRODUCER_ID, self.producer_id.as_str())
            .header(HEADER_PRODUCER_EPOCH, epoch.to_string())
            .header(HEADER_PRODUCER_SEQ, seq.to_string());
        for (key, value) in self.stream.client.get_headers() {
            builder = builder.header(key, value);
        }
        let resp = builder.body(body.to_vec()).send().await?;

        let status = resp.status().as_u16();
        let next_offset = resp
            .headers()
            .get(HEADER_STREAM_OFFSET)
            .and_then(|v| v.to_str().ok())
            .map(Offset::parse);
        let server_epoch = resp
            .headers()
            .get(HEADER_PRODUCER_EPOCH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let expected_seq = resp
            .headers()
            .get(HEADER_PRODUCER_EXPECTED_SEQ)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        Ok((status, next_offset, server_epoch, expected_seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    fn test_stream() -> RawStream {
        Client::builder()
            .base_url("https://example.test")
            .build()
            .unwrap()
            .stream("/streams/test-doc")
    }

    #[test]
    fn append_rejects_empty_item_synchronously() {
        let producer =
            ProducerBuilder::new(test_stream(), "p1".to_string(), ProducerConfig::default()).build();
        let err = producer.append(Bytes::new()).unwrap_err();
        assert!(matches!(err, ProducerError::InvalidInput { .. }));
    }

    #[test]
    fn append_after_close_is_rejected() {
        let producer =
            ProducerBuilder::new(test_stream(), "p1".to_string(), ProducerConfig::default()).build();
        producer.state.lock().closed = true;
        let err = producer.append(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, ProducerError::Closed));
    }

    #[test]
    fn enqueue_tracks_pending_bytes() {
        let producer =
            ProducerBuilder::new(test_stream(), "p1".to_string(), ProducerConfig::default())
                .linger(Duration::from_secs(3600))
                .max_batch_bytes(usize::MAX)
                .build();
        producer.append(Bytes::from_static(b"hello")).unwrap();
        let state = producer.state.lock();
        assert_eq!(state.pending.len(), 1);
        assert!(state.pending_bytes > 0);
    }
}

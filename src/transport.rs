//! HTTP transport: request building, header extraction, error
//! classification, and streaming/SSE primitives (spec §4.B).

use crate::config::HeaderValue as ConfigHeaderValue;
use crate::error::ProviderError;
use crate::sse::SseAssembler;
use crate::types::Offset;
use bytes::Bytes;
use reqwest::header::HeaderMap as ReqHeaderMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const HEADER_CONTENT_TYPE: &str = "content-type";
pub(crate) const HEADER_STREAM_OFFSET: &str = "stream-next-offset";
pub(crate) const HEADER_STREAM_CURSOR: &str = "stream-cursor";
pub(crate) const HEADER_STREAM_UP_TO_DATE: &str = "stream-up-to-date";
pub(crate) const HEADER_STREAM_CLOSED: &str = "stream-closed";
pub(crate) const HEADER_STREAM_SSE_ENCODING: &str = "stream-sse-data-encoding";
pub(crate) const HEADER_PRODUCER_ID: &str = "producer-id";
pub(crate) const HEADER_PRODUCER_EPOCH: &str = "producer-epoch";
pub(crate) const HEADER_PRODUCER_SEQ: &str = "producer-seq";
pub(crate) const HEADER_PRODUCER_EXPECTED_SEQ: &str = "producer-expected-seq";
pub(crate) const HEADER_PRODUCER_RECEIVED_SEQ: &str = "producer-received-seq";
pub(crate) const HEADER_RETRY_AFTER: &str = "retry-after";
pub(crate) const HEADER_LOCATION: &str = "location";

/// Normalized, case-insensitive protocol response headers (§4.B).
#[derive(Debug, Clone, Default)]
pub struct ProtocolHeaders {
    pub next_offset: Option<Offset>,
    pub up_to_date: bool,
    pub cursor: Option<String>,
    pub closed: bool,
    pub producer_epoch: Option<u64>,
    pub producer_expected_seq: Option<u64>,
    pub producer_received_seq: Option<u64>,
    pub retry_after: Option<Duration>,
    pub location: Option<String>,
    pub sse_base64: bool,
    pub content_type: Option<String>,
}

impl ProtocolHeaders {
    fn from_reqwest(headers: &ReqHeaderMap) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let retry_after = get(HEADER_RETRY_AFTER).and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs);

        Self {
            next_offset: get(HEADER_STREAM_OFFSET).map(Offset::parse),
            up_to_date: get(HEADER_STREAM_UP_TO_DATE) == Some("true"),
            cursor: get(HEADER_STREAM_CURSOR).map(str::to_string),
            closed: get(HEADER_STREAM_CLOSED) == Some("true"),
            producer_epoch: get(HEADER_PRODUCER_EPOCH).and_then(|s| s.parse().ok()),
            producer_expected_seq: get(HEADER_PRODUCER_EXPECTED_SEQ).and_then(|s| s.parse().ok()),
            producer_received_seq: get(HEADER_PRODUCER_RECEIVED_SEQ).and_then(|s| s.parse().ok()),
            retry_after,
            location: get(HEADER_LOCATION).map(str::to_string),
            sse_base64: get(HEADER_STREAM_SSE_ENCODING) == Some("base64"),
            content_type: get(HEADER_CONTENT_TYPE).map(str::to_string),
        }
    }

    /// Classify a non-2xx status into a `ProviderError`, using whatever
    /// fencing headers are present (§4.B error table).
    pub fn classify_error(&self, status: u16, url: &str) -> ProviderError {
        ProviderError::from_status(
            status,
            url,
            self.retry_after,
            self.producer_expected_seq,
            self.producer_epoch,
        )
    }
}

/// A one-shot (non-streaming) HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: ProtocolHeaders,
    pub body: Bytes,
}

/// A single HTTP request destined for the transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub accept_sse: bool,
}

impl Request {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            accept_sse: false,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn accept_sse(mut self) -> Self {
        self.accept_sse = true;
        self
    }
}

/// Shared per-request header context: static client headers plus any
/// per-call overrides (spec §6.4: values may be a string or a supplier
/// closure evaluated per request).
#[derive(Clone, Default)]
pub struct HeaderSet {
    pub(crate) entries: HashMap<String, ConfigHeaderValue>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve()))
            .collect()
    }
}

/// The HTTP transport (spec §4.B). Wraps a `reqwest::Client`; every
/// request attaches the `ConnectionContext` cancel token so aborting it
/// fails the request with `ProviderError::Cancelled`.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    /// `client` must be built with `redirect::Policy::none()` (see
    /// `ClientBuilder::build` in `client.rs`) so 3xx responses come back
    /// as-is with a `Location` header instead of being auto-followed —
    /// snapshot discovery (§4.E) depends on observing the raw 307.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, req: &Request) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(req.method.clone(), &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if req.accept_sse {
            builder = builder.header("accept", "text/event-stream");
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    /// `execute(request) -> (status, headers, body)` — one-shot (§4.B.1).
    pub async fn execute(
        &self,
        req: Request,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ProviderError> {
        let fut = self.build(&req).send();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = fut => result?,
        };

        let status = resp.status().as_u16();
        let headers = ProtocolHeaders::from_reqwest(resp.headers());
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = resp.bytes() => result?,
        };

        Ok(RawResponse { status, headers, body })
    }

    /// `execute_streaming(request) -> (status, headers, async_byte_stream)`
    /// for long-poll / chunked bodies (§4.B.2).
    pub async fn execute_streaming(
        &self,
        req: Request,
        cancel: &CancellationToken,
    ) -> Result<(u16, ProtocolHeaders, ByteStream), ProviderError> {
        let fut = self.build(&req).send();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = fut => result?,
        };

        let status = resp.status().as_u16();
        let headers = ProtocolHeaders::from_reqwest(resp.headers());
        Ok((status, headers, ByteStream::new(resp, cancel.clone())))
    }

    /// `execute_sse(request) -> (status, headers, async_event_stream)`,
    /// decoding `Stream-SSE-Data-Encoding: base64` payloads transparently
    /// (§4.B).
    pub async fn execute_sse(
        &self,
        req: Request,
        cancel: &CancellationToken,
    ) -> Result<(u16, ProtocolHeaders, SseStream), ProviderError> {
        let req = req.accept_sse();
        let fut = self.build(&req).send();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = fut => result?,
        };

        let status = resp.status().as_u16();
        let headers = ProtocolHeaders::from_reqwest(resp.headers());
        let base64 = headers.sse_base64;
        Ok((status, headers, SseStream::new(resp, cancel.clone(), base64)))
    }
}

/// An async byte stream tied to a `ConnectionContext`'s cancel token.
pub struct ByteStream {
    inner: reqwest::Response,
    cancel: CancellationToken,
}

impl ByteStream {
    fn new(inner: reqwest::Response, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }

    /// Read the next chunk, or `Ok(None)` on clean EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ProviderError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
            chunk = self.inner.chunk() => Ok(chunk?),
        }
    }
}

/// A decoded SSE event (control or data), per spec §4.B/§6.1.
#[derive(Debug, Clone)]
pub enum SseEvent {
    Data(Bytes),
    Control {
        next_offset: Offset,
        cursor: Option<String>,
        up_to_date: bool,
    },
}

/// An async SSE event stream tied to a `ConnectionContext`'s cancel
/// token, transparently base64-decoding `data:` payloads when the
/// server advertised `Stream-SSE-Data-Encoding: base64`.
pub struct SseStream {
    inner: reqwest::Response,
    cancel: CancellationToken,
    assembler: SseAssembler,
    base64: bool,
}

impl SseStream {
    fn new(inner: reqwest::Response, cancel: CancellationToken, base64: bool) -> Self {
        Self {
            inner,
            cancel,
            assembler: SseAssembler::new(),
            base64,
        }
    }

    /// Read the next decoded SSE event. Returns `Ok(None)` when the
    /// connection closes cleanly (EOF); callers reconnect per spec §4.G.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, ProviderError> {
        loop {
            if let Some(raw) = self.assembler.next_event() {
                return Ok(Some(self.decode(raw)?));
            }

            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProviderError::Cancelled),
                chunk = self.inner.chunk() => chunk?,
            };

            match chunk {
                Some(bytes) => self.assembler.feed(&bytes),
                None => return Ok(None),
            }
        }
    }

    fn decode(&self, raw: crate::sse::RawSseEvent) -> Result<SseEvent, ProviderError> {
        match raw.event_type.as_deref() {
            Some("control") => {
                let json: serde_json::Value = serde_json::from_str(&raw.data)
                    .map_err(|e| ProviderError::Parse(e.to_string()))?;
                let next_offset = json
                    .get("streamNextOffset")
                    .and_then(|v| v.as_str())
                    .map(Offset::parse)
                    .unwrap_or(Offset::Beginning);
                let cursor = json
                    .get("streamCursor")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let up_to_date = json.get("upToDate").and_then(|v| v.as_bool()).unwrap_or(false);
                Ok(SseEvent::Control {
                    next_offset,
                    cursor,
                    up_to_date,
                })
            }
            _ => {
                let bytes = if self.base64 {
                    use base64::Engine;
                    base64::engine::general_purpose::STANDARD
                        .decode(raw.data.as_bytes())
                        .map_err(|e| ProviderError::Parse(e.to_string()))?
                } else {
                    raw.data.into_bytes()
                };
                Ok(SseEvent::Data(Bytes::from(bytes)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_headers_parse_known_fields() {
        let mut map = ReqHeaderMap::new();
        map.insert(HEADER_STREAM_OFFSET, "abc".parse().unwrap());
        map.insert(HEADER_STREAM_UP_TO_DATE, "true".parse().unwrap());
        map.insert(HEADER_PRODUCER_EPOCH, "4".parse().unwrap());
        let headers = ProtocolHeaders::from_reqwest(&map);
        assert_eq!(headers.next_offset, Some(Offset::at("abc")));
        assert!(headers.up_to_date);
        assert_eq!(headers.producer_epoch, Some(4));
    }

    #[test]
    fn classify_error_maps_403_with_epoch_to_stale_epoch() {
        let mut map = ReqHeaderMap::new();
        map.insert(HEADER_PRODUCER_EPOCH, "9".parse().unwrap());
        let headers = ProtocolHeaders::from_reqwest(&map);
        let err = headers.classify_error(403, "http://x");
        assert!(matches!(err, ProviderError::StaleEpoch { current_epoch: 9 }));
    }

    #[test]
    fn classify_error_maps_409_with_expected_seq_to_sequence_gap() {
        let mut map = ReqHeaderMap::new();
        map.insert(HEADER_PRODUCER_EXPECTED_SEQ, "5".parse().unwrap());
        let headers = ProtocolHeaders::from_reqwest(&map);
        let err = headers.classify_error(409, "http://x");
        assert!(matches!(err, ProviderError::SequenceGap { expected: 5, .. }));
    }
}

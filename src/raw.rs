//! Lower-level raw stream operations (create/append/head/delete),
//! supplementing the Yjs-specific provider with direct access to the
//! wire protocol (spec §6.1) for embedders that need it.
//!
//! The Yjs provider (`provider.rs`) does not use this module for its own
//! append path — it drives the idempotent producer (`producer.rs`)
//! directly — but `create`/`head`/`delete` back the provider's own
//! stream lifecycle needs and are exposed publicly for parity with the
//! wire protocol table.

use crate::client::Client;
use crate::error::ProviderError;
use crate::iterator::ReadBuilder;
use crate::transport::{
    HEADER_CONTENT_TYPE, HEADER_STREAM_OFFSET,
};
use crate::types::Offset;
use bytes::Bytes;
use std::time::Duration;

pub(crate) const HEADER_STREAM_TTL: &str = "stream-ttl";
pub(crate) const HEADER_STREAM_EXPIRES: &str = "stream-expires-at";
pub(crate) const HEADER_ETAG: &str = "etag";

/// A handle to a durable stream.
///
/// This is a lightweight, cloneable object - not a persistent connection.
/// Operations make HTTP requests on demand.
#[derive(Clone, Debug)]
pub struct RawStream {
    pub(crate) url: String,
    pub(crate) client: Client,
    pub(crate) content_type: Option<String>,
}

impl RawStream {
    /// Get the stream URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the content type set on this stream handle.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Set the content type for this stream handle. Affects append
    /// operations and the producer's batch `Content-Type`.
    pub fn set_content_type(&mut self, ct: impl Into<String>) {
        self.content_type = Some(ct.into());
    }

    /// Create the stream.
    ///
    /// Idempotent - succeeds if stream already exists with matching
    /// config. Returns `ProviderError::Conflict` only if config differs.
    pub async fn create(&self) -> Result<(), ProviderError> {
        self.create_with(CreateOptions::default()).await
    }

    pub async fn create_with(&self, options: CreateOptions) -> Result<(), ProviderError> {
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let mut builder = self
            .client
            .inner
            .put(&self.url)
            .header(HEADER_CONTENT_TYPE, content_type);

        if let Some(ttl) = options.ttl {
            builder = builder.header(HEADER_STREAM_TTL, ttl.as_secs().to_string());
        }
        if let Some(expires) = &options.expires_at {
            builder = builder.header(HEADER_STREAM_EXPIRES, expires);
        }
        for (key, value) in self.client.get_headers() {
            builder = builder.header(key, value);
        }
        for (key, value) in &options.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(data) = options.initial_data {
            builder = builder.body(data);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        match status {
            200 | 201 | 204 => Ok(()),
            409 => Err(ProviderError::Conflict),
            _ => Err(ProviderError::from_status(status, &self.url, None, None, None)),
        }
    }

    /// Append data to the stream (not fenced — see `producer()` for
    /// exactly-once semantics).
    pub async fn append(&self, data: impl Into<Bytes>) -> Result<AppendResponse, ProviderError> {
        self.append_with(data, AppendOptions::default()).await
    }

    pub async fn append_with(
        &self,
        data: impl Into<Bytes>,
        options: AppendOptions,
    ) -> Result<AppendResponse, ProviderError> {
        let data = data.into();
        let content_type = self
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let mut builder = self
            .client
            .inner
            .post(&self.url)
            .header(HEADER_CONTENT_TYPE, content_type)
            .body(data);

        if let Some(etag) = &options.if_match {
            builder = builder.header("if-match", etag.as_str());
        }
        for (key, value) in self.client.get_headers() {
            builder = builder.header(key, value);
        }
        for (key, value) in &options.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        match status {
            200 | 204 => {
                let next_offset = resp
                    .headers()
                    .get(HEADER_STREAM_OFFSET)
                    .and_then(|v| v.to_str().ok())
                    .map(Offset::parse)
                    .unwrap_or(Offset::Beginning);
                let etag = resp
                    .headers()
                    .get(HEADER_ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(AppendResponse { next_offset, etag })
            }
            404 => Err(ProviderError::NotFound { url: self.url.clone() }),
            409 => Err(ProviderError::Conflict),
            _ => Err(ProviderError::from_status(status, &self.url, None, None, None)),
        }
    }

    /// Get stream metadata via HEAD request.
    pub async fn head(&self) -> Result<HeadResponse, ProviderError> {
        let mut builder = self.client.inner.head(&self.url);
        for (key, value) in self.client.get_headers() {
            builder = builder.header(key, value);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        match status {
            200 => {
                let next_offset = resp
                    .headers()
                    .get(HEADER_STREAM_OFFSET)
                    .and_then(|v| v.to_str().ok())
                    .map(Offset::parse)
                    .unwrap_or(Offset::Beginning);
                let content_type = resp
                    .headers()
                    .get(HEADER_CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let ttl = resp
                    .headers()
                    .get(HEADER_STREAM_TTL)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                let expires_at = resp
                    .headers()
                    .get(HEADER_STREAM_EXPIRES)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let etag = resp
                    .headers()
                    .get(HEADER_ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                Ok(HeadResponse {
                    next_offset,
                    content_type,
                    ttl,
                    expires_at,
                    etag,
                })
            }
            404 => Err(ProviderError::NotFound { url: self.url.clone() }),
            _ => Err(ProviderError::from_status(status, &self.url, None, None, None)),
        }
    }

    /// Delete the stream.
    pub async fn delete(&self) -> Result<(), ProviderError> {
        let mut builder = self.client.inner.delete(&self.url);
        for (key, value) in self.client.get_headers() {
            builder = builder.header(key, value);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        match status {
            200 | 204 => Ok(()),
            404 => Err(ProviderError::NotFound { url: self.url.clone() }),
            _ => Err(ProviderError::from_status(status, &self.url, None, None, None)),
        }
    }

    /// Create a reader builder for consuming the stream directly
    /// (bypassing the provider's document-engine delivery path).
    pub fn read(&self) -> ReadBuilder {
        ReadBuilder::new(self.clone())
    }

    /// Create a builder for an idempotent producer bound to this stream
    /// (spec §4.C).
    pub fn producer(&self, producer_id: impl Into<String>) -> crate::producer::ProducerBuilder {
        crate::producer::ProducerBuilder::new(
            self.clone(),
            producer_id.into(),
            crate::config::ProducerConfig::default(),
        )
    }

    /// Build a read URL with query parameters.
    pub(crate) fn build_read_url(
        &self,
        offset: &Offset,
        live: Option<&str>,
        cursor: Option<&str>,
    ) -> String {
        let mut url = self.url.clone();
        let mut params = vec![format!("offset={}", offset.to_query_value())];

        if let Some(live) = live {
            params.push(format!("live={}", live));
        }
        if let Some(cursor) = cursor {
            params.push(format!("cursor={}", cursor));
        }

        if url.contains('?') {
            url.push('&');
        } else {
            url.push('?');
        }
        url.push_str(&params.join("&"));
        url
    }
}

/// Options for creating a stream.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct CreateOptions {
    pub content_type: Option<String>,
    pub ttl: Option<Duration>,
    pub expires_at: Option<String>,
    pub headers: Vec<(String, String)>,
    pub initial_data: Option<Bytes>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn initial_data(mut self, data: impl Into<Bytes>) -> Self {
        self.initial_data = Some(data.into());
        self
    }
}

/// Options for appending to a stream.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct AppendOptions {
    pub if_match: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Response from an append operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct AppendResponse {
    pub next_offset: Offset,
    pub etag: Option<String>,
}

/// Response from a HEAD operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct HeadResponse {
    pub next_offset: Offset,
    pub content_type: Option<String>,
    pub ttl: Option<Duration>,
    pub expires_at: Option<String>,
    pub etag: Option<String>,
}

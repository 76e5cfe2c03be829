//! Provider configuration (spec §6.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A header value that is either a fixed string or a per-request supplier
/// (for rotating auth tokens).
#[derive(Clone)]
pub enum HeaderValue {
    Static(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl HeaderValue {
    pub fn resolve(&self) -> String {
        match self {
            HeaderValue::Static(s) => s.clone(),
            HeaderValue::Dynamic(f) => f(),
        }
    }
}

impl std::fmt::Debug for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderValue::Static(s) => f.debug_tuple("Static").field(s).finish(),
            HeaderValue::Dynamic(_) => f.debug_tuple("Dynamic").field(&"<fn>").finish(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Static(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Static(s)
    }
}

/// Producer-specific tuning (spec §4.D, §6.4).
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub auto_claim: bool,
    pub max_batch_bytes: usize,
    pub linger: Duration,
    pub max_in_flight: usize,
    pub max_sequence_gap_retries: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            auto_claim: true,
            max_batch_bytes: 1024 * 1024,
            linger: Duration::from_millis(5),
            max_in_flight: 5,
            max_sequence_gap_retries: 10,
        }
    }
}

/// Top-level provider configuration (spec §6.4).
#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub doc_id: String,
    pub headers: HashMap<String, HeaderValue>,
    pub auto_connect: bool,
    pub producer: ProducerConfig,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("doc_id", &self.doc_id)
            .field("header_names", &self.headers.keys().collect::<Vec<_>>())
            .field("auto_connect", &self.auto_connect)
            .field("producer", &self.producer)
            .finish()
    }
}

/// Error building a `ProviderConfig`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("doc_id contains a rejected path segment ('.' or '..'): {doc_id}")]
    InvalidDocId { doc_id: String },
    #[error("base_url must not be empty")]
    EmptyBaseUrl,
}

/// Builder for `ProviderConfig`, in the teacher's chainable style.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ProviderConfigBuilder {
    base_url: Option<String>,
    doc_id: Option<String>,
    headers: HashMap<String, HeaderValue>,
    auto_connect: bool,
    producer: ProducerConfig,
}

impl ProviderConfigBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            doc_id: None,
            headers: HashMap::new(),
            auto_connect: true,
            producer: ProducerConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn doc_id(mut self, id: impl Into<String>) -> Self {
        self.doc_id = Some(id.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header_fn<F>(mut self, key: impl Into<String>, supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.headers
            .insert(key.into(), HeaderValue::Dynamic(Arc::new(supplier)));
        self
    }

    /// If `false`, construction does not auto-connect (spec §6.4 `connect`).
    pub fn connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn auto_claim(mut self, enabled: bool) -> Self {
        self.producer.auto_claim = enabled;
        self
    }

    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.producer.max_batch_bytes = bytes;
        self
    }

    pub fn linger(mut self, duration: Duration) -> Self {
        self.producer.linger = duration;
        self
    }

    pub fn max_in_flight(mut self, count: usize) -> Self {
        self.producer.max_in_flight = count;
        self
    }

    pub fn max_sequence_gap_retries(mut self, retries: u32) -> Self {
        self.producer.max_sequence_gap_retries = retries;
        self
    }

    pub fn build(self) -> Result<ProviderConfig, ConfigError> {
        let base_url = self.base_url.ok_or(ConfigError::EmptyBaseUrl)?;
        if base_url.is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        let doc_id = self.doc_id.unwrap_or_default();
        let doc_id = normalize_doc_id(&doc_id)?;

        Ok(ProviderConfig {
            base_url,
            doc_id,
            headers: self.headers,
            auto_connect: self.auto_connect,
            producer: self.producer,
        })
    }
}

impl Default for ProviderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate and normalize a `doc_id` (spec §6.4):
/// - MAY contain `/`.
/// - `.` and `..` segments MUST be rejected after URL decode.
/// - Repeated slashes are collapsed.
pub fn normalize_doc_id(doc_id: &str) -> Result<String, ConfigError> {
    let decoded = percent_decode(doc_id);

    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        if segment.is_empty() {
            continue; // collapse repeated slashes
        }
        if segment == "." || segment == ".." {
            return Err(ConfigError::InvalidDocId {
                doc_id: doc_id.to_string(),
            });
        }
        segments.push(segment);
    }

    Ok(segments.join("/"))
}

/// Minimal percent-decoder sufficient for path-segment validation; this
/// is not a general URL decoder and does not touch query strings.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(normalize_doc_id("a//b///c").unwrap(), "a/b/c");
    }

    #[test]
    fn rejects_dot_segment() {
        assert!(normalize_doc_id("a/./b").is_err());
    }

    #[test]
    fn rejects_dotdot_segment() {
        assert!(normalize_doc_id("a/../b").is_err());
    }

    #[test]
    fn rejects_percent_encoded_dotdot() {
        assert!(normalize_doc_id("a/%2e%2e/b").is_err());
    }

    #[test]
    fn keeps_ordinary_segments_with_dots_inside() {
        assert_eq!(normalize_doc_id("a/file.txt").unwrap(), "a/file.txt");
    }

    #[test]
    fn builder_requires_base_url() {
        let result = ProviderConfigBuilder::new().doc_id("x").build();
        assert!(matches!(result, Err(ConfigError::EmptyBaseUrl)));
    }

    #[test]
    fn builder_defaults_producer_config() {
        let cfg = ProviderConfigBuilder::new()
            .base_url("https://example.com")
            .build()
            .unwrap();
        assert!(cfg.producer.auto_claim);
        assert_eq!(cfg.producer.max_in_flight, 5);
        assert!(cfg.auto_connect);
    }

    #[test]
    fn dynamic_header_is_resolved_per_call() {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let c = counter.clone();
        let hv = HeaderValue::Dynamic(Arc::new(move || {
            let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("token-{n}")
        }));
        assert_eq!(hv.resolve(), "token-0");
        assert_eq!(hv.resolve(), "token-1");
    }
}

//! Connection-pooled HTTP client shared by the raw stream API and the
//! provider's transport.

use crate::config::HeaderValue;
use crate::error::InvalidHeaderError;
use crate::raw::RawStream;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A Durable Streams client.
///
/// The client is cloneable and can be shared across threads. It manages
/// connection pooling; no network request is made until an operation is
/// called.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: reqwest::Client,
    pub(crate) base_url: Option<String>,
    pub(crate) default_headers: HashMap<String, HeaderValue>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("header_names", &self.default_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Client {
    /// Create a new client with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build. Use `Client::builder().build()`
    /// for fallible construction.
    pub fn new() -> Self {
        ClientBuilder::new()
            .build()
            .expect("failed to build default HTTP client")
    }

    /// Create a client builder for customization.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a stream handle for the given URL.
    ///
    /// The url can be:
    /// - A full URL: `"https://example.com/streams/my-stream"`.
    /// - A path (if `base_url` was set): `"/streams/my-stream"`.
    pub fn stream(&self, url: &str) -> RawStream {
        let full_url = self.resolve_url(url);
        RawStream {
            url: full_url,
            client: self.clone(),
            content_type: None,
        }
    }

    pub(crate) fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if let Some(base) = &self.base_url {
            format!("{}{}", base.trim_end_matches('/'), url)
        } else {
            url.to_string()
        }
    }

    /// Resolve all configured headers for a request (static + dynamic).
    pub(crate) fn get_headers(&self) -> Vec<(String, String)> {
        self.default_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve()))
            .collect()
    }

    /// Build a transport bound to this client's connection pool.
    pub(crate) fn transport(&self) -> Transport {
        Transport::new(self.inner.clone())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring a `Client`.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ClientBuilder {
    base_url: Option<String>,
    default_headers: HashMap<String, HeaderValue>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Set the base URL for relative paths.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add a default header for all requests. Accepts a static string or
    /// a per-request supplier closure (spec §6.4 — rotating auth tokens).
    pub fn default_header(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.default_headers.insert(key.to_string(), value.into());
        self
    }

    /// Add a default header, validating the name eagerly.
    ///
    /// Use this instead of [`default_header`](Self::default_header) when
    /// you need to know header configuration failed before any request
    /// is made.
    pub fn try_default_header(
        mut self,
        key: &str,
        value: &str,
    ) -> std::result::Result<Self, InvalidHeaderError> {
        reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| InvalidHeaderError::InvalidName(key.to_string()))?;
        reqwest::header::HeaderValue::from_str(value)
            .map_err(|_| InvalidHeaderError::InvalidValue(value.to_string()))?;
        self.default_headers
            .insert(key.to_string(), HeaderValue::Static(value.to_string()));
        Ok(self)
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    ///
    /// Returns an error if the underlying HTTP client fails to build
    /// (e.g., due to TLS configuration issues).
    pub fn build(self) -> Result<Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            // Snapshot discovery (§4.E) depends on observing a raw 307
            // and its `Location` header; auto-following would hide it.
            .redirect(reqwest::redirect::Policy::none());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let inner = builder.build()?;

        Ok(Client {
            inner,
            base_url: self.base_url,
            default_headers: self.default_headers,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_against_base_url() {
        let client = ClientBuilder::new()
            .base_url("https://example.com/")
            .build()
            .unwrap();
        assert_eq!(
            client.resolve_url("/streams/x"),
            "https://example.com/streams/x"
        );
    }

    #[test]
    fn leaves_absolute_urls_untouched() {
        let client = Client::new();
        assert_eq!(
            client.resolve_url("https://other.example/x"),
            "https://other.example/x"
        );
    }
}

//! Snapshot discovery (spec §4.E): resolve the `snapshot` sentinel to a
//! concrete starting offset, downloading the snapshot body when one
//! exists.

use crate::error::ProviderError;
use crate::transport::{Request, Transport};
use crate::types::Offset;
use bytes::Bytes;
use http::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of snapshot discovery: the offset updates tailing must resume
/// from, plus the snapshot body to seed the document engine with, if any.
pub struct DiscoveryResult {
    pub start_offset: Offset,
    pub snapshot: Option<Bytes>,
}

/// Run the discovery algorithm against `url` (spec §4.E steps 1-4).
pub async fn discover(
    transport: &Transport,
    url: &str,
    headers: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<DiscoveryResult, ProviderError> {
    loop {
        let req = build_request(url, "snapshot", headers);
        let resp = transport.execute(req, cancel).await?;

        if resp.status != 307 {
            return Err(resp.headers.classify_error(resp.status, url));
        }

        let location = resp.headers.location.as_deref().ok_or_else(|| {
            ProviderError::Parse("307 redirect missing Location header".to_string())
        })?;
        let offset_value = extract_offset_param(location).ok_or_else(|| {
            ProviderError::Parse(format!("no offset query parameter in Location: {location}"))
        })?;

        if !offset_value.ends_with("_snapshot") {
            return Ok(DiscoveryResult {
                start_offset: Offset::parse(&offset_value),
                snapshot: None,
            });
        }

        debug!(offset = %offset_value, "downloading snapshot body");
        let req = build_request(url, &offset_value, headers);
        let resp = transport.execute(req, cancel).await?;

        match resp.status {
            200 => {
                let start_offset = resp
                    .headers
                    .next_offset
                    .unwrap_or_else(|| Offset::parse(&offset_value));
                return Ok(DiscoveryResult {
                    start_offset,
                    snapshot: Some(resp.body),
                });
            }
            404 => {
                debug!("snapshot deleted mid-race, restarting discovery");
                continue;
            }
            status => return Err(resp.headers.classify_error(status, url)),
        }
    }
}

fn build_request(url: &str, offset: &str, headers: &[(String, String)]) -> Request {
    let full_url = format!(
        "{url}{sep}offset={offset}",
        sep = if url.contains('?') { "&" } else { "?" }
    );
    let mut req = Request::new(Method::GET, full_url);
    for (k, v) in headers {
        req = req.header(k.clone(), v.clone());
    }
    req
}

/// Extract the `offset` query parameter's raw value from a redirect
/// `Location` (absolute or relative URL).
fn extract_offset_param(location: &str) -> Option<String> {
    let query = location.split_once('?')?.1;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("offset=") {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_offset_from_absolute_location() {
        let loc = "https://example.com/streams/x?offset=42_snapshot";
        assert_eq!(extract_offset_param(loc).as_deref(), Some("42_snapshot"));
    }

    #[test]
    fn extracts_offset_among_multiple_params() {
        let loc = "/streams/x?foo=bar&offset=-1&baz=qux";
        assert_eq!(extract_offset_param(loc).as_deref(), Some("-1"));
    }

    #[test]
    fn returns_none_without_offset_param() {
        let loc = "/streams/x?foo=bar";
        assert_eq!(extract_offset_param(loc), None);
    }
}

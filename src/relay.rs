//! Upstream relay: forwards an intercepted request to the real upstream
//! host and streams the response back.

use std::time::Duration;

use bytes::Bytes;

use crate::recording::{BodyKind, RecordedResponse};
use crate::request::IncomingRequest;

/// Headers that must not be forwarded across a proxy hop (RFC 7230 §6.1)
/// plus `host`, which is rebuilt from the upstream's own host name.
const HOP_BY_HOP: &[&str] = &[
    "connection", "keep-alive", "proxy-authenticate", "proxy-authorization",
    "te", "trailer", "transfer-encoding", "upgrade", "host",
];

/// The result of a successful relay: enough to both write the client
/// response and build a [`RecordedContext`](crate::recording::RecordedContext).
pub struct RelayedResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RelayedResponse {
    pub fn body_kind(&self) -> BodyKind {
        let content_type = self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        BodyKind::from_content_type(content_type)
    }

    pub fn into_recorded(self) -> RecordedResponse {
        let body_kind = self.body_kind();
        RecordedResponse {
            status_code: self.status_code,
            headers: self.headers,
            body: self.body,
            body_kind,
        }
    }
}

/// Forwards `request` to `scheme://host` + the request's path and query,
/// relaying method, non-hop-by-hop headers, and body.
///
/// Connection or read failures are surfaced as
/// [`crate::error::Error::UpstreamFailure`]; callers (the pipeline) turn
/// this into a `502 Bad Gateway` response rather than propagating it.
pub async fn relay(
    client: &reqwest::Client,
    host: &str,
    use_secure_transport: bool,
    request: &IncomingRequest,
) -> crate::error::Result<RelayedResponse> {
    let target = build_target_url(host, use_secure_transport, request);

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| crate::error::Error::UpstreamFailure(format!(
            "invalid method {}: {e}", request.method
        )))?;

    let mut builder = client.request(method, &target);
    for (name, value) in &request.headers {
        if HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    let response = builder.send().await.map_err(|e| {
        crate::error::Error::UpstreamFailure(format!("request to {target} failed: {e}"))
    })?;

    let status_code = response.status().as_u16();
    let headers = response.headers().iter()
        .map(|(name, value)| {
            (name.to_string(), value.to_str().unwrap_or("").to_string())
        })
        .collect();
    let body = response.bytes().await.map_err(|e| {
        crate::error::Error::UpstreamFailure(format!("reading response from {target}: {e}"))
    })?;

    Ok(RelayedResponse { status_code, headers, body })
}

/// Builds the upstream target URL via [`url::Url`] rather than raw string
/// concatenation, so host parsing/escaping follows the same rules as the
/// rest of the pack's `url`-based config handling rather than a bespoke
/// format string.
fn build_target_url(
    host: &str, use_secure_transport: bool, request: &IncomingRequest,
) -> String {
    let scheme = if use_secure_transport { "https" } else { "http" };
    let mut url = url::Url::parse(&format!("{scheme}://{host}"))
        .unwrap_or_else(|_| url::Url::parse("http://invalid.invalid").unwrap());
    url.set_path(&request.path);
    url.set_query(request.query.as_deref());
    url.to_string()
}

/// Builds the [`reqwest::Client`] used by an instance's relay.
///
/// A sane default connect/read timeout is applied since the source this
/// spec is distilled from has none (spec §9's open question); we pick 10s
/// connect / 30s total, generous enough for a local mocked upstream
/// without letting a hung connection wedge the pipeline indefinitely.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("relay HTTP client configuration is valid")
}

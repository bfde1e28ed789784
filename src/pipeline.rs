//! The request pipeline: stump-match, then upstream relay, then fallback.
//!
//! Kept as small, composable free functions operating on an [`Instance`]'s
//! collaborators rather than a trait hierarchy -- the same preference
//! rtrtr shows for its per-request hot path (`http::Server::handle_request`)
//! over building an object graph for something this short-lived.

use bytes::Bytes;
use chrono::Utc;

use crate::instance::{FallbackResponse, Instance};
use crate::recording::{BodyKind, RecordedContext, RecordedResponse};
use crate::request::IncomingRequest;

/// Which stage terminated the pipeline, used to pick the right counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Stump,
    Proxy,
    Fallback,
}

/// The response to write back to the client, with enough metadata to
/// update counters and the recording buffer afterwards.
pub struct ServedResponse {
    pub outcome: Outcome,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Runs the pipeline for one request against `instance`.
///
/// Stage A (stump match) only runs if stumps are enabled. Stage B
/// (upstream relay) only runs if the instance has a configured external
/// host. Stage C (fallback) always terminates if the earlier stages pass.
pub async fn serve(instance: &Instance, request: IncomingRequest) -> ServedResponse {
    if instance.stumps_enabled() {
        if let Some(response) = match_stump(instance, &request) {
            return response;
        }
    }

    if let Some(host) = instance.external_host_name() {
        match crate::relay::relay(
            instance.http_client(), &host, instance.use_secure_transport_upstream(), &request,
        ).await {
            Ok(relayed) => {
                return ServedResponse {
                    outcome: Outcome::Proxy,
                    status_code: relayed.status_code,
                    headers: relayed.headers,
                    body: relayed.body,
                };
            }
            Err(err) => {
                log::warn!("upstream relay failed for instance {}: {err}", instance.id());
                return bad_gateway();
            }
        }
    }

    fallback(instance.fallback_response())
}

/// Stage A: iterate stumps in insertion order, returning the first match.
fn match_stump(instance: &Instance, request: &IncomingRequest) -> Option<ServedResponse> {
    for stump in instance.stump_registry().find_all_contracts() {
        if stump.is_match(request) {
            // `is_match` already guarantees `response()` is `Some`.
            let response = stump.response().expect("matching stump always has a response");
            return Some(ServedResponse {
                outcome: Outcome::Stump,
                status_code: response.status_code,
                headers: response.headers.clone(),
                body: response.body.clone(),
            });
        }
    }
    None
}

fn bad_gateway() -> ServedResponse {
    ServedResponse {
        outcome: Outcome::Proxy,
        status_code: 502,
        headers: Vec::new(),
        body: Bytes::new(),
    }
}

/// Stage C: the synthetic fallback response, empty body.
fn fallback(kind: FallbackResponse) -> ServedResponse {
    let status_code = match kind {
        FallbackResponse::Http404NotFound => 404,
        FallbackResponse::Http503ServiceUnavailable => 503,
    };
    ServedResponse {
        outcome: Outcome::Fallback,
        status_code,
        headers: Vec::new(),
        body: Bytes::new(),
    }
}

/// Builds the [`RecordedContext`] for a served request, classifying the
/// response body from its `Content-Type` header.
pub fn record(request: IncomingRequest, served: &ServedResponse) -> RecordedContext {
    let content_type = served.headers.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    RecordedContext {
        request,
        response: RecordedResponse {
            status_code: served.status_code,
            headers: served.headers.clone(),
            body: served.body.clone(),
            body_kind: BodyKind::from_content_type(content_type),
        },
        received_at: Utc::now(),
    }
}

//! The request value seen by match rules and the pipeline.
//!
//! This is deliberately decoupled from `hyper::Request` so that rules and
//! the pipeline can be exercised without standing up a real listener, and
//! so the snapshot handed to a stump's rules is stable for the lifetime of
//! one request even while [`crate::registry::StumpRegistry`] is mutated
//! concurrently (see spec §5's ordering guarantees).

use bytes::Bytes;

/// An immutable snapshot of an incoming HTTP request.
#[derive(Clone, Debug)]
pub struct IncomingRequest {
    /// The HTTP method, upper-cased (`GET`, `POST`, ...).
    pub method: String,

    /// The request path, e.g. `/a/b`. Never includes the query string.
    pub path: String,

    /// The raw query string, if any, without the leading `?`.
    pub query: Option<String>,

    /// Request headers in wire order. Names are compared
    /// case-insensitively by rules; duplicates are preserved.
    pub headers: Vec<(String, String)>,

    /// The request body.
    pub body: Bytes,
}

impl IncomingRequest {
    /// Returns the value of the first header matching `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if any header named `name` is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the body interpreted as UTF-8, lossily.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

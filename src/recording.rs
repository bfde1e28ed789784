//! The recording buffer: an ordered, append-only log of served traffic.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::request::IncomingRequest;

/// Coarse classification of a response body, advisory only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyKind {
    Text,
    Image,
    Binary,
}

impl BodyKind {
    /// Classifies a body from its `Content-Type` header value.
    ///
    /// Images are `image/*`; text covers `text/*` plus a handful of
    /// textual structured formats; everything else is binary. This
    /// judgement call is explicitly non-load-bearing per spec §4.4.
    pub fn from_content_type(content_type: &str) -> Self {
        let content_type = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
        if content_type.starts_with("image/") {
            BodyKind::Image
        } else if content_type.starts_with("text/")
            || content_type == "application/json"
            || content_type == "application/xml"
            || content_type == "application/javascript"
            || content_type.ends_with("+json")
            || content_type.ends_with("+xml")
        {
            BodyKind::Text
        } else {
            BodyKind::Binary
        }
    }
}

/// The response half of a recorded context.
#[derive(Clone, Debug)]
pub struct RecordedResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
    pub body_kind: BodyKind,
}

/// An immutable snapshot of one served request/response pair.
#[derive(Clone, Debug)]
pub struct RecordedContext {
    pub request: IncomingRequest,
    pub response: RecordedResponse,
    pub received_at: DateTime<Utc>,
}

/// An ordered, append-only, concurrently readable log of recorded contexts.
pub struct RecordingBuffer {
    entries: RwLock<Vec<RecordedContext>>,
}

impl Default for RecordingBuffer {
    fn default() -> Self {
        RecordingBuffer { entries: RwLock::new(Vec::new()) }
    }
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a context. Concurrent appenders serialize on the write lock;
    /// observation order equals append (arrival) order.
    pub fn append(&self, context: RecordedContext) {
        self.entries.write().unwrap().push(context);
    }

    /// Returns a stable snapshot of all recorded contexts in arrival order.
    pub fn snapshot(&self) -> Vec<RecordedContext> {
        self.entries.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically truncates the buffer to empty.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RecordedContext {
        RecordedContext {
            request: IncomingRequest {
                method: "GET".into(),
                path: "/a".into(),
                query: None,
                headers: Vec::new(),
                body: bytes::Bytes::new(),
            },
            response: RecordedResponse {
                status_code: 200,
                headers: Vec::new(),
                body: bytes::Bytes::new(),
                body_kind: BodyKind::Text,
            },
            received_at: Utc::now(),
        }
    }

    #[test]
    fn body_kind_classification() {
        assert_eq!(BodyKind::from_content_type("image/png"), BodyKind::Image);
        assert_eq!(BodyKind::from_content_type("text/plain"), BodyKind::Text);
        assert_eq!(
            BodyKind::from_content_type("application/json; charset=utf-8"),
            BodyKind::Text
        );
        assert_eq!(
            BodyKind::from_content_type("application/octet-stream"),
            BodyKind::Binary
        );
    }

    #[test]
    fn append_preserves_arrival_order_and_clear_empties() {
        let buffer = RecordingBuffer::new();
        buffer.append(ctx());
        buffer.append(ctx());
        assert_eq!(buffer.len(), 2);
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let buffer = RecordingBuffer::new();
        buffer.append(ctx());
        let snapshot = buffer.snapshot();
        buffer.append(ctx());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }
}

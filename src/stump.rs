//! A stump: a named unit of ordered match rules plus a canned response.

use crate::error::{Error, Result};
use crate::request::IncomingRequest;
use crate::rules::MatchRule;

/// An opaque, non-empty identifier for a stump, unique within an instance.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StumpId(String);

impl StumpId {
    /// Builds a `StumpId` from a caller-supplied value.
    ///
    /// Fails with [`Error::InvalidArgument`] if `value` is empty or
    /// whitespace-only.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::invalid_argument("stump id must not be empty"));
        }
        Ok(StumpId(value))
    }

    /// Generates a fresh id with enough entropy to avoid collision within
    /// an instance.
    pub fn generate() -> Self {
        StumpId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StumpId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-empty stump name, compared case-insensitively for uniqueness.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StumpName(String);

impl StumpName {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::invalid_argument("stump name must not be empty"));
        }
        Ok(StumpName(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key used for case-insensitive uniqueness comparisons.
    pub fn fold_key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl std::fmt::Display for StumpName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A canned response served by a matching stump.
#[derive(Clone, Debug)]
pub struct CannedResponse {
    pub status_code: u16,
    pub status_description: String,
    /// Ordered, possibly duplicate, header (name, value) pairs.
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
    pub body_content_type: String,
    pub body_is_image: bool,
    pub body_is_text: bool,
}

impl CannedResponse {
    /// Builds a response, validating that `status_code` is in `100..=599`.
    pub fn new(status_code: u16, body: impl Into<bytes::Bytes>) -> Result<Self> {
        if !(100..=599).contains(&status_code) {
            return Err(Error::invalid_argument(format!(
                "status code {status_code} out of range 100-599"
            )));
        }
        Ok(CannedResponse {
            status_code,
            status_description: String::new(),
            headers: Vec::new(),
            body: body.into(),
            body_content_type: String::new(),
            body_is_image: false,
            body_is_text: false,
        })
    }

    pub fn with_header(
        mut self, name: impl Into<String>, value: impl Into<String>,
    ) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A named unit: an ordered set of match rules plus a canned response.
///
/// Invariant: a stump with zero rules, or whose response has not been set,
/// can never match (see [`Stump::is_match`]).
#[derive(Debug)]
pub struct Stump {
    id: StumpId,
    name: StumpName,
    rules: Vec<Box<dyn MatchRule>>,
    response: Option<CannedResponse>,
}

impl Stump {
    pub fn new(id: StumpId, name: StumpName) -> Self {
        Stump { id, name, rules: Vec::new(), response: None }
    }

    pub fn id(&self) -> &StumpId {
        &self.id
    }

    pub fn name(&self) -> &StumpName {
        &self.name
    }

    /// Appends a rule to the end of the rule sequence.
    pub fn add_rule(&mut self, rule: Box<dyn MatchRule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Box<dyn MatchRule>] {
        &self.rules
    }

    pub fn response(&self) -> Option<&CannedResponse> {
        self.response.as_ref()
    }

    /// Sets the canned response. `response` must be present; this method
    /// exists mainly so a future `Option<CannedResponse>` setter from an
    /// administrative layer has a single validated entry point.
    pub fn set_response(&mut self, response: CannedResponse) {
        self.response = Some(response);
    }

    /// Returns `true` iff the stump has at least one rule, a response is
    /// set, and every rule matches `request`.
    ///
    /// All rules are evaluated -- no short-circuiting -- because rules may
    /// have observable side effects that tests rely on (spec invariant 3).
    pub fn is_match(&self, request: &IncomingRequest) -> bool {
        if self.rules.is_empty() || self.response.is_none() {
            return false;
        }
        let mut all_matched = true;
        for rule in &self.rules {
            if !rule.matches(request) {
                all_matched = false;
            }
        }
        all_matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MethodEquals;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn req() -> IncomingRequest {
        IncomingRequest {
            method: "GET".into(),
            path: "/a".into(),
            query: None,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
        }
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(StumpId::new("").is_err());
        assert!(StumpId::new("   ").is_err());
    }

    #[test]
    fn stump_with_no_rules_never_matches() {
        let mut stump = Stump::new(StumpId::generate(), StumpName::new("a").unwrap());
        stump.set_response(CannedResponse::new(200, "ok").unwrap());
        assert!(!stump.is_match(&req()));
    }

    #[test]
    fn stump_with_no_response_never_matches() {
        let mut stump = Stump::new(StumpId::generate(), StumpName::new("a").unwrap());
        stump.add_rule(Box::new(MethodEquals { method: "GET".into() }));
        assert!(!stump.is_match(&req()));
    }

    #[test]
    fn stump_matches_iff_all_rules_match() {
        let mut stump = Stump::new(StumpId::generate(), StumpName::new("a").unwrap());
        stump.add_rule(Box::new(MethodEquals { method: "GET".into() }));
        stump.set_response(CannedResponse::new(200, "ok").unwrap());
        assert!(stump.is_match(&req()));

        stump.add_rule(Box::new(MethodEquals { method: "POST".into() }));
        assert!(!stump.is_match(&req()));
    }

    /// A rule whose side effect (an invocation counter) is observed after
    /// matching, used to assert no short-circuiting happens.
    #[derive(Debug)]
    struct CountingRule {
        calls: AtomicUsize,
        result: AtomicBool,
    }

    impl MatchRule for CountingRule {
        fn matches(&self, _request: &IncomingRequest) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.load(Ordering::SeqCst)
        }

        fn describe(&self) -> String {
            "counting rule".into()
        }
    }

    #[test]
    fn both_rules_are_invoked_exactly_once_regardless_of_outcome() {
        let first = Arc::new(CountingRule {
            calls: AtomicUsize::new(0),
            result: AtomicBool::new(false),
        });
        let second = Arc::new(CountingRule {
            calls: AtomicUsize::new(0),
            result: AtomicBool::new(true),
        });

        let mut stump = Stump::new(StumpId::generate(), StumpName::new("a").unwrap());
        stump.add_rule(Box::new(first.clone()));
        stump.add_rule(Box::new(second.clone()));
        stump.set_response(CannedResponse::new(200, "ok").unwrap());

        assert!(!stump.is_match(&req()));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }
}

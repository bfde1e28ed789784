//! Match rules: independent predicates over an [`IncomingRequest`].
//!
//! A [`Stump`](crate::stump::Stump) is the logical AND of an ordered
//! sequence of rules. Rules are deliberately a trait object
//! (`Box<dyn MatchRule>`) rather than a closed enum, mirroring the way
//! rtrtr treats [`crate::http`]'s `ProcessRequest` and metrics' `Source` as
//! open trait objects elsewhere in the pack -- the set of match strategies
//! is meant to grow without touching the stump or registry.

use std::fmt;

use regex::Regex;

use crate::request::IncomingRequest;

/// A predicate over an HTTP request.
///
/// Implementations must not short-circuit evaluation based on expected
/// outcome: callers (notably [`crate::stump::Stump::is_match`]) rely on
/// every rule actually being invoked once per request, because rules may
/// have observable side effects useful for testing.
pub trait MatchRule: Send + Sync + fmt::Debug {
    /// Returns whether this rule matches the given request.
    fn matches(&self, request: &IncomingRequest) -> bool;

    /// A short human-readable description, e.g. for diagnostics.
    fn describe(&self) -> String;
}

/// Matches when the request's HTTP method equals `method`, case-insensitive.
#[derive(Debug, Clone)]
pub struct MethodEquals {
    pub method: String,
}

impl MatchRule for MethodEquals {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.method.eq_ignore_ascii_case(&self.method)
    }

    fn describe(&self) -> String {
        format!("method equals {}", self.method)
    }
}

/// Matches when the request path equals `path` exactly.
#[derive(Debug, Clone)]
pub struct PathEquals {
    pub path: String,
}

impl MatchRule for PathEquals {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.path == self.path
    }

    fn describe(&self) -> String {
        format!("path equals {}", self.path)
    }
}

/// Matches when the request path matches a glob pattern (`*` and `?`
/// wildcards). The pattern is compiled once at construction time into a
/// regular expression, the same approach the pack's `rift` proxy uses for
/// its `except` patterns.
pub struct PathGlob {
    pattern: String,
    regex: Regex,
}

impl PathGlob {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^{}$", glob_to_regex(&pattern)))
            .expect("glob pattern compiles to a valid regex");
        PathGlob { pattern, regex }
    }
}

impl MatchRule for PathGlob {
    fn matches(&self, request: &IncomingRequest) -> bool {
        self.regex.is_match(&request.path)
    }

    fn describe(&self) -> String {
        format!("path glob {}", self.pattern)
    }
}

impl fmt::Debug for PathGlob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PathGlob").field("pattern", &self.pattern).finish()
    }
}

/// Matches when the raw query string equals `query` exactly.
#[derive(Debug, Clone)]
pub struct QueryEquals {
    pub query: String,
}

impl MatchRule for QueryEquals {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.query.as_deref() == Some(self.query.as_str())
    }

    fn describe(&self) -> String {
        format!("query equals {}", self.query)
    }
}

/// Matches when a header named `name` is present, regardless of value.
#[derive(Debug, Clone)]
pub struct HeaderExists {
    pub name: String,
}

impl MatchRule for HeaderExists {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.has_header(&self.name)
    }

    fn describe(&self) -> String {
        format!("header {} exists", self.name)
    }
}

/// Matches when a header named `name` has exactly value `value`.
#[derive(Debug, Clone)]
pub struct HeaderEquals {
    pub name: String,
    pub value: String,
}

impl MatchRule for HeaderEquals {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.header(&self.name) == Some(self.value.as_str())
    }

    fn describe(&self) -> String {
        format!("header {} equals {}", self.name, self.value)
    }
}

/// Matches when the request body contains `text` as a substring.
#[derive(Debug, Clone)]
pub struct BodyContainsText {
    pub text: String,
}

impl MatchRule for BodyContainsText {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.body_text().contains(&self.text)
    }

    fn describe(&self) -> String {
        format!("body contains {}", self.text)
    }
}

/// Matches when the request body is exactly `length` bytes long.
#[derive(Debug, Clone)]
pub struct BodyLengthEquals {
    pub length: usize,
}

impl MatchRule for BodyLengthEquals {
    fn matches(&self, request: &IncomingRequest) -> bool {
        request.body.len() == self.length
    }

    fn describe(&self) -> String {
        format!("body length equals {}", self.length)
    }
}

impl<T: MatchRule> MatchRule for std::sync::Arc<T> {
    fn matches(&self, request: &IncomingRequest) -> bool {
        (**self).matches(request)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Translates a small glob dialect (`*` = any run of characters, `?` = any
/// single character) into an equivalent regex fragment.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(&ch.to_string())),
        }
    }
    out
}

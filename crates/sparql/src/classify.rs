//! Error Normalizer: maps raw failure signals onto the closed [`ErrorCode`]
//! taxonomy.
//!
//! Classification walks an ordered rule table and the first match wins.
//! HTTP status rules come first, then transport exceptions, then substring
//! patterns seen in endpoint error bodies. The pattern lists cover the
//! dialects observed from Blazegraph/WDQS-style endpoints and are best-effort,
//! not exhaustive; anything unmatched becomes `UNKNOWN` with the raw message
//! kept in the hint.

use std::fmt;

use kg_core::{Classified, ErrorCode};

use crate::transport::TransportError;

/// Endpoint parser / compiler error fragments (lowercase).
const SYNTAX_PATTERNS: &[&str] = &[
    "parse error",
    "syntax error",
    "malformedqueryexception",
    "malformed query",
    "lexical error",
    "encountered \"",
    "was expecting",
    "sp030",
    "sparql compiler",
    "unknown prefix",
    "undefined prefix",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeoutexception",
    "query timeout",
    "timeout",
    "timed out",
    "deadline exceeded",
    "execution time",
    "took too long",
];

const THROTTLE_PATTERNS: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "throttl",
    "you have been banned",
    "request rate",
    "maxlag",
];

const SERVER_PATTERNS: &[&str] = &[
    "internal server error",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "java.lang.",
];

/// Upper bound on raw text echoed back in an `UNKNOWN` hint.
const MAX_RAW_IN_HINT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Other,
}

/// A raw failure as observed by the execution pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// Non-2xx response.
    Http { status: u16, body: String },
    /// No response at all.
    Transport { kind: TransportKind, message: String },
    /// 2xx response that is not SPARQL JSON results. `body` is what the
    /// endpoint actually sent, which may be a throttling or error page.
    Malformed { message: String, body: String },
    /// A bare message with no status, e.g. from `normalize_error`.
    Message(String),
}

impl FailureSignal {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Http { body, .. } => body,
            Self::Transport { message, .. } => message,
            Self::Malformed { message, body } => {
                if body.trim().is_empty() {
                    message
                } else {
                    body
                }
            }
            Self::Message(m) => m,
        }
    }
}

impl fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { status, body } => write!(f, "HTTP {status}: {}", truncate(body, MAX_RAW_IN_HINT)),
            Self::Transport { kind, message } => write!(f, "transport {kind:?}: {message}"),
            Self::Malformed { message, body } => {
                write!(f, "malformed response ({message}): {}", truncate(body, MAX_RAW_IN_HINT))
            }
            Self::Message(m) => f.write_str(m),
        }
    }
}

impl From<&TransportError> for FailureSignal {
    fn from(err: &TransportError) -> Self {
        let kind = match err {
            TransportError::Timeout(_) => TransportKind::Timeout,
            TransportError::Connect(_) => TransportKind::Connect,
            TransportError::Other(_) => TransportKind::Other,
        };
        Self::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

fn contains_any(text: &str, patterns: &[&str]) -> bool {
    let lower = text.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

fn is_server_status(s: &FailureSignal) -> bool {
    s.status().is_some_and(|code| (500..600).contains(&code))
}

type Predicate = fn(&FailureSignal) -> bool;

/// One row of the classification table.
pub struct Rule {
    pub name: &'static str,
    pub code: ErrorCode,
    predicate: Predicate,
}

impl Rule {
    pub fn matches(&self, signal: &FailureSignal) -> bool {
        (self.predicate)(signal)
    }
}

/// Ordered rule table. Order matters: a 504 whose body mentions a timeout
/// exception is a TIMEOUT, any other 5xx is ENDPOINT_ERROR.
pub const RULES: &[Rule] = &[
    Rule {
        name: "http-429",
        code: ErrorCode::RateLimit,
        predicate: |s| s.status() == Some(429),
    },
    Rule {
        name: "throttle-body",
        code: ErrorCode::RateLimit,
        predicate: |s| s.status().is_some() && contains_any(s.text(), THROTTLE_PATTERNS),
    },
    Rule {
        name: "5xx-timeout",
        code: ErrorCode::Timeout,
        predicate: |s| is_server_status(s) && contains_any(s.text(), TIMEOUT_PATTERNS),
    },
    Rule {
        name: "http-5xx",
        code: ErrorCode::EndpointError,
        predicate: is_server_status,
    },
    Rule {
        name: "http-400-parser",
        code: ErrorCode::Syntax,
        predicate: |s| matches!(s.status(), Some(400 | 422)) && contains_any(s.text(), SYNTAX_PATTERNS),
    },
    Rule {
        name: "transport-timeout",
        code: ErrorCode::Timeout,
        predicate: |s| {
            matches!(s, FailureSignal::Transport { kind: TransportKind::Timeout, .. }) || s.status() == Some(408)
        },
    },
    Rule {
        name: "syntax-text",
        code: ErrorCode::Syntax,
        predicate: |s| contains_any(s.text(), SYNTAX_PATTERNS),
    },
    Rule {
        name: "timeout-text",
        code: ErrorCode::Timeout,
        predicate: |s| contains_any(s.text(), TIMEOUT_PATTERNS),
    },
    Rule {
        name: "throttle-text",
        code: ErrorCode::RateLimit,
        predicate: |s| contains_any(s.text(), THROTTLE_PATTERNS),
    },
    Rule {
        name: "server-text",
        code: ErrorCode::EndpointError,
        predicate: |s| contains_any(s.text(), SERVER_PATTERNS),
    },
    Rule {
        name: "transport-connect",
        code: ErrorCode::EndpointError,
        predicate: |s| matches!(s, FailureSignal::Transport { kind: TransportKind::Connect, .. }),
    },
];

/// Stateless classifier over [`RULES`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorNormalizer;

impl ErrorNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Name of the first matching rule, for logs and tests.
    pub fn matching_rule(&self, signal: &FailureSignal) -> Option<&'static str> {
        RULES.iter().find(|r| r.matches(signal)).map(|r| r.name)
    }

    /// Total: every signal maps to exactly one code.
    pub fn classify(&self, signal: &FailureSignal) -> Classified {
        match RULES.iter().find(|r| r.matches(signal)) {
            Some(rule) => Classified::new(rule.code, signal.to_string()),
            None => {
                let raw = truncate(signal.text(), MAX_RAW_IN_HINT);
                Classified {
                    code: ErrorCode::Unknown,
                    hint: format!("{} Raw error: {raw}", ErrorCode::Unknown.hint()),
                    message: signal.to_string(),
                }
            }
        }
    }

    pub fn classify_message(&self, message: &str) -> Classified {
        self.classify(&FailureSignal::Message(message.to_string()))
    }

    /// Whether the attempt that produced `signal` should count as throttled.
    pub fn is_throttle(&self, signal: &FailureSignal) -> bool {
        self.classify(signal).code == ErrorCode::RateLimit
    }
}

fn truncate(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

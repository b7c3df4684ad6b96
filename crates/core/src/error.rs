use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of failure codes surfaced to the agent.
///
/// Every failure path (linter, transport, endpoint) ends in exactly one of
/// these, paired with a fixed repair hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Syntax,
    Timeout,
    RateLimit,
    EndpointError,
    BlockedConstruct,
    UngroundedId,
    MissingLimit,
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::Syntax,
        ErrorCode::Timeout,
        ErrorCode::RateLimit,
        ErrorCode::EndpointError,
        ErrorCode::BlockedConstruct,
        ErrorCode::UngroundedId,
        ErrorCode::MissingLimit,
        ErrorCode::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "SYNTAX",
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::EndpointError => "ENDPOINT_ERROR",
            Self::BlockedConstruct => "BLOCKED_CONSTRUCT",
            Self::UngroundedId => "UNGROUNDED_ID",
            Self::MissingLimit => "MISSING_LIMIT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// The fixed repair hint for this code.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Syntax => "Check variable names, braces and prefixes, then resend the corrected query.",
            Self::Timeout => "Simplify the query or reduce LIMIT, then retry later.",
            Self::RateLimit => "Retry after backoff; reduce query frequency.",
            Self::EndpointError => "The endpoint reported a server-side fault; retry later without changing the query.",
            Self::BlockedConstruct => {
                "Only SELECT/ASK are allowed; remove FROM, GRAPH, non-label SERVICE clauses and unbounded property paths (* or +)."
            }
            Self::UngroundedId => {
                "Call search_entity / search_property for every identifier before using it in a query."
            }
            Self::MissingLimit => "Give the outer query a literal integer LIMIT, e.g. LIMIT 50.",
            Self::Unknown => "Unclassified failure; inspect the raw message before retrying.",
        }
    }

    /// Policy rejections come from the linter and must never be retried verbatim.
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::BlockedConstruct | Self::UngroundedId | Self::MissingLimit)
    }

    /// Whether retrying the identical request later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimit | Self::EndpointError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure: stable code, actionable hint, and the raw diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classified {
    pub code: ErrorCode,
    pub hint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Classified {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            hint: code.hint().to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::RateLimit).unwrap();
        assert_eq!(json, "\"RATE_LIMIT\"");
        let parsed: ErrorCode = serde_json::from_str("\"UNGROUNDED_ID\"").unwrap();
        assert_eq!(parsed, ErrorCode::UngroundedId);
    }

    #[test]
    fn test_as_str_matches_serde_name() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json.as_str().unwrap(), code.as_str());
        }
    }

    #[test]
    fn test_every_code_has_a_hint() {
        for code in ErrorCode::ALL {
            assert!(!code.hint().is_empty(), "{code} has no hint");
        }
    }

    #[test]
    fn test_policy_codes_are_not_transient() {
        for code in ErrorCode::ALL {
            assert!(!(code.is_policy() && code.is_transient()));
        }
    }
}

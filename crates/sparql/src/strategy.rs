//! Request-shape variants tried against an endpoint, in priority order.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Where the query parameters travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// `application/x-www-form-urlencoded` request body.
    Form,
    /// URL query string, empty body.
    QueryString,
}

/// One way of phrasing a SPARQL protocol request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestStrategy {
    pub name: &'static str,
    pub method: HttpMethod,
    pub encoding: BodyEncoding,
    /// Also send `format=json`, which some endpoints need in place of (or on
    /// top of) content negotiation.
    pub format_param: bool,
}

/// Fallback order: POST before GET, form encoding before the variants that
/// lean on an explicit format request.
pub const FALLBACK_ORDER: [RequestStrategy; 4] = [
    RequestStrategy {
        name: "post-form",
        method: HttpMethod::Post,
        encoding: BodyEncoding::Form,
        format_param: false,
    },
    RequestStrategy {
        name: "post-form-json",
        method: HttpMethod::Post,
        encoding: BodyEncoding::Form,
        format_param: true,
    },
    RequestStrategy {
        name: "get-query",
        method: HttpMethod::Get,
        encoding: BodyEncoding::QueryString,
        format_param: false,
    },
    RequestStrategy {
        name: "get-query-json",
        method: HttpMethod::Get,
        encoding: BodyEncoding::QueryString,
        format_param: true,
    },
];

impl RequestStrategy {
    /// Protocol parameters for `query` under this strategy.
    pub fn params(&self, query: &str) -> Vec<(String, String)> {
        let mut params = vec![("query".to_string(), query.to_string())];
        if self.format_param {
            params.push(("format".to_string(), "json".to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_before_get() {
        let first_get = FALLBACK_ORDER
            .iter()
            .position(|s| s.method == HttpMethod::Get)
            .unwrap();
        assert!(FALLBACK_ORDER[..first_get].iter().all(|s| s.method == HttpMethod::Post));
        assert_eq!(FALLBACK_ORDER[0].encoding, BodyEncoding::Form);
    }

    #[test]
    fn test_format_param() {
        let params = FALLBACK_ORDER[1].params("ASK {}");
        assert_eq!(params.len(), 2);
        assert_eq!(params[1], ("format".to_string(), "json".to_string()));
        assert_eq!(FALLBACK_ORDER[0].params("ASK {}").len(), 1);
    }
}

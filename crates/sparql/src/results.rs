//! Parsing of SPARQL 1.1 JSON results.

use serde::Deserialize;
use serde_json::Value;

use kg_core::{Binding, ExecutionResult};

#[derive(Debug, Deserialize)]
struct SparqlJson {
    #[serde(default)]
    head: Head,
    #[serde(default)]
    results: Option<Bindings>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct Head {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Bindings {
    bindings: Vec<Binding>,
}

/// Parse a response body into a successful [`ExecutionResult`], keeping at
/// most `max_rows` rows. Errors describe why the body is not SPARQL JSON.
pub fn parse_results(body: &str, max_rows: usize) -> Result<ExecutionResult, String> {
    let raw: Value = serde_json::from_str(body).map_err(|e| format!("response is not JSON: {e}"))?;
    let parsed: SparqlJson =
        serde_json::from_value(raw.clone()).map_err(|e| format!("unexpected SPARQL JSON shape: {e}"))?;

    if let Some(answer) = parsed.boolean {
        let mut result = ExecutionResult::success(parsed.head.vars, Vec::new(), Some(raw));
        result.boolean = Some(answer);
        return Ok(result);
    }

    let Some(results) = parsed.results else {
        return Err("response has neither results.bindings nor boolean".to_string());
    };

    let mut rows = results.bindings;
    let truncated = rows.len() > max_rows;
    rows.truncate(max_rows);

    let mut result = ExecutionResult::success(parsed.head.vars, rows, Some(raw));
    result.truncated = truncated;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select_body(n: usize) -> String {
        let bindings: Vec<Value> = (0..n)
            .map(|i| json!({"item": {"type": "uri", "value": format!("http://www.wikidata.org/entity/Q{i}")}}))
            .collect();
        json!({"head": {"vars": ["item"]}, "results": {"bindings": bindings}}).to_string()
    }

    #[test]
    fn test_parse_select() {
        let result = parse_results(&select_body(3), 10).unwrap();
        assert!(result.succeeded);
        assert_eq!(result.bindings_head, vec!["item"]);
        assert_eq!(result.rows.len(), 3);
        assert!(!result.truncated);
        assert!(result.raw_json.is_some());
    }

    #[test]
    fn test_truncates_when_endpoint_ignores_limit() {
        let result = parse_results(&select_body(12), 5).unwrap();
        assert_eq!(result.rows.len(), 5);
        assert!(result.truncated);
    }

    #[test]
    fn test_parse_ask() {
        let result = parse_results(r#"{"head": {}, "boolean": true}"#, 5).unwrap();
        assert_eq!(result.boolean, Some(true));
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_html_error_page_rejected() {
        assert!(parse_results("<html><body>Service Unavailable</body></html>", 5).is_err());
        assert!(parse_results(r#"{"error": "nope"}"#, 5).is_err());
    }
}

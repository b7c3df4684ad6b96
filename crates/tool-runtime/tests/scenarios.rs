use std::sync::Arc;

use serde_json::json;

use kg_core::config::Config;
use kg_core::{ErrorCode, RunPhase};
use kg_sparql::testing::{ok, ScriptedTransport};
use kg_sparql::{HttpTransport, TransportError};
use kg_tool_runtime::testing::{offline_facade, wikidata_transport};
use kg_tool_runtime::{register_all, ToolContext, ToolFacade, ToolRegistry};

const SPARQL: &str = "https://query.wikidata.org/sparql";

const SPOUSE_QUERY: &str = r#"
SELECT ?spouse ?spouseLabel WHERE {
  wd:Q76 wdt:P26 ?spouse .
  SERVICE wikibase:label { bd:serviceParam wikibase:language "en". }
}"#;

const LABELLED_SCAN: &str = r#"
SELECT ?s ?sLabel WHERE {
  ?s ?p ?o .
  SERVICE wikibase:label { bd:serviceParam wikibase:language "en". }
}"#;

fn empty_results() -> String {
    json!({"head": {"vars": ["s"]}, "results": {"bindings": []}}).to_string()
}

/// Answers dry runs (LIMIT 1) with no rows and every other run with `full`.
fn split_transport<F>(full: F) -> Arc<ScriptedTransport>
where
    F: Fn() -> Result<kg_sparql::RawResponse, TransportError> + Send + Sync + 'static,
{
    Arc::new(ScriptedTransport::with_handler(move |request| {
        if request.param("query").is_some_and(|q| q.trim_end().ends_with("LIMIT 1")) {
            ok(empty_results())
        } else {
            full()
        }
    }))
}

fn timeout() -> Result<kg_sparql::RawResponse, TransportError> {
    Err(TransportError::Timeout("operation timed out".to_string()))
}

// ── End-to-end scenarios ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_scenario_a_grounded_spouse_query() {
    let transport = wikidata_transport();
    let facade = offline_facade(transport.clone());

    let people = facade.search_entity("Barack Obama", None).await.unwrap();
    assert!(people.candidates.iter().any(|c| c.label == "Barack Obama" && c.id == "Q76"));
    let props = facade.search_property("spouse", None).await.unwrap();
    assert_eq!(props.candidates[0].id, "P26");

    let output = facade.run_query(SPOUSE_QUERY, Some(10)).await.unwrap();
    assert!(output.row_count >= 1);
    assert_eq!(output.rows[0]["spouseLabel"], "Michelle Obama");
    assert!(!output.from_cache);
    assert!(output.warning.is_none());

    let sparql_queries: Vec<String> = transport
        .requests()
        .iter()
        .filter(|r| r.url == SPARQL)
        .filter_map(|r| r.param("query").map(str::to_string))
        .collect();
    assert_eq!(sparql_queries.len(), 2);
    assert!(sparql_queries[0].trim_end().ends_with("LIMIT 1"));
    assert!(sparql_queries[1].trim_end().ends_with("LIMIT 10"));
}

#[tokio::test]
async fn test_scenario_b_graph_clause_blocked_offline() {
    let transport = wikidata_transport();
    let facade = offline_facade(transport.clone());

    let failure = facade
        .run_query("SELECT * WHERE { ?x ?y ?z } GRAPH <g> { }", None)
        .await
        .unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::BlockedConstruct);
    assert_eq!(failure.hint, ErrorCode::BlockedConstruct.hint());
    assert!(failure.normalized_query.is_some());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_scenario_c_invented_identifier_rejected() {
    let transport = wikidata_transport();
    let facade = offline_facade(transport.clone());

    let failure = facade
        .run_query("SELECT ?x WHERE { wd:Q99999999999 wdt:P31 ?x } LIMIT 5", None)
        .await
        .unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::UngroundedId);
    assert!(failure.error_message.contains("Q99999999999"));
    assert_eq!(transport.calls(), 0);
}

// ── Execution pipeline ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_dry_run_syntax_error_skips_real_run() {
    let transport = wikidata_transport();
    transport.push_status(
        400,
        "MalformedQueryException: Encountered \" \"}\" \"} \"\" at line 1, column 30.",
    );
    let facade = offline_facade(transport.clone());

    let failure = facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::Syntax);
    assert_eq!(transport.calls(), 1);
    let stats = failure.stats.unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.failed_phase, Some(RunPhase::DryRun));
    assert!(failure.repairs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_repairs_strip_labels_then_halve_limit() {
    let transport = wikidata_transport();
    transport.push_ok(&empty_results());
    for _ in 0..8 {
        transport.push_err(TransportError::Timeout("operation timed out".to_string()));
    }
    let facade = offline_facade(transport.clone());

    let output = facade.run_query(LABELLED_SCAN, None).await.unwrap();
    assert_eq!(output.repairs.len(), 2);
    assert!(output.repairs[0].contains("label SERVICE"));
    assert_eq!(output.repairs[1], "TIMEOUT: halved LIMIT to 100");
    assert!(!output.query.contains("SERVICE"));
    assert!(output.query.trim_end().ends_with("LIMIT 100"));
    // dry run + two exhausted fallback passes + the successful attempt
    assert_eq!(output.stats.attempts, 10);
    assert!(output.lint_warnings.iter().any(|w| w.contains("label")));
}

#[tokio::test(start_paused = true)]
async fn test_repairs_are_bounded() {
    let transport = split_transport(timeout);
    let facade = offline_facade(transport.clone());

    let failure = facade.run_query(LABELLED_SCAN, None).await.unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::Timeout);
    assert_eq!(failure.repairs.len(), 2);
    // one dry run, then three full runs of four strategies each
    assert_eq!(transport.calls(), 13);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_retried_after_backoff() {
    let transport = wikidata_transport();
    transport.push_ok(&empty_results());
    for _ in 0..4 {
        transport.push_status(429, "Too Many Requests");
    }
    let facade = offline_facade(transport.clone());

    let output = facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap();
    assert_eq!(output.repairs, vec!["RATE_LIMIT: retried after backoff"]);
    let state = facade.engine().governor().snapshot(SPARQL).await.unwrap();
    assert_eq!(state.consecutive_throttles, 0);
}

#[tokio::test(start_paused = true)]
async fn test_endpoint_error_is_not_repaired() {
    let transport = split_transport(|| {
        Ok(kg_sparql::RawResponse {
            status: 502,
            body: "Bad Gateway".to_string(),
            http2: false,
        })
    });
    let facade = offline_facade(transport.clone());

    let failure = facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::EndpointError);
    assert!(failure.repairs.is_empty());
    assert_eq!(transport.calls(), 5);
}

// ── Result cache ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_repeat_query_served_from_cache() {
    let transport = wikidata_transport();
    let facade = offline_facade(transport.clone());

    let first = facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap();
    let calls = transport.calls();
    let second = facade.run_query("SELECT ?s  WHERE {\n ?s ?p ?o }", None).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.rows, second.rows);
    assert_eq!(transport.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_cached_repaired_run_keeps_its_repairs() {
    let transport = wikidata_transport();
    transport.push_ok(&empty_results());
    for _ in 0..8 {
        transport.push_err(TransportError::Timeout("operation timed out".to_string()));
    }
    let facade = offline_facade(transport.clone());

    let first = facade.run_query(LABELLED_SCAN, None).await.unwrap();
    let calls = transport.calls();
    let second = facade.run_query(LABELLED_SCAN, None).await.unwrap();

    assert_eq!(transport.calls(), calls);
    assert!(second.from_cache);
    assert_eq!(second.repairs, first.repairs);
    assert_eq!(second.repairs[1], "TIMEOUT: halved LIMIT to 100");
    assert_eq!(second.query, first.query);
    assert!(!second.query.contains("SERVICE"));
    assert_eq!(second.rows, first.rows);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached() {
    let transport = split_transport(|| {
        Ok(kg_sparql::RawResponse {
            status: 503,
            body: "Service Unavailable".to_string(),
            http2: false,
        })
    });
    let facade = offline_facade(transport.clone());

    facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap_err();
    let calls = transport.calls();
    facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap_err();
    assert_eq!(transport.calls(), calls * 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_rows_carry_a_warning() {
    let transport = split_transport(|| ok(empty_results()));
    let facade = offline_facade(transport);

    let output = facade.run_query("SELECT ?s WHERE { ?s ?p ?o }", None).await.unwrap();
    assert_eq!(output.row_count, 0);
    assert!(output.warning.unwrap().contains("zero results"));
}

#[tokio::test]
async fn test_empty_query_is_syntax() {
    let transport = wikidata_transport();
    let facade = offline_facade(transport.clone());
    let failure = facade.run_query("   ", None).await.unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::Syntax);
    assert_eq!(transport.calls(), 0);
}

// ── Registry wiring ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_registered_tools_share_one_session() {
    let transport = wikidata_transport();
    let mut registry = ToolRegistry::new();
    register_all(&mut registry, Arc::new(offline_facade(transport))).unwrap();
    assert_eq!(registry.len(), 6);

    let ctx = ToolContext::new("1");
    let run = registry.get("run_query").unwrap();
    let rejected = run.execute(json!({"query": SPOUSE_QUERY}), &ctx).await.unwrap();
    assert!(rejected.is_error);

    let search = registry.get("search_entity").unwrap();
    search.execute(json!({"text": "Barack Obama"}), &ctx).await.unwrap();
    let search = registry.get("search_property").unwrap();
    search.execute(json!({"text": "spouse"}), &ctx).await.unwrap();

    let accepted = run.execute(json!({"query": SPOUSE_QUERY}), &ctx).await.unwrap();
    assert!(!accepted.is_error, "{}", accepted.content);
}

#[tokio::test]
#[ignore = "talks to the live Wikidata endpoints"]
async fn test_live_scenario_a() {
    let config = Config::default();
    let transport = Arc::new(HttpTransport::new(&config.endpoint).unwrap());
    let facade = ToolFacade::from_config(&config, transport).unwrap();

    let people = facade.search_entity("Barack Obama", None).await.unwrap();
    assert!(people.candidates.iter().any(|c| c.label == "Barack Obama"));
    facade.search_property("spouse", None).await.unwrap();

    let output = facade.run_query(SPOUSE_QUERY, None).await.unwrap();
    assert!(output.row_count >= 1);
}

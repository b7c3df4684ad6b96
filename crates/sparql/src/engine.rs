//! Execution Engine: dry run at LIMIT 1, then the real run, each walking the
//! request-strategy fallback list under the Rate Governor.
//!
//! Failures never escape as errors. Every run ends in an [`ExecutionResult`],
//! failed ones carrying a classified code and hint.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kg_core::config::Config;
use kg_core::{Classified, ErrorCode, ExecutionResult, ExecutionStats, RunPhase};

use crate::classify::{ErrorNormalizer, FailureSignal};
use crate::lint::force_limit;
use crate::rate::RateGovernor;
use crate::results::parse_results;
use crate::strategy::{BodyEncoding, HttpMethod, RequestStrategy, FALLBACK_ORDER};
use crate::transport::{OutboundRequest, SparqlTransport, SPARQL_JSON};

/// Query used by [`ExecutionEngine::ping`].
pub const PING_QUERY: &str = "SELECT (1 AS ?x) WHERE {} LIMIT 1";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_rows: usize,
    pub query_timeout: Duration,
    pub dry_run_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_rows: config.query.max_rows,
            query_timeout: config.endpoint.query_timeout(),
            dry_run_timeout: config.endpoint.dry_run_timeout(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of `debug_ping`.
#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub endpoint: String,
    pub reachable: bool,
    pub latency_ms: u64,
    pub http2: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// One pass over the fallback list.
struct RunOutcome {
    result: Result<ExecutionResult, Classified>,
    attempts: u32,
    http2: bool,
}

pub struct ExecutionEngine {
    transport: Arc<dyn SparqlTransport>,
    governor: Arc<RateGovernor>,
    normalizer: ErrorNormalizer,
    strategies: Vec<RequestStrategy>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(transport: Arc<dyn SparqlTransport>, governor: Arc<RateGovernor>, settings: EngineSettings) -> Self {
        Self {
            transport,
            governor,
            normalizer: ErrorNormalizer::new(),
            strategies: FALLBACK_ORDER.to_vec(),
            settings,
        }
    }

    /// Replace the fallback list (order is kept as given).
    pub fn with_strategies(mut self, strategies: Vec<RequestStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn normalizer(&self) -> &ErrorNormalizer {
        &self.normalizer
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Dry run at LIMIT 1, then the real run at `limit`. A failed dry run is
    /// returned as-is and the real run never starts.
    pub async fn execute(&self, query: &str, endpoint: &str, limit: u32) -> ExecutionResult {
        let started = Instant::now();

        let dry = self
            .run(&force_limit(query, 1), endpoint, self.settings.dry_run_timeout)
            .await;
        if let Err(classified) = dry.result {
            warn!(endpoint, code = %classified.code, attempts = dry.attempts, "dry run failed; skipping real run");
            return finish_failure(classified, started, dry.attempts, RunPhase::DryRun);
        }
        debug!(endpoint, attempts = dry.attempts, "dry run passed");

        let full = self.run(&force_limit(query, limit), endpoint, self.settings.query_timeout).await;
        let attempts = dry.attempts + full.attempts;
        match full.result {
            Ok(result) => finish_success(result, started, attempts),
            Err(classified) => finish_failure(classified, started, attempts, RunPhase::FullRun),
        }
    }

    /// The real run alone, for retries after a dry run already passed.
    pub async fn full_run(&self, query: &str, endpoint: &str) -> ExecutionResult {
        let started = Instant::now();
        let outcome = self.run(query, endpoint, self.settings.query_timeout).await;
        match outcome.result {
            Ok(result) => finish_success(result, started, outcome.attempts),
            Err(classified) => finish_failure(classified, started, outcome.attempts, RunPhase::FullRun),
        }
    }

    /// Try each strategy once, stopping at the first well-formed success.
    /// A SYNTAX failure ends the run early: no request shape fixes a bad query.
    async fn run(&self, query: &str, endpoint: &str, timeout: Duration) -> RunOutcome {
        let mut attempts = 0;
        let mut http2 = false;
        let mut last = None;

        for strategy in &self.strategies {
            self.governor.await_permission(endpoint).await;
            attempts += 1;

            let request = OutboundRequest {
                url: endpoint.to_string(),
                method: strategy.method,
                encoding: strategy.encoding,
                params: strategy.params(query),
                accept: SPARQL_JSON.to_string(),
                timeout,
            };

            let signal = match self.transport.send(&request).await {
                Ok(response) => {
                    http2 = response.http2;
                    if response.is_success() {
                        match parse_results(&response.body, self.settings.max_rows) {
                            Ok(result) => {
                                self.governor.record_outcome(endpoint, false).await;
                                debug!(endpoint, strategy = strategy.name, rows = result.rows.len(), "attempt succeeded");
                                return RunOutcome {
                                    result: Ok(result),
                                    attempts,
                                    http2,
                                };
                            }
                            Err(message) => FailureSignal::Malformed {
                                message,
                                body: response.body,
                            },
                        }
                    } else {
                        FailureSignal::Http {
                            status: response.status,
                            body: response.body,
                        }
                    }
                }
                Err(err) => FailureSignal::from(&err),
            };

            let classified = self.normalizer.classify(&signal);
            self.governor
                .record_outcome(endpoint, classified.code == ErrorCode::RateLimit)
                .await;
            debug!(endpoint, strategy = strategy.name, code = %classified.code, "attempt failed");

            if classified.code == ErrorCode::Syntax {
                return RunOutcome {
                    result: Err(classified),
                    attempts,
                    http2,
                };
            }
            last = Some(classified);
        }

        RunOutcome {
            result: Err(last.unwrap_or_else(|| {
                Classified::new(ErrorCode::Unknown, "no request strategies configured")
            })),
            attempts,
            http2,
        }
    }

    /// GET a JSON API (the knowledge graph's search/label API) under the same
    /// rate governance and classification as SPARQL requests.
    pub async fn fetch_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, Classified> {
        self.governor.await_permission(url).await;

        let request = OutboundRequest {
            url: url.to_string(),
            method: HttpMethod::Get,
            encoding: BodyEncoding::QueryString,
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            accept: "application/json".to_string(),
            timeout: self.settings.query_timeout,
        };

        let signal = match self.transport.send(&request).await {
            Ok(response) if response.is_success() => match serde_json::from_str::<Value>(&response.body) {
                Ok(json) => match api_error(&json) {
                    Some(message) => FailureSignal::Message(message),
                    None => {
                        self.governor.record_outcome(url, false).await;
                        return Ok(json);
                    }
                },
                Err(e) => FailureSignal::Malformed {
                    message: format!("response is not JSON: {e}"),
                    body: response.body,
                },
            },
            Ok(response) => FailureSignal::Http {
                status: response.status,
                body: response.body,
            },
            Err(err) => FailureSignal::from(&err),
        };

        let classified = self.normalizer.classify(&signal);
        self.governor
            .record_outcome(url, classified.code == ErrorCode::RateLimit)
            .await;
        warn!(url, code = %classified.code, "API request failed");
        Err(classified)
    }

    /// Run a trivial query and report reachability, latency and protocol.
    pub async fn ping(&self, endpoint: &str) -> PingReport {
        let started = Instant::now();
        let outcome = self.run(PING_QUERY, endpoint, self.settings.dry_run_timeout).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let (error_code, hint) = match &outcome.result {
            Ok(_) => (None, None),
            Err(c) => (Some(c.code), Some(c.hint.clone())),
        };
        info!(endpoint, reachable = outcome.result.is_ok(), latency_ms, http2 = outcome.http2, "ping");
        PingReport {
            endpoint: endpoint.to_string(),
            reachable: outcome.result.is_ok(),
            latency_ms,
            http2: outcome.http2,
            error_code,
            hint,
        }
    }
}

/// Error message from a MediaWiki-style `{"error": {"code", "info"}}` body.
fn api_error(json: &Value) -> Option<String> {
    let err = json.get("error")?;
    let code = err.get("code").and_then(Value::as_str).unwrap_or("error");
    let info = err.get("info").and_then(Value::as_str).unwrap_or("");
    Some(format!("{code}: {info}"))
}

fn finish_success(mut result: ExecutionResult, started: Instant, attempts: u32) -> ExecutionResult {
    result.stats = ExecutionStats {
        elapsed_ms: started.elapsed().as_millis() as u64,
        attempts,
        failed_phase: None,
    };
    result
}

fn finish_failure(classified: Classified, started: Instant, attempts: u32, phase: RunPhase) -> ExecutionResult {
    let mut result = ExecutionResult::failure(classified);
    result.stats = ExecutionStats {
        elapsed_ms: started.elapsed().as_millis() as u64,
        attempts,
        failed_phase: Some(phase),
    };
    result
}

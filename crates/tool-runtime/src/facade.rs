//! Tool Facade: the operations the agent invokes, composed from the Grounding
//! Store, Query Linter, Result Cache and Execution Engine.
//!
//! All shared state (caches, rate state, grounded set) is owned by the
//! components handed to [`ToolFacade::new`]; nothing here is global.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kg_core::config::{Config, QueryPolicyConfig};
use kg_core::{Candidate, Classified, ErrorCode, ExecutionResult, ExecutionStats, IdKind, RunPhase, SchemaRecord};
use kg_grounding::{clamp_k, GroundedSet, GroundingError, GroundingStore, WikibaseBackend};
use kg_sparql::lint::{force_limit, outer_limit, strip_label_service};
use kg_sparql::{
    CachedRun, EngineSettings, ExecutionEngine, LintConfig, LintError, LintViolation, Linter, PingReport,
    RateGovernor, RatePolicy, ResultCache, SparqlTransport,
};

/// Full-run retries allowed after a dry run has passed.
pub const MAX_REPAIRS: usize = 2;

const ZERO_ROWS_WARNING: &str =
    "Query returned zero results. Check entity/property IDs or try broadening the query.";

// ── Response payloads ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub kind: IdKind,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaContext {
    pub entities: BTreeMap<String, SchemaRecord>,
    /// Requested identifiers the knowledge graph does not know.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub ok: bool,
    /// The query text that produced these rows.
    pub query: String,
    pub head: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
    pub row_count: usize,
    pub truncated: bool,
    pub from_cache: bool,
    pub stats: ExecutionStats,
    pub repairs: Vec<String>,
    pub lint_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_json: Option<Value>,
}

impl QueryOutput {
    fn from_result(
        result: ExecutionResult,
        query: String,
        from_cache: bool,
        repairs: Vec<String>,
        lint_warnings: Vec<String>,
    ) -> Self {
        let rows = result.simple_rows();
        let warning = (result.boolean.is_none() && rows.is_empty()).then(|| ZERO_ROWS_WARNING.to_string());
        let stats = if from_cache {
            ExecutionStats::default()
        } else {
            result.stats.clone()
        };
        Self {
            ok: true,
            query,
            head: result.bindings_head,
            row_count: rows.len(),
            rows,
            boolean: result.boolean,
            truncated: result.truncated,
            from_cache,
            stats,
            repairs,
            lint_warnings,
            warning,
            raw_json: result.raw_json,
        }
    }
}

/// A `run_query` failure: the classified code and hint plus whatever the
/// pipeline learned before stopping.
#[derive(Debug, Clone, Serialize)]
pub struct QueryFailure {
    pub ok: bool,
    pub error_code: ErrorCode,
    pub hint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<LintViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lint_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repairs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ExecutionStats>,
}

impl From<Classified> for QueryFailure {
    fn from(c: Classified) -> Self {
        Self {
            ok: false,
            error_code: c.code,
            hint: c.hint,
            error_message: c.message,
            violations: Vec::new(),
            normalized_query: None,
            lint_warnings: Vec::new(),
            repairs: Vec::new(),
            stats: None,
        }
    }
}

// ── Facade ────────────────────────────────────────────────────

pub struct ToolFacade {
    engine: Arc<ExecutionEngine>,
    grounding: Arc<GroundingStore>,
    results: Arc<ResultCache>,
    linter: Arc<Linter>,
    policy: QueryPolicyConfig,
    endpoint: String,
}

impl ToolFacade {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        grounding: Arc<GroundingStore>,
        results: Arc<ResultCache>,
        linter: Arc<Linter>,
        policy: QueryPolicyConfig,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            grounding,
            results,
            linter,
            policy,
            endpoint: endpoint.into(),
        }
    }

    /// Wire a facade for `config` over `transport`: one governor, one engine,
    /// fresh caches and an empty grounded set.
    pub fn from_config(config: &Config, transport: Arc<dyn SparqlTransport>) -> Result<Self, LintError> {
        let governor = Arc::new(RateGovernor::new(RatePolicy::from_config(&config.rate)));
        let engine = Arc::new(ExecutionEngine::new(
            transport,
            governor,
            EngineSettings::from_config(config),
        ));
        let grounding = Arc::new(GroundingStore::new(
            Arc::new(WikibaseBackend::new(engine.clone(), config.endpoint.api_url.clone())),
            config.cache.search_ttl(),
            config.cache.schema_ttl(),
            Arc::new(GroundedSet::new()),
        ));
        let results = Arc::new(ResultCache::new(config.cache.result_ttl()));
        let linter = Arc::new(Linter::new(LintConfig::from_policy(&config.query))?);
        Ok(Self::new(
            engine,
            grounding,
            results,
            linter,
            config.query.clone(),
            config.endpoint.sparql_url.clone(),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn grounding(&self) -> &Arc<GroundingStore> {
        &self.grounding
    }

    pub fn linter(&self) -> &Arc<Linter> {
        &self.linter
    }

    pub async fn search_entity(&self, text: &str, k: Option<usize>) -> Result<SearchResponse, Classified> {
        self.search(text, IdKind::Entity, k).await
    }

    pub async fn search_property(&self, text: &str, k: Option<usize>) -> Result<SearchResponse, Classified> {
        self.search(text, IdKind::Property, k).await
    }

    async fn search(&self, text: &str, kind: IdKind, k: Option<usize>) -> Result<SearchResponse, Classified> {
        let k = clamp_k(k);
        let found = match kind {
            IdKind::Entity => self.grounding.search_entity(text, k).await,
            IdKind::Property => self.grounding.search_property(text, k).await,
        }
        .map_err(|e| grounding_failure(&e))?;

        Ok(SearchResponse {
            query: text.trim().to_string(),
            kind,
            candidates: found.iter().map(Candidate::from).collect(),
        })
    }

    pub async fn get_schema_context(&self, ids: &[String]) -> Result<SchemaContext, Classified> {
        let entities = self
            .grounding
            .get_schema(ids)
            .await
            .map_err(|e| grounding_failure(&e))?;

        let mut missing: Vec<String> = ids
            .iter()
            .map(|id| id.trim().to_uppercase())
            .filter(|id| !entities.contains_key(id))
            .collect();
        missing.sort();
        missing.dedup();

        Ok(SchemaContext { entities, missing })
    }

    /// Lint, consult the Result Cache, then execute with bounded repair.
    pub async fn run_query(&self, sparql: &str, limit: Option<u32>) -> Result<QueryOutput, QueryFailure> {
        let sparql = sparql.trim();
        if sparql.is_empty() {
            let mut classified = Classified::new(ErrorCode::Syntax, "query is empty");
            classified.hint = "Provide a SPARQL SELECT or ASK query.".to_string();
            return Err(classified.into());
        }

        let started = Instant::now();
        let cap = self.policy.effective_cap(limit);
        let grounded = self.grounding.grounded().snapshot().await;
        let verdict = self.linter.lint_with_cap(sparql, &grounded, cap);

        if !verdict.passed {
            let code = verdict.error_code().unwrap_or(ErrorCode::Unknown);
            let message = verdict
                .violations
                .iter()
                .map(|v| v.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            info!(code = %code, violations = verdict.violations.len(), "query rejected by linter");
            let mut failure = QueryFailure::from(Classified::new(code, message));
            failure.violations = verdict.violations;
            failure.normalized_query = Some(verdict.normalized_query);
            failure.lint_warnings = verdict.warnings;
            return Err(failure);
        }

        let query = verdict.normalized_query;
        let warnings = verdict.warnings;
        let limit = verdict.effective_limit.unwrap_or(cap);

        if let Some(cached) = self.results.get(&query).await {
            debug!(rows = cached.result.rows.len(), repairs = cached.repairs.len(), "result cache hit");
            return Ok(QueryOutput::from_result(
                cached.result,
                cached.executed_query,
                true,
                cached.repairs,
                warnings,
            ));
        }

        let mut result = self.engine.execute(&query, &self.endpoint, limit).await;
        let mut attempts = result.stats.attempts;
        let mut current = query.clone();
        let mut repairs = Vec::new();

        while !result.succeeded
            && result.stats.failed_phase == Some(RunPhase::FullRun)
            && repairs.len() < MAX_REPAIRS
        {
            match result.error_code {
                Some(ErrorCode::Timeout) => {
                    if let Some(stripped) = strip_label_service(&current) {
                        current = stripped;
                        repairs.push("TIMEOUT: removed the label SERVICE block".to_string());
                    } else {
                        let now = outer_limit(&current).unwrap_or(u64::from(limit));
                        if now <= 1 {
                            break;
                        }
                        let halved = u32::try_from(now / 2).unwrap_or(limit / 2).max(1);
                        current = force_limit(&current, halved);
                        repairs.push(format!("TIMEOUT: halved LIMIT to {halved}"));
                    }
                }
                Some(ErrorCode::RateLimit) => {
                    repairs.push("RATE_LIMIT: retried after backoff".to_string());
                }
                _ => break,
            }
            info!(repair = repairs.len(), "retrying full run");
            result = self.engine.full_run(&current, &self.endpoint).await;
            attempts += result.stats.attempts;
        }

        result.stats.attempts = attempts;
        result.stats.elapsed_ms = started.elapsed().as_millis() as u64;

        if result.succeeded {
            let run = CachedRun {
                result: result.clone(),
                executed_query: current.clone(),
                repairs: repairs.clone(),
            };
            self.results.put(&query, run).await;
            info!(
                rows = result.rows.len(),
                attempts,
                elapsed_ms = result.stats.elapsed_ms,
                repairs = repairs.len(),
                "query succeeded"
            );
            return Ok(QueryOutput::from_result(result, current, false, repairs, warnings));
        }

        let classified = result
            .classified()
            .unwrap_or_else(|| Classified::new(ErrorCode::Unknown, "execution failed without a classification"));
        warn!(code = %classified.code, attempts, repairs = repairs.len(), "query failed");
        let mut failure = QueryFailure::from(classified);
        failure.normalized_query = Some(current);
        failure.lint_warnings = warnings;
        failure.repairs = repairs;
        failure.stats = Some(result.stats);
        Err(failure)
    }

    pub async fn debug_ping(&self) -> PingReport {
        self.engine.ping(&self.endpoint).await
    }

    /// Classify a raw error message into `{code, hint}`.
    pub fn normalize_error(&self, message: &str) -> Classified {
        self.engine.normalizer().classify_message(message)
    }
}

fn grounding_failure(err: &GroundingError) -> Classified {
    let classified = err.classified();
    warn!(code = %classified.code, error = %err, "grounding call failed");
    classified
}

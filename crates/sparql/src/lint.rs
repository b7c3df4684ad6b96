//! Static policy checks applied to every query before it touches the network.
//!
//! Five rules run in a fixed order and every violation is collected, so the
//! agent gets a complete repair list in one round trip. Two of them rewrite
//! instead of rejecting: stray label `SERVICE` blocks are moved inside the
//! WHERE group and the outer `LIMIT` is injected or capped. The rewritten
//! query is returned even when the verdict fails.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use kg_core::config::QueryPolicyConfig;
use kg_core::ErrorCode;

use crate::scan::{brace_depths, keyword_spans, mask, matching_brace, skip_ws, token_at, where_block, MaskMode};

/// Query forms that can return graph fragments or mutate data.
const FORBIDDEN_FORMS: &[&str] = &[
    "CONSTRUCT", "DESCRIBE", "INSERT", "DELETE", "LOAD", "CLEAR", "DROP", "CREATE",
];

/// Targets a `SERVICE` clause may name: the knowledge graph's label service.
const ALLOWED_SERVICES: &[&str] = &["wikibase:label", "<http://wikiba.se/ontology#label>"];

// ── Verdict types ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LintRule {
    ForbiddenQueryForm,
    BlockedConstruct,
    DisallowedService,
    MissingLimit,
    UngroundedId,
}

impl LintRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenQueryForm => "FORBIDDEN_QUERY_FORM",
            Self::BlockedConstruct => "BLOCKED_CONSTRUCT",
            Self::DisallowedService => "DISALLOWED_SERVICE",
            Self::MissingLimit => "MISSING_LIMIT",
            Self::UngroundedId => "UNGROUNDED_ID",
        }
    }

    /// The agent-facing error code this rule reports as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ForbiddenQueryForm | Self::BlockedConstruct | Self::DisallowedService => {
                ErrorCode::BlockedConstruct
            }
            Self::MissingLimit => ErrorCode::MissingLimit,
            Self::UngroundedId => ErrorCode::UngroundedId,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintViolation {
    pub rule: LintRule,
    pub message: String,
}

impl LintViolation {
    fn new(rule: LintRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintVerdict {
    pub passed: bool,
    pub violations: Vec<LintViolation>,
    pub normalized_query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// The outer LIMIT of `normalized_query`, when it has a literal one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_limit: Option<u32>,
}

impl LintVerdict {
    /// Code of the first violation, which is what the agent sees.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.violations.first().map(|v| v.rule.error_code())
    }

    pub fn has_rule(&self, rule: LintRule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }
}

// ── Configuration ─────────────────────────────────────────────

/// How identifiers are spelled in queries against one knowledge graph.
#[derive(Debug, Clone)]
pub struct IdentifierScheme {
    /// Prefixes whose local name is an identifier (`wdt:` in `wdt:P31`).
    pub prefixes: Vec<String>,
    /// Regex with one capture group for identifiers written as full IRIs.
    pub iri_pattern: String,
}

impl IdentifierScheme {
    pub fn wikidata() -> Self {
        Self {
            prefixes: ["wd", "wdt", "p", "ps", "pq", "psv", "pqv", "pr", "prv", "wdno"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            iri_pattern: r"<https?://www\.wikidata\.org/(?:entity|prop(?:/[A-Za-z-]+)*)/([QP][0-9]+)>"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LintConfig {
    pub limit_cap: u32,
    pub label_service_limit: u32,
    pub max_triples: usize,
    pub scheme: IdentifierScheme,
}

impl LintConfig {
    pub fn from_policy(policy: &QueryPolicyConfig) -> Self {
        Self {
            limit_cap: policy.limit_cap,
            label_service_limit: policy.label_service_limit,
            max_triples: policy.max_triples,
            scheme: IdentifierScheme::wikidata(),
        }
    }
}

impl Default for LintConfig {
    fn default() -> Self {
        Self::from_policy(&QueryPolicyConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum LintError {
    #[error("invalid identifier pattern: {0}")]
    Pattern(#[from] regex::Error),
}

// ── Linter ────────────────────────────────────────────────────

pub struct Linter {
    config: LintConfig,
    prefixed_id: Regex,
    iri_id: Regex,
    triple: Regex,
    prefix_decl: Regex,
    base_decl: Regex,
    prefixed_name: Regex,
    iri_ref: Regex,
}

/// `PREFIX` and `BASE` declarations of one query. A name may be declared
/// more than once, so every IRI it was bound to is kept.
#[derive(Debug, Default)]
struct Declarations {
    prefixes: HashMap<String, Vec<String>>,
    bases: Vec<String>,
}

impl Linter {
    pub fn new(config: LintConfig) -> Result<Self, LintError> {
        let prefixes = config
            .scheme
            .prefixes
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            prefixed_id: Regex::new(&format!(r"\b(?:{prefixes}):([QP][0-9]+)\b"))?,
            iri_id: Regex::new(&config.scheme.iri_pattern)?,
            triple: Regex::new(r"\?\w+\s+\S+\s+\S+")?,
            prefix_decl: Regex::new(r"(?i)\bPREFIX\s+([A-Za-z](?:[\w.-]*[\w-])?)?:\s*<([^<>\s]*)>")?,
            base_decl: Regex::new(r"(?i)\bBASE\s+<([^<>\s]*)>")?,
            prefixed_name: Regex::new(r"([A-Za-z](?:[\w.-]*[\w-])?)?:([A-Za-z0-9_][\w-]*)")?,
            iri_ref: Regex::new(r"<([^<>\s]*)>")?,
            config,
        })
    }

    pub fn config(&self) -> &LintConfig {
        &self.config
    }

    pub fn lint(&self, query: &str, grounded: &HashSet<String>) -> LintVerdict {
        self.lint_with_cap(query, grounded, self.config.limit_cap)
    }

    /// Lint with an explicit LIMIT cap (a caller-requested limit already
    /// clamped by policy).
    pub fn lint_with_cap(&self, query: &str, grounded: &HashSet<String>, cap: u32) -> LintVerdict {
        let cap = cap.max(1);
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let masked = mask(query, MaskMode::LiteralsAndIris);

        check_query_form(&masked, &mut violations);
        check_blocked_constructs(query, &masked, &mut violations);
        check_services(query, &masked, &mut violations);

        let relocated = relocate_label_services(query.to_string(), &mut warnings);
        let (normalized, effective_limit) = enforce_limit(relocated, cap, &mut violations, &mut warnings);

        self.check_identifiers(&normalized, grounded, &mut violations);
        self.collect_warnings(&normalized, effective_limit, &mut warnings);

        debug!(
            passed = violations.is_empty(),
            violations = violations.len(),
            warnings = warnings.len(),
            "query linted"
        );

        LintVerdict {
            passed: violations.is_empty(),
            violations,
            normalized_query: normalized,
            warnings,
            effective_limit,
        }
    }

    /// Identifiers the query references, in sorted order.
    ///
    /// Besides the well-known prefixes and absolute IRIs, this expands names
    /// under any `PREFIX` the query declares and relative IRIs under any
    /// `BASE`, so a local alias for the identifier namespace is still seen.
    pub fn identifiers(&self, query: &str) -> BTreeSet<String> {
        let masked = mask(query, MaskMode::Literals);
        let mut ids = BTreeSet::new();
        for re in [&self.prefixed_id, &self.iri_id] {
            for caps in re.captures_iter(&masked) {
                if let Some(id) = caps.get(1) {
                    ids.insert(id.as_str().to_string());
                }
            }
        }

        let decls = self.declarations(&masked);
        if decls.prefixes.is_empty() && decls.bases.is_empty() {
            return ids;
        }

        let names = mask(query, MaskMode::LiteralsAndIris);
        for caps in self.prefixed_name.captures_iter(&names) {
            let (Some(whole), Some(local)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            if whole.start() > 0 && is_name_byte(names.as_bytes()[whole.start() - 1]) {
                continue;
            }
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            for iri in decls.prefixes.get(prefix).into_iter().flatten() {
                self.collect_iri_id(&format!("<{iri}{}>", local.as_str()), &mut ids);
            }
        }

        for caps in self.iri_ref.captures_iter(&masked) {
            let Some(reference) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if reference.contains(':') {
                continue;
            }
            for base in &decls.bases {
                self.collect_iri_id(&format!("<{}>", resolve(base, reference)), &mut ids);
            }
        }
        ids
    }

    fn declarations(&self, masked: &str) -> Declarations {
        let mut decls = Declarations::default();
        for caps in self.base_decl.captures_iter(masked) {
            if let Some(iri) = caps.get(1) {
                decls.bases.push(iri.as_str().to_string());
            }
        }
        for caps in self.prefix_decl.captures_iter(masked) {
            let name = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let Some(iri) = caps.get(2).map(|m| m.as_str()) else {
                continue;
            };
            let entry = decls.prefixes.entry(name).or_default();
            if iri.contains(':') {
                entry.push(iri.to_string());
            } else {
                entry.extend(decls.bases.iter().map(|base| resolve(base, iri)));
            }
        }
        decls
    }

    fn collect_iri_id(&self, iri: &str, ids: &mut BTreeSet<String>) {
        if let Some(id) = self.iri_id.captures(iri).and_then(|caps| caps.get(1)) {
            ids.insert(id.as_str().to_string());
        }
    }

    fn check_identifiers(&self, query: &str, grounded: &HashSet<String>, violations: &mut Vec<LintViolation>) {
        for id in self.identifiers(query) {
            if !grounded.contains(&id) {
                violations.push(LintViolation::new(
                    LintRule::UngroundedId,
                    format!("{id} was not returned by any grounding search in this session"),
                ));
            }
        }
    }

    fn collect_warnings(&self, query: &str, limit: Option<u32>, warnings: &mut Vec<String>) {
        if let Some(limit) = limit {
            if limit > self.config.label_service_limit && has_label_service(query) {
                warnings.push(format!(
                    "label service with LIMIT {limit} may time out; consider LIMIT {} or fetching labels separately",
                    self.config.label_service_limit
                ));
            }
        }

        let masked = mask(query, MaskMode::LiteralsAndIris);
        let triples = self.triple.find_iter(&masked).count();
        if triples > self.config.max_triples {
            warnings.push(format!(
                "{triples} triple patterns (soft limit {}); the query may be slow",
                self.config.max_triples
            ));
        }
    }
}

// ── Rules ─────────────────────────────────────────────────────

fn check_query_form(masked: &str, violations: &mut Vec<LintViolation>) {
    let mut forbidden = false;
    for form in FORBIDDEN_FORMS {
        if !keyword_spans(masked, form).is_empty() {
            forbidden = true;
            violations.push(LintViolation::new(
                LintRule::ForbiddenQueryForm,
                format!("{form} is not allowed; only SELECT and ASK queries may run"),
            ));
        }
    }
    let readable = ["SELECT", "ASK"].iter().any(|kw| !keyword_spans(masked, kw).is_empty());
    if !forbidden && !readable {
        violations.push(LintViolation::new(
            LintRule::ForbiddenQueryForm,
            "query must be a SELECT or ASK query",
        ));
    }
}

fn check_blocked_constructs(query: &str, masked: &str, violations: &mut Vec<LintViolation>) {
    if !keyword_spans(masked, "FROM").is_empty() {
        violations.push(LintViolation::new(
            LintRule::BlockedConstruct,
            "FROM / FROM NAMED dataset clauses are not allowed",
        ));
    }
    if !keyword_spans(masked, "GRAPH").is_empty() {
        violations.push(LintViolation::new(
            LintRule::BlockedConstruct,
            "GRAPH patterns are not allowed",
        ));
    }

    let mut seen = BTreeSet::new();
    for (i, b) in masked.bytes().enumerate() {
        if b != b'*' && b != b'+' {
            continue;
        }
        if let Some(operand) = path_operand(masked, i) {
            let path = format!("{}{}", &query[operand], b as char);
            if seen.insert(path.clone()) {
                violations.push(LintViolation::new(
                    LintRule::BlockedConstruct,
                    format!("unbounded property path {path} is not allowed"),
                ));
            }
        }
    }
}

/// Resolve a relative IRI reference against `base`. Only path references
/// are handled; anything with a scheme never reaches here.
fn resolve(base: &str, reference: &str) -> String {
    if let Some(path) = reference.strip_prefix('/') {
        let authority_end = base
            .find("://")
            .and_then(|p| base[p + 3..].find('/').map(|q| p + 3 + q))
            .unwrap_or(base.len());
        return format!("{}/{path}", &base[..authority_end]);
    }
    match base.rfind('/') {
        Some(p) if !base[..p].ends_with('/') => format!("{}{reference}", &base[..=p]),
        _ => format!("{base}/{reference}"),
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'.' | b'-' | b'?' | b'$')
}

/// If the `*` / `+` at `op` applies to a predicate, the operand's span.
///
/// Operators after variables, numbers, typed literals, keywords (`SELECT *`)
/// or an opening parenthesis (`COUNT(*)`) are arithmetic or projection, not
/// paths.
fn path_operand(masked: &str, op: usize) -> Option<Range<usize>> {
    let bytes = masked.as_bytes();
    let end = bytes[..op].iter().rposition(|b| !b.is_ascii_whitespace())?;
    match bytes[end] {
        b'>' => {
            let start = bytes[..end].iter().rposition(|&b| b == b'<')?;
            (!is_datatype(masked, start)).then_some(start..end + 1)
        }
        b')' => {
            let open = matching_paren_back(bytes, end)?;
            let inner = masked[open + 1..end].trim();
            (inner.contains(':') || inner.contains('<') || inner == "a").then_some(open..end + 1)
        }
        b if is_name_byte(b) => {
            let start = bytes[..=end]
                .iter()
                .rposition(|&b| !is_name_byte(b))
                .map_or(0, |p| p + 1);
            let token = &masked[start..=end];
            let operand = !token.starts_with(|c: char| matches!(c, '?' | '$') || c.is_ascii_digit());
            if !operand || is_datatype(masked, start) {
                return None;
            }
            (token.contains(':') || token == "a").then_some(start..end + 1)
        }
        _ => None,
    }
}

/// Whether the term at `start` is the datatype of a literal (`"3"^^xsd:int`).
fn is_datatype(masked: &str, start: usize) -> bool {
    masked[..start].trim_end().ends_with("^^")
}

fn matching_paren_back(bytes: &[u8], close: usize) -> Option<usize> {
    let mut depth = 0i32;
    for i in (0..=close).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// A `SERVICE` keyword, the target it names, and where its target ends.
struct ServiceClause {
    keyword: Range<usize>,
    target: String,
    target_end: usize,
}

fn service_clauses(query: &str, masked: &str) -> Vec<ServiceClause> {
    keyword_spans(masked, "SERVICE")
        .into_iter()
        .map(|keyword| {
            let mut target = token_at(query, keyword.end);
            if query[target.clone()].eq_ignore_ascii_case("SILENT") {
                target = token_at(query, target.end);
            }
            ServiceClause {
                target: query[target.clone()].to_string(),
                target_end: target.end,
                keyword,
            }
        })
        .collect()
}

fn is_allowed_service(target: &str) -> bool {
    ALLOWED_SERVICES.contains(&target)
}

fn check_services(query: &str, masked: &str, violations: &mut Vec<LintViolation>) {
    for clause in service_clauses(query, masked) {
        if !is_allowed_service(&clause.target) {
            violations.push(LintViolation::new(
                LintRule::DisallowedService,
                format!(
                    "SERVICE {} is not allowed; only the label service (wikibase:label) may be used",
                    clause.target
                ),
            ));
        }
    }
}

/// Span from the `SERVICE` keyword through the closing brace of its block.
fn service_block(masked: &str, clause: &ServiceClause) -> Option<Range<usize>> {
    let open = masked[clause.target_end..].find('{').map(|p| clause.target_end + p)?;
    let close = matching_brace(masked, open)?;
    Some(clause.keyword.start..close + 1)
}

/// Move label `SERVICE` blocks that trail the WHERE group back inside it.
fn relocate_label_services(mut query: String, warnings: &mut Vec<String>) -> String {
    loop {
        let masked = mask(&query, MaskMode::LiteralsAndIris);
        let Some((_, where_close)) = where_block(&masked) else {
            return query;
        };
        let depths = brace_depths(&masked);
        let stray = service_clauses(&query, &masked).into_iter().find(|c| {
            c.keyword.start > where_close && depths[c.keyword.start] == 0 && is_allowed_service(&c.target)
        });
        let Some(block) = stray.and_then(|c| service_block(&masked, &c)) else {
            return query;
        };

        let text = query[block.clone()].to_string();
        query.replace_range(block, "");
        query.insert_str(where_close, &format!("  {text}\n"));
        warnings.push("moved SERVICE wikibase:label block inside the WHERE clause".to_string());
    }
}

struct LimitClause {
    keyword: Range<usize>,
    value: Option<(Range<usize>, u64)>,
}

/// The last `LIMIT` outside any group, which bounds the whole result.
fn outer_limit_clause(query: &str) -> Option<LimitClause> {
    let masked = mask(query, MaskMode::LiteralsAndIris);
    let depths = brace_depths(&masked);
    let keyword = keyword_spans(&masked, "LIMIT")
        .into_iter()
        .filter(|span| depths[span.start] == 0)
        .last()?;

    let start = skip_ws(&masked, keyword.end);
    let digits = masked.as_bytes()[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let followed_by_word = masked
        .as_bytes()
        .get(start + digits)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_');
    let value = (start > keyword.end && digits > 0 && !followed_by_word).then(|| {
        let range = start..start + digits;
        let n = masked[range.clone()].parse::<u64>().unwrap_or(u64::MAX);
        (range, n)
    });
    Some(LimitClause { keyword, value })
}

/// Add an outer `LIMIT`. Solution modifiers must come before a trailing
/// `VALUES` block, so the clause goes in front of one when present.
fn append_limit(query: &str, limit: u32) -> String {
    let body = query.trim_end().trim_end_matches(';').trim_end();
    match trailing_values(body) {
        Some(start) => {
            let (head, values) = body.split_at(start);
            format!("{}\nLIMIT {limit}\n{values}", head.trim_end())
        }
        None => format!("{body}\nLIMIT {limit}"),
    }
}

/// Start of a `VALUES` clause after the WHERE group, outside any braces.
fn trailing_values(query: &str) -> Option<usize> {
    let masked = mask(query, MaskMode::LiteralsAndIris);
    let (_, where_close) = where_block(&masked)?;
    let depths = brace_depths(&masked);
    keyword_spans(&masked, "VALUES")
        .into_iter()
        .find(|span| span.start > where_close && depths[span.start] == 0)
        .map(|span| span.start)
}

fn enforce_limit(
    query: String,
    cap: u32,
    violations: &mut Vec<LintViolation>,
    warnings: &mut Vec<String>,
) -> (String, Option<u32>) {
    match outer_limit_clause(&query) {
        None => {
            warnings.push(format!("no LIMIT given; added LIMIT {cap}"));
            (append_limit(&query, cap), Some(cap))
        }
        Some(LimitClause {
            value: Some((range, n)),
            ..
        }) => {
            if n > u64::from(cap) {
                warnings.push(format!("LIMIT {n} exceeds the cap; reduced to {cap}"));
                let mut rewritten = query;
                rewritten.replace_range(range, &cap.to_string());
                (rewritten, Some(cap))
            } else {
                (query, Some(u32::try_from(n).unwrap_or(cap)))
            }
        }
        Some(LimitClause { keyword, value: None }) => {
            violations.push(LintViolation::new(
                LintRule::MissingLimit,
                format!(
                    "LIMIT at offset {} is not followed by an integer literal",
                    keyword.start
                ),
            ));
            (query, None)
        }
    }
}

// ── Rewrite helpers used by the execution pipeline ────────────

/// The outer LIMIT of a query, if it has a literal one.
pub fn outer_limit(query: &str) -> Option<u64> {
    outer_limit_clause(query)?.value.map(|(_, n)| n)
}

/// Set the outer LIMIT to `limit`, appending a clause when there is none.
pub fn force_limit(query: &str, limit: u32) -> String {
    match outer_limit_clause(query) {
        Some(LimitClause {
            value: Some((range, _)),
            ..
        }) => {
            let mut rewritten = query.to_string();
            rewritten.replace_range(range, &limit.to_string());
            rewritten
        }
        Some(LimitClause { value: None, .. }) => query.to_string(),
        None => append_limit(query, limit),
    }
}

pub fn has_label_service(query: &str) -> bool {
    let masked = mask(query, MaskMode::LiteralsAndIris);
    service_clauses(query, &masked)
        .iter()
        .any(|c| is_allowed_service(&c.target))
}

/// Remove every label `SERVICE` block. `None` when there was none.
pub fn strip_label_service(query: &str) -> Option<String> {
    let mut stripped = query.to_string();
    let mut removed = false;
    loop {
        let masked = mask(&stripped, MaskMode::LiteralsAndIris);
        let block = service_clauses(&stripped, &masked)
            .into_iter()
            .filter(|c| is_allowed_service(&c.target))
            .find_map(|c| service_block(&masked, &c));
        match block {
            Some(range) => {
                stripped.replace_range(range, "");
                removed = true;
            }
            None => break,
        }
    }
    removed.then_some(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linter() -> Linter {
        Linter::new(LintConfig::default()).unwrap()
    }

    fn grounded(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn rules(verdict: &LintVerdict) -> Vec<LintRule> {
        verdict.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_graph_pattern_is_blocked() {
        let verdict = linter().lint("SELECT * WHERE { ?x ?y ?z } GRAPH <g> { }", &grounded(&[]));
        assert!(!verdict.passed);
        assert_eq!(verdict.error_code(), Some(ErrorCode::BlockedConstruct));
    }

    #[test]
    fn test_construct_and_describe_always_rejected() {
        let l = linter();
        for q in [
            "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o } LIMIT 1",
            "DESCRIBE wd:Q42",
            "describe <http://www.wikidata.org/entity/Q42>",
        ] {
            let verdict = l.lint(q, &grounded(&["Q42"]));
            assert!(!verdict.passed, "{q}");
            assert_eq!(verdict.violations[0].rule, LintRule::ForbiddenQueryForm);
            assert_eq!(verdict.error_code(), Some(ErrorCode::BlockedConstruct));
        }
    }

    #[test]
    fn test_update_forms_rejected() {
        let verdict = linter().lint("DELETE WHERE { ?s ?p ?o }", &grounded(&[]));
        assert!(verdict.has_rule(LintRule::ForbiddenQueryForm));
    }

    #[test]
    fn test_missing_limit_is_injected_at_cap() {
        let verdict = linter().lint("SELECT ?x WHERE { ?x ?p ?o } ;", &grounded(&[]));
        assert!(verdict.passed);
        assert!(verdict.normalized_query.ends_with("LIMIT 200"));
        assert_eq!(verdict.effective_limit, Some(200));
        assert!(!verdict.normalized_query.contains(';'));
    }

    #[test]
    fn test_injected_limit_goes_before_trailing_values() {
        let verdict = linter().lint("SELECT ?x WHERE { ?x ?p ?o } VALUES ?x { 1 }", &grounded(&[]));
        assert!(verdict.passed, "{:?}", verdict.violations);
        assert_eq!(
            verdict.normalized_query,
            "SELECT ?x WHERE { ?x ?p ?o }\nLIMIT 200\nVALUES ?x { 1 }"
        );
        assert_eq!(outer_limit(&verdict.normalized_query), Some(200));

        let forced = force_limit("ASK { ?x ?p ?o } VALUES ?x { <http://example.org/a> }", 1);
        assert_eq!(forced, "ASK { ?x ?p ?o }\nLIMIT 1\nVALUES ?x { <http://example.org/a> }");
    }

    #[test]
    fn test_limit_above_cap_is_rewritten_to_cap() {
        let verdict = linter().lint("SELECT ?x WHERE { ?x ?p ?o } LIMIT 10000 OFFSET 5", &grounded(&[]));
        assert!(verdict.passed);
        assert_eq!(outer_limit(&verdict.normalized_query), Some(200));
        assert!(verdict.normalized_query.contains("OFFSET 5"));
    }

    #[test]
    fn test_limit_below_cap_kept_and_explicit_cap_honored() {
        let l = linter();
        let verdict = l.lint("SELECT ?x WHERE { ?x ?p ?o } LIMIT 7", &grounded(&[]));
        assert_eq!(verdict.effective_limit, Some(7));

        let verdict = l.lint_with_cap("SELECT ?x WHERE { ?x ?p ?o } LIMIT 70", &grounded(&[]), 20);
        assert_eq!(outer_limit(&verdict.normalized_query), Some(20));
    }

    #[test]
    fn test_subquery_limit_left_alone() {
        let q = "SELECT ?x WHERE { { SELECT ?x WHERE { ?x ?p ?o } LIMIT 900 } }";
        let verdict = linter().lint(q, &grounded(&[]));
        assert!(verdict.normalized_query.contains("LIMIT 900"));
        assert!(verdict.normalized_query.ends_with("LIMIT 200"));
    }

    #[test]
    fn test_limit_without_integer_is_a_violation() {
        let verdict = linter().lint("SELECT ?x WHERE { ?x ?p ?o } LIMIT ?n", &grounded(&[]));
        assert_eq!(rules(&verdict), vec![LintRule::MissingLimit]);
        assert_eq!(verdict.error_code(), Some(ErrorCode::MissingLimit));
    }

    #[test]
    fn test_unbounded_paths_blocked() {
        let l = linter();
        for q in [
            "SELECT ?c WHERE { ?c wdt:P279* wd:Q5 } LIMIT 5",
            "SELECT ?c WHERE { ?c wdt:P31/wdt:P279+ wd:Q5 } LIMIT 5",
            "SELECT ?c WHERE { ?c (wdt:P31|wdt:P279)* wd:Q5 } LIMIT 5",
            "SELECT ?c WHERE { ?c <http://www.wikidata.org/prop/direct/P279>* ?d } LIMIT 5",
        ] {
            let verdict = l.lint(q, &grounded(&["P279", "P31", "Q5"]));
            assert_eq!(rules(&verdict), vec![LintRule::BlockedConstruct], "{q}");
        }
    }

    #[test]
    fn test_arithmetic_and_projection_are_not_paths() {
        let q = "SELECT ?x (COUNT(*) AS ?n) WHERE { ?x wdt:P1082 ?pop . BIND(?pop * 2 + 1 AS ?d) \
                 BIND((?pop + 3) * 4 AS ?e) } LIMIT 5";
        let verdict = linter().lint(q, &grounded(&["P1082"]));
        assert!(verdict.passed, "{:?}", verdict.violations);
    }

    #[test]
    fn test_typed_literal_operands_are_not_paths() {
        let q = "SELECT ?d WHERE { ?x wdt:P1082 ?pop . BIND(\"3\"^^xsd:integer * ?pop AS ?d) \
                 BIND(\"2\"^^<http://www.w3.org/2001/XMLSchema#integer> + 1 AS ?e) } LIMIT 5";
        let verdict = linter().lint(q, &grounded(&["P1082"]));
        assert!(verdict.passed, "{:?}", verdict.violations);
    }

    #[test]
    fn test_keywords_inside_strings_and_comments_ignored() {
        let q = "SELECT ?x WHERE {\n  ?x rdfs:label \"FROM GRAPH wd:Q1 *\"@en . # CONSTRUCT wdt:P2+\n} LIMIT 3";
        let verdict = linter().lint(q, &grounded(&[]));
        assert!(verdict.passed, "{:?}", verdict.violations);
    }

    #[test]
    fn test_from_clause_blocked() {
        let verdict = linter().lint(
            "SELECT ?x FROM <http://example.org/g> WHERE { ?x ?p ?o } LIMIT 1",
            &grounded(&[]),
        );
        assert_eq!(rules(&verdict), vec![LintRule::BlockedConstruct]);
    }

    #[test]
    fn test_non_label_service_rejected() {
        let q = "SELECT ?x WHERE { SERVICE <https://dbpedia.org/sparql> { ?x ?p ?o } } LIMIT 1";
        let verdict = linter().lint(q, &grounded(&[]));
        assert_eq!(rules(&verdict), vec![LintRule::DisallowedService]);
        assert_eq!(verdict.error_code(), Some(ErrorCode::BlockedConstruct));
    }

    #[test]
    fn test_label_service_allowed_and_relocated() {
        let q = "SELECT ?x ?xLabel WHERE { ?x wdt:P31 wd:Q5 } \
                 SERVICE wikibase:label { bd:serviceParam wikibase:language \"en\" } LIMIT 10";
        let verdict = linter().lint(q, &grounded(&["P31", "Q5"]));
        assert!(verdict.passed, "{:?}", verdict.violations);
        let n = &verdict.normalized_query;
        let (_, close) = where_block(&mask(n, MaskMode::LiteralsAndIris)).unwrap();
        assert!(n[..close].contains("SERVICE wikibase:label"));
        assert!(n.ends_with("LIMIT 10"));
        assert!(verdict.warnings.iter().any(|w| w.contains("moved SERVICE")));
    }

    #[test]
    fn test_silent_label_service_allowed() {
        let q = "SELECT ?x WHERE { ?x ?p ?o SERVICE SILENT wikibase:label { } } LIMIT 1";
        assert!(linter().lint(q, &grounded(&[])).passed);
    }

    #[test]
    fn test_ungrounded_identifier_rejected() {
        let q = "SELECT ?x WHERE { wd:Q99999999999 wdt:P26 ?x } LIMIT 5";
        let verdict = linter().lint(q, &grounded(&["P26"]));
        assert_eq!(rules(&verdict), vec![LintRule::UngroundedId]);
        assert!(verdict.violations[0].message.contains("Q99999999999"));
    }

    #[test]
    fn test_every_ungrounded_identifier_reported() {
        let q = "SELECT ?x WHERE { <http://www.wikidata.org/entity/Q1> p:P2 ?s . ?s ps:P2 ?x ; pq:P3 wd:Q4 } LIMIT 5";
        let verdict = linter().lint(q, &grounded(&["P2"]));
        let ids: Vec<_> = verdict.violations.iter().map(|v| v.message.split(' ').next().unwrap()).collect();
        assert_eq!(ids, vec!["P3", "Q1", "Q4"]);
    }

    #[test]
    fn test_locally_declared_prefix_is_checked() {
        let l = linter();
        let q = "PREFIX x: <http://www.wikidata.org/entity/> SELECT ?y WHERE { x:Q99999999999 ?p ?y } LIMIT 5";
        let verdict = l.lint(q, &grounded(&[]));
        assert_eq!(rules(&verdict), vec![LintRule::UngroundedId]);
        assert!(verdict.violations[0].message.contains("Q99999999999"));

        let q = "PREFIX : <https://www.wikidata.org/prop/direct/> SELECT ?y WHERE { ?y :P31 ?c } LIMIT 5";
        assert_eq!(l.identifiers(q), BTreeSet::from(["P31".to_string()]));

        let q = "PREFIX ex: <http://example.org/> SELECT ?y WHERE { ex:Q1 ?p ?y } LIMIT 5";
        assert!(l.lint(q, &grounded(&[])).passed);
    }

    #[test]
    fn test_relative_iris_under_declared_base_are_checked() {
        let l = linter();
        let q = "BASE <http://www.wikidata.org/entity/> SELECT ?y WHERE { <Q99999999999> ?p ?y } LIMIT 5";
        let verdict = l.lint(q, &grounded(&[]));
        assert_eq!(rules(&verdict), vec![LintRule::UngroundedId]);
        assert!(verdict.violations[0].message.contains("Q99999999999"));

        let q = "BASE <http://www.wikidata.org/> PREFIX e: <entity/> \
                 SELECT ?y WHERE { e:Q7 <prop/direct/P31> ?y } LIMIT 5";
        assert_eq!(
            l.identifiers(q),
            BTreeSet::from(["P31".to_string(), "Q7".to_string()])
        );
        assert!(l.lint(q, &grounded(&["P31", "Q7"])).passed);
    }

    #[test]
    fn test_grounded_query_passes() {
        let q = "SELECT ?spouse WHERE { wd:Q76 wdt:P26 ?spouse } LIMIT 5";
        let verdict = linter().lint(q, &grounded(&["Q76", "P26"]));
        assert!(verdict.passed);
        assert_eq!(verdict.normalized_query, q);
    }

    #[test]
    fn test_missing_select_is_rejected() {
        let verdict = linter().lint("PREFIX wd: <http://www.wikidata.org/entity/>", &grounded(&[]));
        assert!(verdict.has_rule(LintRule::ForbiddenQueryForm));
    }

    #[test]
    fn test_violations_are_collected_not_short_circuited() {
        let q = "SELECT ?x FROM <g> WHERE { wd:Q1 wdt:P2* ?x SERVICE <x:y> { } } LIMIT abc";
        let verdict = linter().lint(q, &grounded(&[]));
        let found = rules(&verdict);
        assert!(found.contains(&LintRule::BlockedConstruct));
        assert!(found.contains(&LintRule::DisallowedService));
        assert!(found.contains(&LintRule::MissingLimit));
        assert!(found.contains(&LintRule::UngroundedId));
    }

    #[test]
    fn test_label_service_warning_above_threshold() {
        let q = "SELECT ?x ?xLabel WHERE { ?x ?p ?o SERVICE wikibase:label { } } LIMIT 150";
        let verdict = linter().lint(q, &grounded(&[]));
        assert!(verdict.passed);
        assert!(verdict.warnings.iter().any(|w| w.contains("label service")));
    }

    #[test]
    fn test_triple_count_warning() {
        let body: String = (0..14).map(|i| format!("?s{i} ?p ?o{i} . ")).collect();
        let verdict = linter().lint(&format!("SELECT * WHERE {{ {body} }} LIMIT 5"), &grounded(&[]));
        assert!(verdict.warnings.iter().any(|w| w.contains("triple patterns")));
    }

    #[test]
    fn test_force_limit_and_strip_label_service() {
        let q = "SELECT ?x WHERE { ?x ?p ?o SERVICE wikibase:label { bd:serviceParam wikibase:language \"en\" } } LIMIT 50";
        assert_eq!(outer_limit(&force_limit(q, 1)), Some(1));
        assert!(force_limit("ASK { ?s ?p ?o }", 1).ends_with("LIMIT 1"));

        assert!(has_label_service(q));
        let stripped = strip_label_service(q).unwrap();
        assert!(!stripped.contains("SERVICE"));
        assert!(stripped.contains("LIMIT 50"));
        assert!(strip_label_service(&stripped).is_none());
    }
}

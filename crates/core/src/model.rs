//! Shared data model: grounded identifiers, schema records, and query results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Classified, ErrorCode};

// ── Grounding ─────────────────────────────────────────────────

/// Whether an identifier names an entity (`Q…`) or a property (`P…`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Entity,
    Property,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Property => "property",
        }
    }

    /// Wikibase `type` parameter for `wbsearchentities`.
    pub fn search_type(&self) -> &'static str {
        match self {
            Self::Entity => "item",
            Self::Property => "property",
        }
    }

    /// Infer the kind from an identifier's leading letter.
    pub fn of_id(id: &str) -> Option<Self> {
        match id.chars().next() {
            Some('Q') => Some(Self::Entity),
            Some('P') => Some(Self::Property),
            _ => None,
        }
    }
}

/// A knowledge-graph identifier resolved by a grounding search.
///
/// Immutable once created; logical expiry is handled by the cache holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedIdentifier {
    /// The search text that produced this identifier.
    pub raw_text: String,
    pub resolved_id: String,
    pub kind: IdKind,
    pub label: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub concept_uri: String,
    pub resolved_at: DateTime<Utc>,
}

/// Agent-facing view of a grounded identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub label: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub concept_uri: String,
}

impl From<&GroundedIdentifier> for Candidate {
    fn from(g: &GroundedIdentifier) -> Self {
        Self {
            id: g.resolved_id.clone(),
            label: g.label.clone(),
            description: g.description.clone(),
            concept_uri: g.concept_uri.clone(),
        }
    }
}

/// Schema facts for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: String,
    pub label: String,
    pub description: String,
    /// Property datatype (e.g. `wikibase-item`, `time`); empty for entities.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datatype: String,
    /// First few `instance of` targets; empty for properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_of: Vec<String>,
}

// ── Query results ─────────────────────────────────────────────

/// One RDF term in a SPARQL JSON results binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdfTerm {
    #[serde(rename = "type")]
    pub term_type: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// A single result row mapping variable names to terms.
pub type Binding = BTreeMap<String, RdfTerm>;

/// Which run of the dry-run-then-real-run protocol produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    DryRun,
    FullRun,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub elapsed_ms: u64,
    /// HTTP attempts made across all runs (dry run included).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<RunPhase>,
}

/// Outcome of one Execution Engine call.
///
/// Only instances with `succeeded == true` are ever cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub bindings_head: Vec<String>,
    pub rows: Vec<Binding>,
    /// ASK queries answer with a boolean instead of rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub stats: ExecutionStats,
}

impl ExecutionResult {
    pub fn success(bindings_head: Vec<String>, rows: Vec<Binding>, raw_json: Option<Value>) -> Self {
        Self {
            succeeded: true,
            bindings_head,
            rows,
            boolean: None,
            truncated: false,
            raw_json,
            error_code: None,
            hint: None,
            error_message: None,
            stats: ExecutionStats::default(),
        }
    }

    pub fn failure(classified: Classified) -> Self {
        Self {
            succeeded: false,
            bindings_head: Vec::new(),
            rows: Vec::new(),
            boolean: None,
            truncated: false,
            raw_json: None,
            error_code: Some(classified.code),
            hint: Some(classified.hint),
            error_message: Some(classified.message),
            stats: ExecutionStats::default(),
        }
    }

    pub fn classified(&self) -> Option<Classified> {
        let code = self.error_code?;
        Some(Classified {
            code,
            hint: self.hint.clone().unwrap_or_else(|| code.hint().to_string()),
            message: self.error_message.clone().unwrap_or_default(),
        })
    }

    /// Flatten rows to `{var: value}` maps, the shape agents read most easily.
    pub fn simple_rows(&self) -> Vec<BTreeMap<String, String>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(var, term)| (var.clone(), term.value.clone()))
                    .collect()
            })
            .collect()
    }
}

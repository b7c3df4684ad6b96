//! Grounding Store: cached entity/property search and schema lookup.
//!
//! Searches are cached per `(kind, normalized text, k)`, schema records per
//! identifier. Every identifier handed back, cached or fresh, is added to
//! the session's [`GroundedSet`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use kg_core::{Classified, ErrorCode, GroundedIdentifier, IdKind, SchemaRecord};
use kg_sparql::cache::{normalize_text, TtlCache};

use crate::backend::GroundingBackend;
use crate::session::GroundedSet;

pub const DEFAULT_K: usize = 5;
pub const MAX_K: usize = 20;

/// Clamp a requested candidate count into `1..=MAX_K`.
pub fn clamp_k(k: Option<usize>) -> usize {
    k.unwrap_or(DEFAULT_K).clamp(1, MAX_K)
}

#[derive(Debug, thiserror::Error)]
pub enum GroundingError {
    #[error("search text is empty")]
    EmptyInput,

    #[error("'{0}' is not an entity or property identifier")]
    InvalidId(String),

    #[error("lookup failed: {}", .0.code)]
    Lookup(Classified),
}

impl GroundingError {
    /// The `{code, hint}` pair the agent sees.
    pub fn classified(&self) -> Classified {
        match self {
            Self::EmptyInput => Classified {
                code: ErrorCode::Syntax,
                hint: "Provide non-empty search text.".to_string(),
                message: self.to_string(),
            },
            Self::InvalidId(_) => Classified {
                code: ErrorCode::Syntax,
                hint: "Identifiers look like Q42 (entity) or P31 (property).".to_string(),
                message: self.to_string(),
            },
            Self::Lookup(c) => c.clone(),
        }
    }
}

fn is_identifier(id: &str) -> bool {
    IdKind::of_id(id).is_some() && id.len() > 1 && id[1..].bytes().all(|b| b.is_ascii_digit())
}

pub struct GroundingStore {
    backend: Arc<dyn GroundingBackend>,
    searches: TtlCache<Vec<GroundedIdentifier>>,
    schemas: TtlCache<SchemaRecord>,
    grounded: Arc<GroundedSet>,
}

impl GroundingStore {
    pub fn new(
        backend: Arc<dyn GroundingBackend>,
        search_ttl: Duration,
        schema_ttl: Duration,
        grounded: Arc<GroundedSet>,
    ) -> Self {
        Self {
            backend,
            searches: TtlCache::new("search", search_ttl),
            schemas: TtlCache::new("schema", schema_ttl),
            grounded,
        }
    }

    pub fn grounded(&self) -> &Arc<GroundedSet> {
        &self.grounded
    }

    pub async fn search_entity(&self, text: &str, k: usize) -> Result<Vec<GroundedIdentifier>, GroundingError> {
        self.search(text, IdKind::Entity, k).await
    }

    pub async fn search_property(&self, text: &str, k: usize) -> Result<Vec<GroundedIdentifier>, GroundingError> {
        self.search(text, IdKind::Property, k).await
    }

    async fn search(&self, text: &str, kind: IdKind, k: usize) -> Result<Vec<GroundedIdentifier>, GroundingError> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(GroundingError::EmptyInput);
        }
        let k = k.clamp(1, MAX_K);
        let key = format!("{}|{}|{}", kind.as_str(), normalized, k);

        if let Some(hit) = self.searches.get(&key).await {
            debug!(kind = kind.as_str(), text = %normalized, "search cache hit");
            self.remember(hit.iter().map(|g| g.resolved_id.clone())).await;
            return Ok(hit);
        }

        let found = self
            .backend
            .search(text.trim(), kind, k)
            .await
            .map_err(GroundingError::Lookup)?;
        info!(kind = kind.as_str(), text = %normalized, hits = found.len(), "grounding search");

        self.searches.insert(key, found.clone()).await;
        self.remember(found.iter().map(|g| g.resolved_id.clone())).await;
        Ok(found)
    }

    /// Schema records for `ids`, keyed by identifier. Unknown identifiers are
    /// left out of the map.
    pub async fn get_schema(&self, ids: &[String]) -> Result<BTreeMap<String, SchemaRecord>, GroundingError> {
        let mut wanted: Vec<String> = ids.iter().map(|id| id.trim().to_uppercase()).collect();
        wanted.sort();
        wanted.dedup();
        wanted.retain(|id| !id.is_empty());
        if wanted.is_empty() {
            return Err(GroundingError::EmptyInput);
        }
        if let Some(bad) = wanted.iter().find(|id| !is_identifier(id)) {
            return Err(GroundingError::InvalidId(bad.clone()));
        }

        let mut records = BTreeMap::new();
        let mut missing = Vec::new();
        for id in wanted {
            match self.schemas.get(&id).await {
                Some(record) => {
                    records.insert(id, record);
                }
                None => missing.push(id),
            }
        }

        if !missing.is_empty() {
            let fetched = self
                .backend
                .fetch_schema(&missing)
                .await
                .map_err(GroundingError::Lookup)?;
            debug!(requested = missing.len(), found = fetched.len(), "schema fetched");
            for record in fetched {
                self.schemas.insert(record.id.clone(), record.clone()).await;
                records.insert(record.id.clone(), record);
            }
        }

        self.remember(records.keys().cloned()).await;
        Ok(records)
    }

    async fn remember<I: IntoIterator<Item = String>>(&self, ids: I) {
        self.grounded.insert_many(ids).await;
    }
}

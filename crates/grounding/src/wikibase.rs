//! [`GroundingBackend`] over the MediaWiki Wikibase API
//! (`wbsearchentities` / `wbgetentities`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use kg_core::{Classified, GroundedIdentifier, IdKind, SchemaRecord};
use kg_sparql::ExecutionEngine;

use crate::backend::GroundingBackend;

/// `wbgetentities` accepts at most this many ids per call.
pub const GET_ENTITIES_CHUNK: usize = 50;

/// `instance of` targets kept per entity.
const INSTANCE_OF_KEEP: usize = 3;

pub struct WikibaseBackend {
    engine: Arc<ExecutionEngine>,
    api_url: String,
    language: String,
}

impl WikibaseBackend {
    pub fn new(engine: Arc<ExecutionEngine>, api_url: impl Into<String>) -> Self {
        Self {
            engine,
            api_url: api_url.into(),
            language: "en".to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl GroundingBackend for WikibaseBackend {
    async fn search(&self, text: &str, kind: IdKind, k: usize) -> Result<Vec<GroundedIdentifier>, Classified> {
        let limit = k.to_string();
        let params = [
            ("action", "wbsearchentities"),
            ("format", "json"),
            ("language", self.language.as_str()),
            ("uselang", self.language.as_str()),
            ("type", kind.search_type()),
            ("search", text),
            ("limit", limit.as_str()),
        ];
        let json = self.engine.fetch_json(&self.api_url, &params).await?;
        let found = parse_search(&json, text, kind);
        debug!(text, kind = kind.as_str(), hits = found.len(), "wbsearchentities");
        Ok(found)
    }

    async fn fetch_schema(&self, ids: &[String]) -> Result<Vec<SchemaRecord>, Classified> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(GET_ENTITIES_CHUNK) {
            let joined = chunk.join("|");
            let params = [
                ("action", "wbgetentities"),
                ("format", "json"),
                ("ids", joined.as_str()),
                ("props", "labels|descriptions|datatype|claims"),
                ("languages", self.language.as_str()),
            ];
            let json = self.engine.fetch_json(&self.api_url, &params).await?;
            records.extend(parse_entities(&json, &self.language));
        }
        debug!(requested = ids.len(), found = records.len(), "wbgetentities");
        Ok(records)
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

pub fn parse_search(json: &Value, text: &str, kind: IdKind) -> Vec<GroundedIdentifier> {
    let resolved_at = Utc::now();
    json.get("search")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let id = hit.get("id").and_then(Value::as_str)?;
                    Some(GroundedIdentifier {
                        raw_text: text.to_string(),
                        resolved_id: id.to_string(),
                        kind,
                        label: str_field(hit, "label"),
                        description: str_field(hit, "description"),
                        concept_uri: str_field(hit, "concepturi"),
                        resolved_at,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn localized(entity: &Value, field: &str, language: &str) -> String {
    entity
        .get(field)
        .and_then(|m| m.get(language))
        .and_then(|v| v.get("value"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn instance_of(entity: &Value) -> Vec<String> {
    entity
        .pointer("/claims/P31")
        .and_then(Value::as_array)
        .map(|claims| {
            claims
                .iter()
                .filter_map(|c| c.pointer("/mainsnak/datavalue/value/id").and_then(Value::as_str))
                .take(INSTANCE_OF_KEEP)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_entities(json: &Value, language: &str) -> Vec<SchemaRecord> {
    let Some(entities) = json.get("entities").and_then(Value::as_object) else {
        return Vec::new();
    };
    entities
        .iter()
        .filter(|(_, e)| e.get("missing").is_none())
        .map(|(id, e)| SchemaRecord {
            id: id.clone(),
            label: localized(e, "labels", language),
            description: localized(e, "descriptions", language),
            datatype: str_field(e, "datatype"),
            instance_of: instance_of(e),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_search_hits() {
        let body = json!({"search": [
            {"id": "Q76", "label": "Barack Obama", "description": "president of the United States from 2009 to 2017",
             "concepturi": "http://www.wikidata.org/entity/Q76"},
            {"label": "no id, skipped"}
        ]});
        let hits = parse_search(&body, "barack obama", IdKind::Entity);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].resolved_id, "Q76");
        assert_eq!(hits[0].concept_uri, "http://www.wikidata.org/entity/Q76");
        assert_eq!(hits[0].raw_text, "barack obama");
    }

    #[test]
    fn test_parse_entities_skips_missing_and_reads_claims() {
        let body = json!({"entities": {
            "Q76": {
                "labels": {"en": {"language": "en", "value": "Barack Obama"}},
                "descriptions": {"en": {"language": "en", "value": "44th president"}},
                "claims": {"P31": [
                    {"mainsnak": {"datavalue": {"value": {"id": "Q5"}}}},
                    {"mainsnak": {"snaktype": "novalue"}}
                ]}
            },
            "P26": {
                "labels": {"en": {"value": "spouse"}},
                "datatype": "wikibase-item"
            },
            "Q0": {"id": "Q0", "missing": ""}
        }});
        let mut records = parse_entities(&body, "en");
        records.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "P26");
        assert_eq!(records[0].datatype, "wikibase-item");
        assert_eq!(records[1].instance_of, vec!["Q5"]);
    }
}

//! Offline stand-in for the Wikidata endpoints, for tool and facade tests.

use std::sync::Arc;

use serde_json::{json, Value};

use kg_core::config::Config;
use kg_sparql::testing::{ok, ScriptedTransport};
use kg_sparql::transport::{OutboundRequest, RawResponse, TransportError};

use crate::facade::ToolFacade;

/// Facade over `transport` with default configuration.
pub fn offline_facade(transport: Arc<ScriptedTransport>) -> ToolFacade {
    match ToolFacade::from_config(&Config::default(), transport) {
        Ok(facade) => facade,
        Err(e) => panic!("default lint config must compile: {e}"),
    }
}

/// A transport answering like a tiny Wikidata: Barack Obama (Q76), Michelle
/// Obama (Q13133), spouse (P26) and instance of (P31).
pub fn wikidata_transport() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::with_handler(answer))
}

fn answer(request: &OutboundRequest) -> Result<RawResponse, TransportError> {
    match request.param("action") {
        Some("wbsearchentities") => ok(search(request.param("search").unwrap_or_default()).to_string()),
        Some("wbgetentities") => ok(entities(request.param("ids").unwrap_or_default()).to_string()),
        _ => ok(sparql(request.param("query").unwrap_or_default()).to_string()),
    }
}

fn search(text: &str) -> Value {
    let hits = match text.to_lowercase().as_str() {
        "barack obama" => vec![json!({
            "id": "Q76",
            "label": "Barack Obama",
            "description": "president of the United States from 2009 to 2017",
            "concepturi": "http://www.wikidata.org/entity/Q76"
        })],
        "spouse" => vec![json!({
            "id": "P26",
            "label": "spouse",
            "description": "the subject has the object as their spouse",
            "concepturi": "http://www.wikidata.org/entity/P26"
        })],
        "instance of" => vec![json!({
            "id": "P31",
            "label": "instance of",
            "description": "that class of which this subject is a particular example and member",
            "concepturi": "http://www.wikidata.org/entity/P31"
        })],
        _ => Vec::new(),
    };
    json!({ "search": hits })
}

fn entities(ids: &str) -> Value {
    let mut out = serde_json::Map::new();
    for id in ids.split('|') {
        let entity = match id {
            "Q76" => json!({
                "labels": {"en": {"value": "Barack Obama"}},
                "descriptions": {"en": {"value": "president of the United States from 2009 to 2017"}},
                "claims": {"P31": [{"mainsnak": {"datavalue": {"value": {"id": "Q5"}}}}]}
            }),
            "P26" => json!({
                "labels": {"en": {"value": "spouse"}},
                "descriptions": {"en": {"value": "the subject has the object as their spouse"}},
                "datatype": "wikibase-item"
            }),
            _ => json!({"id": id, "missing": ""}),
        };
        out.insert(id.to_string(), entity);
    }
    json!({ "entities": out })
}

fn sparql(query: &str) -> Value {
    if query.trim_start().to_uppercase().starts_with("ASK") {
        return json!({"head": {}, "boolean": true});
    }
    json!({
        "head": {"vars": ["spouse", "spouseLabel"]},
        "results": {"bindings": [{
            "spouse": {"type": "uri", "value": "http://www.wikidata.org/entity/Q13133"},
            "spouseLabel": {"type": "literal", "value": "Michelle Obama", "xml:lang": "en"}
        }]}
    })
}

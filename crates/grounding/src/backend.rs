use async_trait::async_trait;

use kg_core::{Classified, GroundedIdentifier, IdKind, SchemaRecord};

/// The knowledge graph's own search and label facilities.
#[async_trait]
pub trait GroundingBackend: Send + Sync {
    /// Up to `k` ranked identifiers of `kind` matching `text`.
    async fn search(&self, text: &str, kind: IdKind, k: usize) -> Result<Vec<GroundedIdentifier>, Classified>;

    /// Schema records for `ids`. Unknown identifiers are omitted.
    async fn fetch_schema(&self, ids: &[String]) -> Result<Vec<SchemaRecord>, Classified>;
}

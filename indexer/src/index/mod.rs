//! Search index backends.
//!
//! Documents are keyed by the primary resource id inside an index named by
//! the endpoint descriptor. Writes overwrite and deleting a missing document
//! succeeds, so every operation is idempotent.

pub mod elasticsearch;
pub mod memory;

use crate::assembler::AssembledDocument;
use crate::error::IndexerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumString};

pub use elasticsearch::ElasticsearchIndexWriter;
pub use memory::{InMemoryIndexWriter, IndexOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Succeeded,
    Failed
}

impl OperationStatus {
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

/// An indexed document found by an embedded-resource search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub index: String,
    /// `data.type` of the indexed document, when the source carries it.
    pub resource_type: Option<String>,
    pub id: String
}

#[async_trait]
pub trait IndexWriter: Send + Sync {
    async fn write(
        &self,
        document_id: &str,
        document: &AssembledDocument,
        index_name: &str
    ) -> IndexerResult<OperationStatus>;

    async fn delete(&self, document_id: &str, index_name: &str) -> IndexerResult<OperationStatus>;

    /// Finds every document across `index_names` whose `included` array
    /// holds an entry with the given type and id.
    async fn search(
        &self,
        index_names: &[String],
        embedded_type: &str,
        embedded_id: &str
    ) -> IndexerResult<Vec<DocumentRef>>;

    async fn get(
        &self,
        document_id: &str,
        index_name: &str
    ) -> IndexerResult<Option<AssembledDocument>>;

    /// Creates `index_name` with the embedded-document mapping when missing.
    async fn ensure_index(&self, index_name: &str) -> IndexerResult<()>;
}

/// Index mapping: `included` is nested so type and id must match on the same
/// entry.
pub fn index_mapping() -> Value {
    let reference = json!({
        "properties": {
            "type": { "type": "keyword" },
            "id": { "type": "keyword" }
        }
    });
    let mut included = reference.clone();
    included["type"] = json!("nested");

    json!({
        "mappings": {
            "properties": {
                "data": reference,
                "included": included
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_operation_status_strings() {
        assert_eq!(OperationStatus::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!(OperationStatus::from_str("FAILED").unwrap(), OperationStatus::Failed);
        assert_eq!(serde_json::to_string(&OperationStatus::Failed).unwrap(), "\"FAILED\"");
    }

    #[test]
    fn test_mapping_nests_included() {
        let mapping = index_mapping();
        assert_eq!(mapping["mappings"]["properties"]["included"]["type"], "nested");
        assert_eq!(
            mapping["mappings"]["properties"]["included"]["properties"]["id"]["type"],
            "keyword"
        );
        assert!(mapping["mappings"]["properties"]["data"].get("type").is_none());
    }
}

//! Turns a raw JSON:API payload into the document shape written to the index.
//!
//! Stub entries of `included` (a `type`/`id` reference without `attributes`)
//! are resolved by fetching the referenced resource from its own service and
//! embedding its `data.attributes`. Resolution is best-effort per entry: an
//! entry that cannot be resolved is kept without an `attributes` member and
//! the rest of the document is still assembled. At most `concurrency`
//! fetches run at once and entries keep their original order.

use crate::client::ResourceClient;
use crate::error::{IndexerError, IndexerResult};
use config::EndpointRegistry;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// `meta` member used upstream to flag unresolved references.
pub const EXTERNAL_META_KEY: &str = "external";

pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledDocument {
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Value>>,

    pub meta: Map<String, Value>
}

impl AssembledDocument {
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    pub fn included(&self) -> &[Value] {
        self.included.as_deref().unwrap_or_default()
    }

    /// Whether `included` holds an entry for `resource_type`/`id`.
    pub fn embeds(&self, resource_type: &str, id: &str) -> bool {
        self.included()
            .iter()
            .any(|entry| entry_ref(entry) == Some((resource_type, id)))
    }

    pub fn included_entry(&self, resource_type: &str, id: &str) -> Option<&Value> {
        self.included()
            .iter()
            .find(|entry| entry_ref(entry) == Some((resource_type, id)))
    }

    pub fn to_value(&self) -> IndexerResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn entry_ref(entry: &Value) -> Option<(&str, &str)> {
    let resource_type = entry.get("type")?.as_str()?;
    let id = entry.get("id")?.as_str()?;
    Some((resource_type, id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Untouched,
    Resolved,
    Failed
}

pub struct DocumentAssembler {
    registry: Arc<EndpointRegistry>,
    client: Arc<dyn ResourceClient>,
    concurrency: usize
}

impl DocumentAssembler {
    pub fn new(registry: Arc<EndpointRegistry>, client: Arc<dyn ResourceClient>) -> Self {
        Self {
            registry,
            client,
            concurrency: DEFAULT_FETCH_CONCURRENCY
        }
    }

    /// Caps the number of stub entries fetched at the same time.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn assemble(&self, raw: &str) -> IndexerResult<AssembledDocument> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|e| IndexerError::MalformedDocument(format!("Payload is not JSON: {}", e)))?;
        self.assemble_value(payload).await
    }

    pub async fn assemble_value(&self, payload: Value) -> IndexerResult<AssembledDocument> {
        let Value::Object(mut payload) = payload else {
            return Err(IndexerError::MalformedDocument(
                "Payload is not a JSON object".to_string()
            ));
        };

        let data = payload
            .remove("data")
            .ok_or_else(|| IndexerError::MalformedDocument("Missing `data` member".to_string()))?;

        let mut meta = match payload.remove("meta") {
            Some(Value::Object(meta)) => meta,
            Some(_) => {
                return Err(IndexerError::MalformedDocument(
                    "`meta` member is not an object".to_string()
                ));
            }
            None => {
                return Err(IndexerError::MalformedDocument(
                    "Missing `meta` member".to_string()
                ));
            }
        };
        meta.shift_remove(EXTERNAL_META_KEY);

        let included = match payload.remove("included") {
            None | Some(Value::Null) => None,
            Some(Value::Array(entries)) => Some(self.resolve_included(entries).await),
            Some(_) => {
                return Err(IndexerError::MalformedDocument(
                    "`included` member is not an array".to_string()
                ));
            }
        };

        Ok(AssembledDocument {
            data,
            included,
            meta
        })
    }

    async fn resolve_included(&self, entries: Vec<Value>) -> Vec<Value> {
        let results: Vec<(Value, Resolution)> = stream::iter(entries)
            .map(|entry| self.resolve_entry(entry))
            .buffered(self.concurrency)
            .collect()
            .await;

        let resolved = results
            .iter()
            .filter(|(_, r)| *r == Resolution::Resolved)
            .count();
        let failed = results
            .iter()
            .filter(|(_, r)| *r == Resolution::Failed)
            .count();
        debug!(total = results.len(), resolved, failed, "Resolved included entries");

        results.into_iter().map(|(entry, _)| entry).collect()
    }

    async fn resolve_entry(&self, mut entry: Value) -> (Value, Resolution) {
        let Some(object) = entry.as_object() else {
            return (entry, Resolution::Untouched);
        };
        if object.contains_key("attributes") {
            return (entry, Resolution::Untouched);
        }
        let Some((resource_type, id)) = entry_ref(&entry) else {
            return (entry, Resolution::Untouched);
        };
        let Some(endpoint) = self.registry.lookup(resource_type) else {
            return (entry, Resolution::Untouched);
        };
        let (resource_type, id) = (resource_type.to_string(), id.to_string());

        let attributes = match self.client.fetch(&endpoint, Some(&id)).await {
            Ok(body) => extract_attributes(&body),
            Err(e) => Err(e)
        };

        match attributes {
            Ok(attributes) => {
                if let Some(object) = entry.as_object_mut() {
                    object.insert("attributes".to_string(), attributes);
                }
                (entry, Resolution::Resolved)
            }
            Err(e) => {
                warn!(
                    resource_type = %resource_type,
                    id = %id,
                    error = %e,
                    "Failed to resolve included entry, embedding it without attributes"
                );
                (entry, Resolution::Failed)
            }
        }
    }
}

fn extract_attributes(body: &str) -> IndexerResult<Value> {
    let document: Value = serde_json::from_str(body)?;
    document
        .get("data")
        .and_then(|data| data.get("attributes"))
        .filter(|attributes| attributes.is_object())
        .cloned()
        .ok_or_else(|| {
            IndexerError::MalformedDocument("Fetched resource has no `data.attributes`".to_string())
        })
}

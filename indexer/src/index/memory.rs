//! In-process index used by tests and local dry runs.

use super::{DocumentRef, IndexWriter, OperationStatus};
use crate::assembler::AssembledDocument;
use crate::error::{IndexerError, IndexerResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOperation {
    Write { index: String, id: String },
    Delete { index: String, id: String },
    Search { indices: Vec<String> }
}

#[derive(Default)]
pub struct InMemoryIndexWriter {
    indices: RwLock<BTreeMap<String, BTreeMap<String, AssembledDocument>>>,
    history: RwLock<Vec<IndexOperation>>,
    unavailable: AtomicBool
}

impl InMemoryIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the engine were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<IndexOperation> {
        self.history.read().clone()
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    pub fn write_count(&self) -> usize {
        self.history
            .read()
            .iter()
            .filter(|op| matches!(op, IndexOperation::Write { .. }))
            .count()
    }

    pub fn document_count(&self, index_name: &str) -> usize {
        self.indices
            .read()
            .get(index_name)
            .map_or(0, BTreeMap::len)
    }

    pub fn index_exists(&self, index_name: &str) -> bool {
        self.indices.read().contains_key(index_name)
    }

    fn check_available(&self) -> IndexerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexerError::Index("In-memory index unavailable".to_string()));
        }
        Ok(())
    }

    fn record(&self, operation: IndexOperation) {
        self.history.write().push(operation);
    }
}

#[async_trait]
impl IndexWriter for InMemoryIndexWriter {
    async fn write(
        &self,
        document_id: &str,
        document: &AssembledDocument,
        index_name: &str
    ) -> IndexerResult<OperationStatus> {
        self.check_available()?;
        self.indices
            .write()
            .entry(index_name.to_string())
            .or_default()
            .insert(document_id.to_string(), document.clone());
        self.record(IndexOperation::Write {
            index: index_name.to_string(),
            id: document_id.to_string()
        });
        Ok(OperationStatus::Succeeded)
    }

    async fn delete(&self, document_id: &str, index_name: &str) -> IndexerResult<OperationStatus> {
        self.check_available()?;
        if let Some(index) = self.indices.write().get_mut(index_name) {
            index.remove(document_id);
        }
        self.record(IndexOperation::Delete {
            index: index_name.to_string(),
            id: document_id.to_string()
        });
        Ok(OperationStatus::Succeeded)
    }

    async fn search(
        &self,
        index_names: &[String],
        embedded_type: &str,
        embedded_id: &str
    ) -> IndexerResult<Vec<DocumentRef>> {
        self.check_available()?;
        self.record(IndexOperation::Search {
            indices: index_names.to_vec()
        });

        let wanted: HashSet<&str> = index_names.iter().map(String::as_str).collect();
        let indices = self.indices.read();
        let refs = indices
            .iter()
            .filter(|(name, _)| wanted.contains(name.as_str()))
            .flat_map(|(name, documents)| {
                documents
                    .iter()
                    .filter(|(_, document)| document.embeds(embedded_type, embedded_id))
                    .map(|(id, document)| DocumentRef {
                        index: name.clone(),
                        resource_type: document.resource_type().map(str::to_string),
                        id: id.clone()
                    })
            })
            .collect();
        Ok(refs)
    }

    async fn get(
        &self,
        document_id: &str,
        index_name: &str
    ) -> IndexerResult<Option<AssembledDocument>> {
        self.check_available()?;
        Ok(self
            .indices
            .read()
            .get(index_name)
            .and_then(|index| index.get(document_id))
            .cloned())
    }

    async fn ensure_index(&self, index_name: &str) -> IndexerResult<()> {
        self.check_available()?;
        self.indices
            .write()
            .entry(index_name.to_string())
            .or_default();
        Ok(())
    }
}

//! Fetch → assemble → write orchestration and the reverse-relationship
//! cascade.
//!
//! `DocumentManager` is the single entry point the messaging layer calls.
//! When a resource that other documents embed changes, the cascade searches
//! every configured index for documents embedding it and re-indexes each
//! owner, which re-fetches the owner and re-resolves its `included` entries.

use crate::assembler::{AssembledDocument, DEFAULT_FETCH_CONCURRENCY, DocumentAssembler};
use crate::cache::{CachedResourceClient, ResponseCache};
use crate::client::ResourceClient;
use crate::error::{IndexerError, IndexerResult};
use crate::index::{DocumentRef, IndexWriter, OperationStatus};
use crate::notification::{
    DocumentOperationNotification, NotificationHandler, NotificationOutcome, OperationType
};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{EndpointDescriptor, EndpointRegistry};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Apply,
    DryRun
}

impl WriteMode {
    fn from_dry_run(dry_run: bool) -> Self {
        if dry_run { Self::DryRun } else { Self::Apply }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub embedded_type: String,
    pub embedded_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub hits: usize,
    pub reindexed: usize,
    pub errors: Vec<CascadeError>
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeError {
    pub resource_type: Option<String>,
    pub document_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>
}

impl CascadeReport {
    pub fn new(embedded_type: &str, embedded_id: &str) -> Self {
        Self {
            embedded_type: embedded_type.to_string(),
            embedded_id: embedded_id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            hits: 0,
            reindexed: 0,
            errors: Vec::new()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, resource_type: Option<&str>, document_id: &str, error: impl ToString) {
        self.errors.push(CascadeError {
            resource_type: resource_type.map(str::to_string),
            document_id: document_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now()
        });
    }
}

pub struct DocumentManager {
    registry: Arc<EndpointRegistry>,
    client: Arc<dyn ResourceClient>,
    assembler: DocumentAssembler,
    index: Arc<dyn IndexWriter>,
    cache: Option<Arc<ResponseCache>>,
    fetch_concurrency: usize
}

impl DocumentManager {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        client: Arc<dyn ResourceClient>,
        index: Arc<dyn IndexWriter>
    ) -> Self {
        let assembler = DocumentAssembler::new(registry.clone(), client.clone());
        Self {
            registry,
            client,
            assembler,
            index,
            cache: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY
        }
    }

    /// Caps concurrent upstream fetches while resolving one document.
    #[must_use]
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self.assembler = self.assembler.with_concurrency(concurrency);
        self
    }

    /// Serves included-entry resolution from `cache`. Primary fetches keep
    /// going straight to the upstream service.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        let cached: Arc<dyn ResourceClient> =
            Arc::new(CachedResourceClient::new(self.client.clone(), cache.clone()));
        self.assembler = DocumentAssembler::new(self.registry.clone(), cached)
            .with_concurrency(self.fetch_concurrency);
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    fn descriptor(&self, resource_type: &str) -> IndexerResult<Arc<EndpointDescriptor>> {
        self.registry
            .lookup(resource_type)
            .ok_or_else(|| IndexerError::UnsupportedType(resource_type.to_string()))
    }

    pub async fn index_document(
        &self,
        resource_type: &str,
        id: &str
    ) -> IndexerResult<AssembledDocument> {
        self.index_document_with(resource_type, id, WriteMode::Apply)
            .await
    }

    async fn index_document_with(
        &self,
        resource_type: &str,
        id: &str,
        mode: WriteMode
    ) -> IndexerResult<AssembledDocument> {
        let descriptor = self.descriptor(resource_type)?;

        let raw = self.client.fetch(&descriptor, Some(id)).await?;
        let document = self.assembler.assemble(&raw).await?;

        let Some(index_name) = descriptor.index() else {
            debug!(resource_type = %resource_type, document_id = %id, "No index configured, skipping write");
            return Ok(document);
        };

        if mode == WriteMode::DryRun {
            info!(resource_type = %resource_type, document_id = %id, index = %index_name, "Dry run, document not written");
            return Ok(document);
        }

        match self.index.write(id, &document, index_name).await? {
            OperationStatus::Succeeded => {
                Telemetry::record_indexed(resource_type);
                info!(resource_type = %resource_type, document_id = %id, index = %index_name, "Document indexed");
                Ok(document)
            }
            OperationStatus::Failed => Err(IndexerError::Index(format!(
                "Index {} rejected document {}",
                index_name, id
            )))
        }
    }

    pub async fn delete_document(
        &self,
        resource_type: &str,
        id: &str
    ) -> IndexerResult<OperationStatus> {
        self.delete_document_with(resource_type, id, WriteMode::Apply)
            .await
    }

    async fn delete_document_with(
        &self,
        resource_type: &str,
        id: &str,
        mode: WriteMode
    ) -> IndexerResult<OperationStatus> {
        let descriptor = self.descriptor(resource_type)?;

        let Some(index_name) = descriptor.index() else {
            debug!(resource_type = %resource_type, document_id = %id, "No index configured, nothing to delete");
            return Ok(OperationStatus::Succeeded);
        };

        if mode == WriteMode::DryRun {
            info!(resource_type = %resource_type, document_id = %id, index = %index_name, "Dry run, document not deleted");
            return Ok(OperationStatus::Succeeded);
        }

        let status = self.index.delete(id, index_name).await?;
        match status {
            OperationStatus::Succeeded => {
                Telemetry::record_deleted(resource_type);
                info!(resource_type = %resource_type, document_id = %id, index = %index_name, "Document deleted");
                Ok(status)
            }
            OperationStatus::Failed => Err(IndexerError::Index(format!(
                "Index {} rejected delete of {}",
                index_name, id
            )))
        }
    }

    /// Re-indexes every document embedding `embedded_type`/`embedded_id`.
    pub async fn process_embedded_document(
        &self,
        embedded_type: &str,
        embedded_id: &str
    ) -> IndexerResult<CascadeReport> {
        self.process_embedded_document_with(embedded_type, embedded_id, WriteMode::Apply)
            .await
    }

    async fn process_embedded_document_with(
        &self,
        embedded_type: &str,
        embedded_id: &str,
        mode: WriteMode
    ) -> IndexerResult<CascadeReport> {
        let mut report = CascadeReport::new(embedded_type, embedded_id);

        if let Some(cache) = &self.cache {
            cache.invalidate(embedded_type, embedded_id);
        }

        if !self.registry.is_embeddable(embedded_type) {
            debug!(embedded_type = %embedded_type, "Type is not embedded anywhere, skipping cascade");
            report.complete();
            return Ok(report);
        }

        let index_names = self.registry.index_names();
        if index_names.is_empty() {
            report.complete();
            return Ok(report);
        }

        let hits = self
            .index
            .search(&index_names, embedded_type, embedded_id)
            .await?;
        let owners = self.dedupe_hits(hits, &mut report);
        report.hits = owners.len();
        Telemetry::record_cascade_hits(embedded_type, owners.len());
        info!(
            embedded_type = %embedded_type,
            embedded_id = %embedded_id,
            hits = owners.len(),
            "Reconciling documents embedding changed resource"
        );

        for (resource_type, id) in owners {
            match self.index_document_with(&resource_type, &id, mode).await {
                Ok(_) => report.reindexed += 1,
                Err(e) => {
                    Telemetry::record_failure("cascade", e.kind());
                    warn!(
                        resource_type = %resource_type,
                        document_id = %id,
                        error = %e,
                        "Failed to re-index embedding document"
                    );
                    report.add_error(Some(&resource_type), &id, &e);
                }
            }
        }

        report.complete();
        Ok(report)
    }

    /// Resolves the owning type of each hit and drops duplicates found in
    /// several indices.
    fn dedupe_hits(
        &self,
        hits: Vec<DocumentRef>,
        report: &mut CascadeReport
    ) -> Vec<(String, String)> {
        let mut seen = HashSet::new();
        let mut owners = Vec::new();
        for hit in hits {
            let resource_type = hit.resource_type.clone().or_else(|| {
                self.registry
                    .descriptor_for_index(&hit.index)
                    .map(|descriptor| descriptor.resource_type.clone())
            });
            let Some(resource_type) = resource_type else {
                warn!(index = %hit.index, document_id = %hit.id, "Cannot determine type of search hit");
                report.add_error(None, &hit.id, format!("Unknown type for hit in index {}", hit.index));
                continue;
            };
            if seen.insert((resource_type.clone(), hit.id.clone())) {
                owners.push((resource_type, hit.id));
            }
        }
        owners
    }

    pub async fn get_indexed_document(
        &self,
        resource_type: &str,
        id: &str
    ) -> IndexerResult<Option<AssembledDocument>> {
        let descriptor = self.descriptor(resource_type)?;
        match descriptor.index() {
            Some(index_name) => self.index.get(id, index_name).await,
            None => Ok(None)
        }
    }

    /// Creates every configured index that does not exist yet.
    pub async fn ensure_indices(&self) -> IndexerResult<()> {
        for index_name in self.registry.index_names() {
            self.index.ensure_index(&index_name).await?;
        }
        Ok(())
    }

    async fn apply_primary(
        &self,
        operation: OperationType,
        resource_type: &str,
        id: &str,
        mode: WriteMode
    ) -> IndexerResult<()> {
        match operation {
            OperationType::Add | OperationType::Update => self
                .index_document_with(resource_type, id, mode)
                .await
                .map(|_| ()),
            OperationType::Delete => self
                .delete_document_with(resource_type, id, mode)
                .await
                .map(|_| ()),
            OperationType::NotDefined => Err(IndexerError::InvalidNotification(
                "operationType is NOT_DEFINED".to_string()
            ))
        }
    }
}

#[async_trait]
impl NotificationHandler for DocumentManager {
    async fn handle(&self, notification: DocumentOperationNotification) -> NotificationOutcome {
        let (resource_type, id) = match notification.validate() {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, notification = ?notification, "Dropping invalid notification");
                return NotificationOutcome::Rejected(e.to_string());
            }
        };
        let operation = notification.operation_type;
        let mode = WriteMode::from_dry_run(notification.dry_run);
        info!(
            resource_type = %resource_type,
            document_id = %id,
            operation = %operation,
            dry_run = notification.dry_run,
            "Processing document notification"
        );

        let primary = match self.apply_primary(operation, resource_type, id, mode).await {
            Err(IndexerError::UnsupportedType(t)) if !self.registry.is_embeddable(&t) => {
                warn!(resource_type = %t, "Dropping notification for unsupported type");
                return NotificationOutcome::Rejected(IndexerError::UnsupportedType(t).to_string());
            }
            Err(IndexerError::UnsupportedType(_)) => Ok(()),
            other => other
        };

        let cascade = self
            .process_embedded_document_with(resource_type, id, mode)
            .await;

        let failure = match (primary, cascade) {
            (Err(e), _) | (Ok(()), Err(e)) => Some(e),
            (Ok(()), Ok(report)) => {
                if report.has_errors() {
                    warn!(
                        resource_type = %resource_type,
                        document_id = %id,
                        failed = report.errors.len(),
                        hits = report.hits,
                        "Cascade completed with failures"
                    );
                }
                None
            }
        };

        match failure {
            None => NotificationOutcome::Processed,
            Some(e) => {
                Telemetry::record_failure(&operation.to_string(), e.kind());
                error!(
                    resource_type = %resource_type,
                    document_id = %id,
                    operation = %operation,
                    error = %e,
                    "Notification processing failed"
                );
                NotificationOutcome::Failed(e.to_string())
            }
        }
    }
}

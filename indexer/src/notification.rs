//! Change notifications exchanged with the message transport.

use crate::error::{IndexerError, IndexerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Add,
    Update,
    Delete,
    #[default]
    #[serde(other)]
    NotDefined
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOperationNotification {
    #[serde(default)]
    pub document_type: Option<String>,

    #[serde(default)]
    pub document_id: Option<String>,

    #[serde(default)]
    pub operation_type: OperationType,

    #[serde(default)]
    pub dry_run: bool
}

impl DocumentOperationNotification {
    pub fn new(
        operation_type: OperationType,
        document_type: impl Into<String>,
        document_id: impl Into<String>
    ) -> Self {
        Self {
            document_type: Some(document_type.into()),
            document_id: Some(document_id.into()),
            operation_type,
            dry_run: false
        }
    }

    pub fn add(document_type: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::new(OperationType::Add, document_type, document_id)
    }

    pub fn update(document_type: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::new(OperationType::Update, document_type, document_id)
    }

    pub fn delete(document_type: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, document_type, document_id)
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Checks the mandatory fields and returns `(type, id)`.
    pub fn validate(&self) -> IndexerResult<(&str, &str)> {
        if self.operation_type == OperationType::NotDefined {
            return Err(IndexerError::InvalidNotification(
                "operationType is NOT_DEFINED".to_string()
            ));
        }
        let document_type = self
            .document_type
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| IndexerError::InvalidNotification("documentType is missing".to_string()))?;
        let document_id = self
            .document_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| IndexerError::InvalidNotification("documentId is missing".to_string()))?;
        Ok((document_type, document_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Processed,
    /// Invalid notification dropped without processing.
    Rejected(String),
    Failed(String)
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: DocumentOperationNotification) -> NotificationOutcome;
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, notification: DocumentOperationNotification) -> IndexerResult<()>;
}

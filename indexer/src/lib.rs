//! # Indexer
//!
//! Keeps a search index of denormalized JSON:API documents in step with a
//! set of upstream resource services.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  notification  ┌─────────────────┐  fetch   ┌──────────────┐
//! │ Publisher /  │───────────────►│ DocumentManager │─────────►│  JSON:API    │
//! │ intake HTTP  │                │ + assembler     │◄─────────│  services    │
//! └──────────────┘                └─────────────────┘          └──────────────┘
//!                                          │ write / delete / search
//!                                          ▼
//!                                 ┌─────────────────┐
//!                                 │  Search index   │
//!                                 └─────────────────┘
//! ```
//!
//! A change to a resource re-indexes its own document and then, through the
//! reverse-relationship cascade, every indexed document embedding it.
//!
//! ## Endpoints
//!
//! - `POST /notifications` - Enqueue a document operation notification
//! - `GET /health` - Health check endpoint

pub mod assembler;
pub mod auth;
pub mod cache;
pub mod channel;
pub mod client;
pub mod error;
pub mod index;
pub mod manager;
pub mod notification;
pub mod server;
pub mod telemetry;

pub use assembler::{AssembledDocument, DocumentAssembler};
pub use auth::{AuthSession, OAuth2Session};
pub use cache::{CachedResourceClient, ResponseCache};
pub use channel::{InProcessChannel, WorkerPool};
pub use client::{HttpResourceClient, ResourceClient};
pub use error::{IndexerError, IndexerResult};
pub use index::{
    DocumentRef, ElasticsearchIndexWriter, InMemoryIndexWriter, IndexWriter, OperationStatus
};
pub use manager::{CascadeReport, DocumentManager};
pub use notification::{
    DocumentOperationNotification, NotificationHandler, NotificationOutcome, NotificationPublisher,
    OperationType
};
pub use server::{IndexerServer, build_manager, run_from_env};

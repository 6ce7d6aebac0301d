//! Shared test fixtures for the indexer workspace.
//!
//! Provides wiremock-backed stand-ins for the external services the pipeline
//! talks to:
//! - an OAuth2 identity provider answering password and refresh grants
//! - JSON:API upstream services serving documents by type and id
//!
//! plus builders for the JSON:API payloads they serve.

mod fixtures;
mod payloads;

pub use fixtures::*;
pub use payloads::*;

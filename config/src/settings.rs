//! # Indexer Settings
//!
//! Typed configuration tree for the indexing pipeline. Every section has
//! serde defaults so a minimal file only needs credentials, the search URL
//! and the endpoint list.

use crate::endpoint::EndpointDescriptor;
use crate::error::ConfigResult;
use crate::registry::EndpointRegistry;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct IndexerConfig {
    #[serde(default)]
    #[validate(nested)]
    pub auth: AuthConfig,

    #[serde(default)]
    #[validate(nested)]
    pub http: HttpConfig,

    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    #[serde(default)]
    #[validate(nested)]
    pub search: SearchConfig,

    #[serde(default)]
    #[validate(nested)]
    pub workers: WorkerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>
}

impl IndexerConfig {
    /// Runs field-level rules, then registry-level checks.
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;
        EndpointRegistry::new(self.endpoints.clone())?;
        Ok(())
    }

    pub fn build_registry(&self) -> ConfigResult<EndpointRegistry> {
        EndpointRegistry::new(self.endpoints.clone())
    }
}

/// OAuth2 password-grant credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct AuthConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub token_endpoint: String,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String
}

/// Timeouts applied to every upstream, identity provider and search call,
/// plus the cap on concurrent upstream fetches per assembled document.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1, max = 60))]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_read_timeout")]
    #[validate(range(min = 1, max = 60))]
    pub read_timeout_seconds: u64,

    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 60))]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_fetches: usize
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_concurrent_fetches() -> usize {
    8
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            request_timeout_seconds: default_request_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches()
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Idle time-to-live, measured from last access.
    #[serde(default = "default_cache_ttl")]
    #[validate(range(min = 1, max = 86400))]
    pub ttl_seconds: u64,

    #[serde(default = "default_cache_max_entries")]
    #[validate(range(min = 1))]
    pub max_entries: usize
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_max_entries()
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Elasticsearch-compatible search engine.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    #[validate(url)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 10000))]
    pub page_size: usize,

    /// Value of the `refresh` parameter sent with writes and deletes.
    #[serde(default = "default_refresh")]
    #[validate(custom(function = "validate_refresh"))]
    pub refresh: String,

    #[serde(default = "default_create_indices")]
    pub create_indices: bool
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_page_size() -> usize {
    500
}

fn default_refresh() -> String {
    "false".to_string()
}

fn default_create_indices() -> bool {
    true
}

fn validate_refresh(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "true" | "false" | "wait_for" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_refresh_policy"))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            username: None,
            password: None,
            page_size: default_page_size(),
            refresh: default_refresh(),
            create_indices: default_create_indices()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    #[validate(range(min = 1, max = 256))]
    pub count: usize,

    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_queue_capacity()
        }
    }
}

/// Notification intake server.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    #[serde(default = "default_server_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16
}

fn default_server_enabled() -> bool {
    true
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8085
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            host: default_server_host(),
            port: default_server_port()
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

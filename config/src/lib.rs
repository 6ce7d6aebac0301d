//! # Indexer Configuration
//!
//! - Endpoint descriptors and the runtime-mutable endpoint registry
//! - Typed settings for authentication, HTTP timeouts, caching, the search
//!   engine, notification workers and the intake server
//! - File loading (TOML/YAML) with `INDEXER_*` environment overrides
//! - Validation through the `validator` crate

pub mod endpoint;
pub mod error;
pub mod file_loader;
pub mod loader;
pub mod registry;
pub mod settings;

pub use endpoint::EndpointDescriptor;
pub use error::{ConfigError, ConfigResult};
pub use file_loader::{load_from_file, load_from_toml, load_from_yaml};
pub use loader::{apply_env_overrides, load_from_env};
pub use registry::EndpointRegistry;
pub use settings::{
    AuthConfig, CacheConfig, HttpConfig, IndexerConfig, SearchConfig, ServerConfig, WorkerConfig
};
pub use validator::Validate;

//! # Environment Variable Loader
//!
//! Overlays `INDEXER_*` environment variables on top of file configuration.
//! Credentials are expected to come from the environment in deployments.
//!
//! ## Environment Variables
//! - `INDEXER_CONFIG`: path of the YAML/TOML configuration file
//! - `INDEXER_TOKEN_ENDPOINT`: OAuth2 token endpoint
//! - `INDEXER_CLIENT_ID` / `INDEXER_CLIENT_SECRET`: OAuth2 client
//! - `INDEXER_USERNAME` / `INDEXER_PASSWORD`: password-grant credentials
//! - `INDEXER_SEARCH_URL`: search engine base URL
//! - `INDEXER_SEARCH_USERNAME` / `INDEXER_SEARCH_PASSWORD`: search basic auth
//! - `INDEXER_WORKERS`: notification worker count
//! - `INDEXER_PORT`: intake server port

use crate::error::{ConfigError, ConfigResult};
use crate::file_loader::load_from_file;
use crate::settings::IndexerConfig;
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "INDEXER_CONFIG";

/// Loads the file named by `INDEXER_CONFIG` (defaults when unset), applies
/// environment overrides and validates the result.
pub fn load_from_env() -> ConfigResult<IndexerConfig> {
    let mut config = match env::var(CONFIG_PATH_ENV) {
        Ok(path) => {
            info!(path = %path, "Loading indexer configuration file");
            load_from_file(Path::new(&path))?
        }
        Err(_) => IndexerConfig::default()
    };

    apply_env_overrides(&mut config)?;
    config.validate_all()?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut IndexerConfig) -> ConfigResult<()> {
    if let Ok(value) = env::var("INDEXER_TOKEN_ENDPOINT") {
        config.auth.token_endpoint = value;
    }
    if let Ok(value) = env::var("INDEXER_CLIENT_ID") {
        config.auth.client_id = value;
    }
    if let Ok(value) = env::var("INDEXER_CLIENT_SECRET") {
        config.auth.client_secret = Some(value);
    }
    if let Ok(value) = env::var("INDEXER_USERNAME") {
        config.auth.username = value;
    }
    if let Ok(value) = env::var("INDEXER_PASSWORD") {
        config.auth.password = value;
    }
    if let Ok(value) = env::var("INDEXER_SEARCH_URL") {
        config.search.url = value;
    }
    if let Ok(value) = env::var("INDEXER_SEARCH_USERNAME") {
        config.search.username = Some(value);
    }
    if let Ok(value) = env::var("INDEXER_SEARCH_PASSWORD") {
        config.search.password = Some(value);
    }
    if let Some(count) = parse_env("INDEXER_WORKERS")? {
        config.workers.count = count;
    }
    if let Some(port) = parse_env("INDEXER_PORT")? {
        config.server.port = port;
    }
    Ok(())
}

fn parse_env<T: FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                name: name.to_string(),
                value
            }),
        Err(_) => Ok(None)
    }
}

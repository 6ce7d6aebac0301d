use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating indexer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Duplicate resource type in endpoint registry: {resource_type}")]
    DuplicateResourceType { resource_type: String },

    #[error("Invalid base URL for {resource_type}: {base_url}")]
    InvalidBaseUrl {
        resource_type: String,
        base_url: String
    },

    #[error("Invalid environment value for {name}: {value}")]
    InvalidEnvValue { name: String, value: String }
}

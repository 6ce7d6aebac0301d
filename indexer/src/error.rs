use thiserror::Error;

pub type IndexerResult<T> = Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    /// Identity provider rejected the credentials or could not be reached.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Upstream answered 404.
    #[error("Resource not found: {url}")]
    NotFound { url: String },

    #[error("Upstream API error at {url}: status {status:?} - {message}")]
    Api {
        url: String,
        status: Option<u16>,
        message: String
    },

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("Search index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    #[error("Notification channel error: {0}")]
    Channel(String),

    #[error("Intake server error: {0}")]
    Server(String)
}

impl IndexerError {
    pub fn api(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Api {
            url: url.into(),
            status,
            message: message.into()
        }
    }

    /// Maps a transport failure talking to `url` onto the taxonomy.
    pub fn transport(url: &str, error: &reqwest::Error) -> Self {
        Self::api(url, error.status().map(|s| s.as_u16()), error.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the failure is confined to a single document, so the worker
    /// can move on to the next notification.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Api { .. } | Self::Index(_) | Self::MalformedDocument(_)
        )
    }

    /// Short label used for failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::NotFound { .. } => "not_found",
            Self::Api { .. } => "api",
            Self::MalformedDocument(_) => "malformed_document",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::Index(_) => "index",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::InvalidNotification(_) => "invalid_notification",
            Self::Channel(_) => "channel",
            Self::Server(_) => "server"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(
            IndexerError::NotFound {
                url: "http://x/1".to_string()
            }
            .is_recoverable()
        );
        assert!(IndexerError::api("http://x", Some(500), "boom").is_recoverable());
        assert!(IndexerError::Index("down".to_string()).is_recoverable());
        assert!(!IndexerError::Auth("rejected".to_string()).is_recoverable());
        assert!(!IndexerError::UnsupportedType("widget".to_string()).is_recoverable());
    }

    #[test]
    fn test_api_error_display_carries_status_and_url() {
        let err = IndexerError::api("http://people.local/api/persons/1", Some(503), "unavailable");
        assert_eq!(
            err.to_string(),
            "Upstream API error at http://people.local/api/persons/1: status Some(503) - unavailable"
        );
        assert_eq!(err.kind(), "api");
    }

    #[test]
    fn test_not_found_helper() {
        let err = IndexerError::NotFound {
            url: "http://x/1".to_string()
        };
        assert!(err.is_not_found());
        assert!(!IndexerError::Index("x".to_string()).is_not_found());
    }
}

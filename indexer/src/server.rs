//! Pipeline wiring, the notification intake server and process lifecycle.

use crate::auth::{AuthSession, OAuth2Session};
use crate::cache::ResponseCache;
use crate::channel::{InProcessChannel, WorkerPool};
use crate::client::{HttpResourceClient, ResourceClient};
use crate::error::{IndexerError, IndexerResult};
use crate::index::{ElasticsearchIndexWriter, IndexWriter};
use crate::manager::DocumentManager;
use crate::notification::{DocumentOperationNotification, NotificationPublisher};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use config::IndexerConfig;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct IntakeState {
    publisher: Arc<dyn NotificationPublisher>
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>
}

impl IntakeResponse {
    fn new(status: &str, message: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            message
        }
    }
}

pub fn create_router(publisher: Arc<dyn NotificationPublisher>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/notifications", post(publish_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(IntakeState { publisher })
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(IntakeResponse::new("healthy", None)))
}

async fn publish_notification(
    State(state): State<IntakeState>,
    payload: Result<Json<DocumentOperationNotification>, JsonRejection>
) -> (StatusCode, Json<IntakeResponse>) {
    let notification = match payload {
        Ok(Json(notification)) => notification,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable notification body");
            return (
                StatusCode::BAD_REQUEST,
                Json(IntakeResponse::new("rejected", Some(rejection.body_text())))
            );
        }
    };

    if let Err(e) = notification.validate() {
        warn!(error = %e, "Invalid notification submitted");
        return (
            StatusCode::BAD_REQUEST,
            Json(IntakeResponse::new("rejected", Some(e.to_string())))
        );
    }

    match state.publisher.publish(notification).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(IntakeResponse::new("accepted", None))),
        Err(e) => {
            error!(error = %e, "Failed to enqueue notification");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(IntakeResponse::new("unavailable", Some(e.to_string())))
            )
        }
    }
}

/// Builds the production pipeline: OAuth2 session, upstream client,
/// optional response cache and the Elasticsearch backend.
pub fn build_manager(config: &IndexerConfig) -> IndexerResult<DocumentManager> {
    let registry = Arc::new(config.build_registry()?);
    let auth: Arc<dyn AuthSession> = Arc::new(OAuth2Session::new(config.auth.clone(), &config.http)?);
    let client: Arc<dyn ResourceClient> = Arc::new(HttpResourceClient::new(auth, &config.http)?);
    let index: Arc<dyn IndexWriter> =
        Arc::new(ElasticsearchIndexWriter::new(config.search.clone(), &config.http)?);

    let manager = DocumentManager::new(registry, client, index)
        .with_fetch_concurrency(config.http.max_concurrent_fetches);
    if config.cache.enabled {
        Ok(manager.with_cache(Arc::new(ResponseCache::from_config(&config.cache))))
    } else {
        Ok(manager)
    }
}

pub struct IndexerServer {
    config: IndexerConfig,
    manager: Arc<DocumentManager>
}

impl IndexerServer {
    pub fn new(config: IndexerConfig) -> IndexerResult<Self> {
        config.validate_all()?;
        let manager = Arc::new(build_manager(&config)?);
        Ok(Self { config, manager })
    }

    pub fn with_manager(config: IndexerConfig, manager: Arc<DocumentManager>) -> Self {
        Self { config, manager }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<DocumentManager> {
        &self.manager
    }

    /// Runs until a shutdown signal arrives, then drains queued
    /// notifications before returning.
    pub async fn run(self) -> IndexerResult<()> {
        if self.config.search.create_indices {
            self.manager.ensure_indices().await?;
        }

        let (channel, receiver) = InProcessChannel::bounded(self.config.workers.queue_capacity);
        let pool = WorkerPool::spawn(receiver, self.manager.clone(), self.config.workers.count);

        let served = if self.config.server.enabled {
            self.serve(channel).await
        } else {
            info!("Intake server disabled by configuration");
            shutdown_signal().await;
            drop(channel);
            Ok(())
        };

        pool.shutdown().await;
        info!("Indexer stopped");
        served
    }

    async fn serve(&self, channel: InProcessChannel) -> IndexerResult<()> {
        let addr = self.config.server.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| IndexerError::Server(format!("Failed to bind to {addr}: {e}")))?;

        info!(%addr, endpoints = self.manager.registry().len(), "Notification intake listening");

        axum::serve(listener, create_router(Arc::new(channel)))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| IndexerError::Server(format!("Server error: {e}")))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

pub async fn run_from_env() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    let config = config::load_from_env()?;
    IndexerServer::new(config)?.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct CollectingPublisher {
        published: Mutex<Vec<DocumentOperationNotification>>,
        closed: bool
    }

    #[async_trait::async_trait]
    impl NotificationPublisher for CollectingPublisher {
        async fn publish(&self, notification: DocumentOperationNotification) -> IndexerResult<()> {
            if self.closed {
                return Err(IndexerError::Channel("closed".to_string()));
            }
            self.published.lock().push(notification);
            Ok(())
        }
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/notifications")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(Arc::new(CollectingPublisher::default()));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_valid_notification_accepted() {
        let publisher = Arc::new(CollectingPublisher::default());
        let router = create_router(publisher.clone());

        let response = router
            .oneshot(post_json(
                r#"{"documentType":"person","documentId":"abc","operationType":"UPDATE"}"#
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            publisher.published.lock().as_slice(),
            [DocumentOperationNotification::update("person", "abc")]
        );
    }

    #[tokio::test]
    async fn test_invalid_notification_rejected() {
        let publisher = Arc::new(CollectingPublisher::default());
        let router = create_router(publisher.clone());

        let response = router
            .clone()
            .oneshot(post_json(r#"{"documentType":"person","operationType":"ADD"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router.oneshot(post_json("not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_unavailable() {
        let publisher = Arc::new(CollectingPublisher {
            closed: true,
            ..Default::default()
        });
        let response = create_router(publisher)
            .oneshot(post_json(
                r#"{"documentType":"person","documentId":"abc","operationType":"DELETE"}"#
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

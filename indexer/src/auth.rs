//! OAuth2 session shared by every worker.
//!
//! Holds the bearer/refresh token pair. Login and refresh are serialized
//! behind a single exchange lock: callers that lose the race observe the
//! token the winner obtained instead of hitting the identity provider again.

use crate::error::{IndexerError, IndexerResult};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{AuthConfig, HttpConfig};
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const EXPIRY_SKEW_SECONDS: i64 = 5;

#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Logs in when no access token is held.
    async fn ensure_authenticated(&self) -> IndexerResult<()>;

    /// Current bearer token, authenticating first if necessary.
    async fn access_token(&self) -> IndexerResult<String>;

    /// Replaces the token pair after `stale_token` was rejected upstream and
    /// returns the new access token. When another caller already replaced
    /// `stale_token`, its result is returned without a provider round-trip.
    async fn refresh(&self, stale_token: &str) -> IndexerResult<String>;
}

#[derive(Debug, Clone)]
struct TokenPair {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>
}

impl TokenPair {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at <= Utc::now() + chrono::Duration::seconds(EXPIRY_SKEW_SECONDS))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    refresh_expires_in: Option<i64>,
    token_type: Option<String>
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>
}

enum RefreshFailure {
    InvalidGrant,
    Other(IndexerError)
}

/// Header set sent with every token request. The identity provider in front
/// of the upstream services expects exactly these values.
pub fn token_request_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded")
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("application/json"));
    headers
}

pub struct OAuth2Session {
    http_client: Client,
    config: AuthConfig,
    tokens: RwLock<Option<TokenPair>>,
    exchange: Mutex<()>
}

impl OAuth2Session {
    pub fn new(config: AuthConfig, http: &HttpConfig) -> IndexerResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(http.connect_timeout())
            .read_timeout(http.read_timeout())
            .timeout(http.request_timeout())
            .build()
            .map_err(|e| IndexerError::Auth(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(config, http_client))
    }

    pub fn with_client(config: AuthConfig, http_client: Client) -> Self {
        Self {
            http_client,
            config,
            tokens: RwLock::new(None),
            exchange: Mutex::new(())
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    async fn current(&self) -> Option<TokenPair> {
        self.tokens.read().await.clone()
    }

    async fn store(&self, response: TokenResponse) -> String {
        let expires_at = response
            .expires_in
            .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds));
        let access_token = response.access_token.clone();
        *self.tokens.write().await = Some(TokenPair {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at
        });
        access_token
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("client_id", self.config.client_id.clone())];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.clone()));
        }
        params
    }

    async fn post_token_request(
        &self,
        params: &[(&'static str, String)]
    ) -> IndexerResult<reqwest::Response> {
        self.http_client
            .post(&self.config.token_endpoint)
            .headers(token_request_headers())
            .form(params)
            .send()
            .await
            .map_err(|e| IndexerError::Auth(format!("Identity provider unreachable: {}", e)))
    }

    async fn login(&self) -> IndexerResult<String> {
        let mut params = self.base_params();
        params.push(("username", self.config.username.clone()));
        params.push(("password", self.config.password.clone()));
        params.push(("grant_type", "password".to_string()));

        debug!(endpoint = %self.config.token_endpoint, "Requesting password-grant token");
        let response = self.post_token_request(&params).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::Auth(format!(
                "Token request failed: {} - {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            IndexerError::Auth(format!("Failed to parse token response: {}", e))
        })?;

        info!(client_id = %self.config.client_id, "Authenticated against identity provider");
        Ok(self.store(token_response).await)
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str
    ) -> Result<String, RefreshFailure> {
        let mut params = self.base_params();
        params.push(("refresh_token", refresh_token.to_string()));
        params.push(("grant_type", "refresh_token".to_string()));

        let response = self
            .post_token_request(&params)
            .await
            .map_err(RefreshFailure::Other)?;

        let status = response.status();
        if status.is_success() {
            let token_response: TokenResponse = response.json().await.map_err(|e| {
                RefreshFailure::Other(IndexerError::Auth(format!(
                    "Failed to parse token response: {}",
                    e
                )))
            })?;
            return Ok(self.store(token_response).await);
        }

        let body = response.text().await.unwrap_or_default();
        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(&body) {
                if error.error == "invalid_grant" {
                    debug!(
                        description = error.error_description.as_deref().unwrap_or_default(),
                        "Refresh token rejected as invalid grant"
                    );
                    return Err(RefreshFailure::InvalidGrant);
                }
            }
        }

        Err(RefreshFailure::Other(IndexerError::Auth(format!(
            "Token refresh failed: {} - {}",
            status.as_u16(),
            body
        ))))
    }
}

#[async_trait]
impl AuthSession for OAuth2Session {
    async fn ensure_authenticated(&self) -> IndexerResult<()> {
        if self.is_authenticated().await {
            return Ok(());
        }

        let _guard = self.exchange.lock().await;
        if self.is_authenticated().await {
            return Ok(());
        }
        self.login().await.map(|_| ())
    }

    async fn access_token(&self) -> IndexerResult<String> {
        match self.current().await {
            Some(pair) if pair.is_expired() => self.refresh(&pair.access_token).await,
            Some(pair) => Ok(pair.access_token),
            None => {
                self.ensure_authenticated().await?;
                self.current()
                    .await
                    .map(|pair| pair.access_token)
                    .ok_or_else(|| IndexerError::Auth("No access token after login".to_string()))
            }
        }
    }

    async fn refresh(&self, stale_token: &str) -> IndexerResult<String> {
        let _guard = self.exchange.lock().await;

        let refresh_token = match self.current().await {
            Some(pair) if pair.access_token != stale_token => {
                debug!("Token already refreshed by a concurrent caller");
                return Ok(pair.access_token);
            }
            Some(pair) => pair.refresh_token,
            None => None
        };

        Telemetry::record_token_refresh();
        let Some(refresh_token) = refresh_token else {
            return self.login().await;
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(access_token) => {
                debug!("Access token refreshed");
                Ok(access_token)
            }
            Err(RefreshFailure::InvalidGrant) => {
                warn!("Refresh token expired, falling back to full login");
                self.login().await
            }
            Err(RefreshFailure::Other(e)) => Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_config(server: &MockServer) -> AuthConfig {
        AuthConfig {
            token_endpoint: format!("{}/token", server.uri()),
            client_id: "indexer".to_string(),
            client_secret: None,
            username: "svc".to_string(),
            password: "secret".to_string()
        }
    }

    fn session(server: &MockServer) -> OAuth2Session {
        OAuth2Session::new(auth_config(server), &HttpConfig::default()).unwrap()
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 300,
            "refresh_expires_in": 1800,
            "token_type": "Bearer"
        })
    }

    #[tokio::test]
    async fn test_login_sends_password_grant_with_contract_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("Content-Type", "application/x-www-form-urlencoded"))
            .and(header("Connection", "keep-alive"))
            .and(header("Accept-Encoding", "application/json"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=svc"))
            .and(body_string_contains("client_id=indexer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        session.ensure_authenticated().await.unwrap();
        session.ensure_authenticated().await.unwrap();
        assert_eq!(session.access_token().await.unwrap(), "a1");
    }

    #[tokio::test]
    async fn test_login_rejected_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "error": "invalid_client" }))
            )
            .mount(&server)
            .await;

        let result = session(&server).ensure_authenticated().await;
        assert!(matches!(result, Err(IndexerError::Auth(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_auth_error() {
        let config = AuthConfig {
            token_endpoint: "http://127.0.0.1:1/token".to_string(),
            client_id: "indexer".to_string(),
            ..Default::default()
        };
        let session = OAuth2Session::new(config, &HttpConfig::default()).unwrap();
        assert!(matches!(
            session.ensure_authenticated().await,
            Err(IndexerError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_uses_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        session.ensure_authenticated().await.unwrap();
        assert_eq!(session.refresh("a1").await.unwrap(), "a2");
        assert_eq!(session.access_token().await.unwrap(), "a2");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_before_use() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(testing::token_response("a1", "r1", 1))
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        session.ensure_authenticated().await.unwrap();

        // Lifetime is inside the expiry skew, so the first use refreshes.
        assert_eq!(session.access_token().await.unwrap(), "a2");
        assert_eq!(session.access_token().await.unwrap(), "a2");
    }

    #[tokio::test]
    async fn test_invalid_grant_falls_back_to_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(testing::invalid_grant()))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        session.ensure_authenticated().await.unwrap();
        assert_eq!(session.refresh("a1").await.unwrap(), "a1");
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(session(&server));
        session.ensure_authenticated().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            handles.push(tokio::spawn(async move { session.refresh("a1").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "a2");
        }
    }
}

use config::{AuthConfig, EndpointDescriptor};
use serde_json::Value;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::payloads::token_response;

pub const TOKEN_PATH: &str = "/oauth/token";
pub const CLIENT_ID: &str = "indexer";
pub const USERNAME: &str = "indexer-service";
pub const PASSWORD: &str = "secret";

/// Identity provider answering the password grant with `access-1` and the
/// refresh grant with `access-2`.
pub struct IdentityProviderFixture {
    server: MockServer
}

impl IdentityProviderFixture {
    pub async fn start() -> Self {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=password"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_response("access-1", "refresh-1", 300))
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_response("access-2", "refresh-2", 300))
            )
            .mount(&server)
            .await;

        tracing::debug!(uri = %server.uri(), "Identity provider fixture started");
        Self { server }
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}{}", self.server.uri(), TOKEN_PATH)
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            token_endpoint: self.token_endpoint(),
            client_id: CLIENT_ID.to_string(),
            client_secret: None,
            username: USERNAME.to_string(),
            password: PASSWORD.to_string()
        }
    }

    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}

/// One mock server standing in for every upstream resource service. Each
/// resource type lives under `/{type}`.
pub struct UpstreamFixture {
    server: MockServer
}

impl UpstreamFixture {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await
        }
    }

    pub fn base_url(&self, resource_type: &str) -> String {
        format!("{}/{}", self.server.uri(), resource_type)
    }

    pub fn descriptor(&self, resource_type: &str) -> EndpointDescriptor {
        EndpointDescriptor::new(resource_type, self.base_url(resource_type))
    }

    fn resource_path(resource_type: &str, id: &str) -> String {
        format!("/{}/{}", resource_type, id)
    }

    /// Serves `document` for `GET /{type}/{id}` to callers holding `token`.
    pub async fn mount_document(&self, resource_type: &str, id: &str, token: &str, document: Value) {
        Mock::given(method("GET"))
            .and(path(Self::resource_path(resource_type, id)))
            .and(header("Authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    /// Like [`mount_document`](Self::mount_document) but only for the next
    /// `times` requests, so a later mount can replace the response.
    pub async fn mount_document_times(
        &self,
        resource_type: &str,
        id: &str,
        token: &str,
        document: Value,
        times: u64
    ) {
        Mock::given(method("GET"))
            .and(path(Self::resource_path(resource_type, id)))
            .and(header("Authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_status(&self, resource_type: &str, id: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(Self::resource_path(resource_type, id)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_not_found(&self, resource_type: &str, id: &str) {
        self.mount_status(resource_type, id, 404).await;
    }

    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }

    pub async fn requests_for(&self, resource_type: &str, id: &str) -> usize {
        let wanted = Self::resource_path(resource_type, id);
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| {
                requests
                    .iter()
                    .filter(|request| request.url.path() == wanted)
                    .count()
            })
    }
}

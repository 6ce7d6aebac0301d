//! Authenticated JSON:API resource fetches.

use crate::auth::AuthSession;
use crate::error::{IndexerError, IndexerResult};
use crate::telemetry::FetchTimer;
use async_trait::async_trait;
use config::{EndpointDescriptor, HttpConfig};
use reqwest::header::{ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker header asking upstream services for compact (minimal) responses.
pub const COMPACT_RESPONSE_HEADER: &str = "Prefer";
pub const COMPACT_RESPONSE_VALUE: &str = "return=minimal";

#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// GETs `object_id` (or the collection when `None`) from the endpoint
    /// and returns the raw JSON body.
    async fn fetch(
        &self,
        endpoint: &EndpointDescriptor,
        object_id: Option<&str>
    ) -> IndexerResult<String>;
}

/// Builds `{baseURL}/{objectId}?include=a,b`. An absent id still appends an
/// empty trailing segment, which upstream services read as a collection GET.
pub fn build_resource_url(
    endpoint: &EndpointDescriptor,
    object_id: Option<&str>
) -> IndexerResult<Url> {
    let mut url = Url::parse(&endpoint.base_url).map_err(|e| {
        IndexerError::api(&endpoint.base_url, None, format!("Invalid base URL: {}", e))
    })?;

    url.path_segments_mut()
        .map_err(|()| IndexerError::api(&endpoint.base_url, None, "Base URL cannot carry a path"))?
        .pop_if_empty()
        .push(object_id.unwrap_or_default());

    if let Some(include) = endpoint.include_param() {
        url.set_query(Some(&format!("include={}", include)));
    }

    Ok(url)
}

pub struct HttpResourceClient {
    http_client: Client,
    auth: Arc<dyn AuthSession>
}

impl HttpResourceClient {
    pub fn new(auth: Arc<dyn AuthSession>, http: &HttpConfig) -> IndexerResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(http.connect_timeout())
            .read_timeout(http.read_timeout())
            .timeout(http.request_timeout())
            .build()
            .map_err(|e| IndexerError::api("", None, format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client, auth })
    }

    fn request_headers(token: &str) -> IndexerResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| IndexerError::Auth(format!("Access token is not a valid header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            COMPACT_RESPONSE_HEADER,
            HeaderValue::from_static(COMPACT_RESPONSE_VALUE)
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn execute(&self, url: &Url, token: &str) -> IndexerResult<reqwest::Response> {
        self.http_client
            .get(url.clone())
            .headers(Self::request_headers(token)?)
            .send()
            .await
            .map_err(|e| IndexerError::transport(url.as_str(), &e))
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn fetch(
        &self,
        endpoint: &EndpointDescriptor,
        object_id: Option<&str>
    ) -> IndexerResult<String> {
        let url = build_resource_url(endpoint, object_id)?;
        let timer = FetchTimer::new(&endpoint.resource_type);

        self.auth.ensure_authenticated().await?;
        let token = self.auth.access_token().await?;
        debug!(url = %url, resource_type = %endpoint.resource_type, "Fetching upstream resource");

        let mut response = self.execute(&url, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Upstream rejected access token, refreshing once");
            let token = self.auth.refresh(&token).await?;
            response = self.execute(&url, &token).await?;
        }
        timer.finish();

        match response.status() {
            status if status.is_success() => response
                .text()
                .await
                .map_err(|e| IndexerError::transport(url.as_str(), &e)),
            StatusCode::NOT_FOUND => Err(IndexerError::NotFound {
                url: url.to_string()
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IndexerError::api(url.as_str(), Some(status.as_u16()), body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_with_id_and_includes() {
        let endpoint = EndpointDescriptor::new("person", "http://people.local/api/persons")
            .with_includes(["organization", "roles"]);
        let url = build_resource_url(&endpoint, Some("abc")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://people.local/api/persons/abc?include=organization,roles"
        );
    }

    #[test]
    fn test_url_without_id_keeps_empty_segment() {
        let endpoint = EndpointDescriptor::new("person", "http://people.local/api/persons");
        let url = build_resource_url(&endpoint, None).unwrap();
        assert_eq!(url.as_str(), "http://people.local/api/persons/");
    }

    #[test]
    fn test_url_with_trailing_slash_base() {
        let endpoint = EndpointDescriptor::new("person", "http://people.local/api/persons/");
        let url = build_resource_url(&endpoint, Some("abc")).unwrap();
        assert_eq!(url.as_str(), "http://people.local/api/persons/abc");
    }

    #[test]
    fn test_request_headers() {
        let headers = HttpResourceClient::request_headers("t0k3n").unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer t0k3n");
        assert_eq!(headers.get(COMPACT_RESPONSE_HEADER).unwrap(), COMPACT_RESPONSE_VALUE);
        assert_eq!(headers.get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "application/json");
    }
}

//! Elasticsearch REST backend.
//!
//! Embedded-resource searches walk every hit inside a point in time with
//! `search_after`, so they are not capped by the `from`/`size` result window.

use super::{DocumentRef, IndexWriter, OperationStatus, index_mapping};
use crate::assembler::AssembledDocument;
use crate::error::{IndexerError, IndexerResult};
use async_trait::async_trait;
use config::{HttpConfig, SearchConfig};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const PIT_KEEP_ALIVE: &str = "1m";

pub struct ElasticsearchIndexWriter {
    http_client: Client,
    config: SearchConfig
}

#[derive(Debug, Deserialize)]
struct PointInTime {
    id: String
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pit_id: Option<String>,
    hits: SearchHits
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
    #[serde(default)]
    sort: Option<Vec<Value>>
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: AssembledDocument
}

impl ElasticsearchIndexWriter {
    pub fn new(config: SearchConfig, http: &HttpConfig) -> IndexerResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(http.connect_timeout())
            .read_timeout(http.read_timeout())
            .timeout(http.request_timeout())
            .build()
            .map_err(|e| IndexerError::Index(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config
        })
    }

    fn url(&self, segments: &[&str]) -> IndexerResult<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| IndexerError::Index(format!("Invalid search URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|()| IndexerError::Index("Search URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_ref()),
            None => request
        }
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> IndexerResult<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| IndexerError::Index(format!("Request to {} failed: {}", url, e)))
    }

    async fn open_point_in_time(&self, indices: &str) -> IndexerResult<String> {
        let mut url = self.url(&[indices, "_pit"])?;
        url.query_pairs_mut()
            .append_pair("keep_alive", PIT_KEEP_ALIVE)
            .append_pair("ignore_unavailable", "true");

        let response = self.send(self.http_client.post(url.clone()), &url).await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::Index(format!(
                "Failed to open point in time on {}: {} - {}",
                indices, status, body
            )));
        }

        let pit: PointInTime = response
            .json()
            .await
            .map_err(|e| IndexerError::Index(format!("Failed to parse point in time: {}", e)))?;
        Ok(pit.id)
    }

    /// Best-effort; an unclosed point in time expires on its own.
    async fn close_point_in_time(&self, pit_id: &str) {
        let url = match self.url(&["_pit"]) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot close point in time");
                return;
            }
        };

        match self
            .send(self.http_client.delete(url.clone()).json(&json!({ "id": pit_id })), &url)
            .await
        {
            Ok(response) if response.status().is_success() => debug!("Point in time closed"),
            Ok(response) => warn!(status = response.status().as_u16(), "Failed to close point in time"),
            Err(e) => warn!(error = %e, "Failed to close point in time")
        }
    }

    async fn search_page(
        &self,
        url: &Url,
        pit_id: &str,
        embedded_type: &str,
        embedded_id: &str,
        search_after: Option<&[Value]>
    ) -> IndexerResult<SearchResponse> {
        let mut body = json!({
            "size": self.config.page_size,
            "_source": ["data.type", "data.id"],
            "query": {
                "nested": {
                    "path": "included",
                    "query": {
                        "bool": {
                            "filter": [
                                { "term": { "included.type": embedded_type } },
                                { "term": { "included.id": embedded_id } }
                            ]
                        }
                    }
                }
            },
            "pit": { "id": pit_id, "keep_alive": PIT_KEEP_ALIVE },
            "sort": [{ "_shard_doc": "asc" }]
        });
        if let Some(after) = search_after {
            body["search_after"] = json!(after);
        }

        let response = self
            .send(self.http_client.post(url.clone()).json(&body), url)
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::Index(format!(
                "Search failed: {} - {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IndexerError::Index(format!("Failed to parse search response: {}", e)))
    }

    async fn collect_hits(
        &self,
        pit_id: &mut String,
        embedded_type: &str,
        embedded_id: &str
    ) -> IndexerResult<Vec<DocumentRef>> {
        let url = self.url(&["_search"])?;
        let mut refs = Vec::new();
        let mut search_after: Option<Vec<Value>> = None;

        loop {
            let page = self
                .search_page(&url, pit_id.as_str(), embedded_type, embedded_id, search_after.as_deref())
                .await?;
            if let Some(id) = page.pit_id {
                *pit_id = id;
            }

            let hits = page.hits.hits;
            let page_len = hits.len();
            search_after = hits.last().and_then(|hit| hit.sort.clone());

            refs.extend(hits.into_iter().map(|hit| DocumentRef {
                resource_type: hit
                    .source
                    .as_ref()
                    .and_then(|source| source.pointer("/data/type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                index: hit.index,
                id: hit.id
            }));

            if page_len < self.config.page_size {
                return Ok(refs);
            }
            if search_after.is_none() {
                return Err(IndexerError::Index(
                    "Search hit carries no sort values to continue from".to_string()
                ));
            }
        }
    }
}

#[async_trait]
impl IndexWriter for ElasticsearchIndexWriter {
    async fn write(
        &self,
        document_id: &str,
        document: &AssembledDocument,
        index_name: &str
    ) -> IndexerResult<OperationStatus> {
        let mut url = self.url(&[index_name, "_doc", document_id])?;
        url.query_pairs_mut()
            .append_pair("refresh", &self.config.refresh);
        debug!(index = %index_name, document_id = %document_id, "Writing document");

        let response = self
            .send(self.http_client.put(url.clone()).json(document), &url)
            .await?;

        match response.status() {
            status if status.is_success() => Ok(OperationStatus::Succeeded),
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    index = %index_name,
                    document_id = %document_id,
                    status = status.as_u16(),
                    body = %body,
                    "Search engine rejected document"
                );
                Ok(OperationStatus::Failed)
            }
        }
    }

    async fn delete(&self, document_id: &str, index_name: &str) -> IndexerResult<OperationStatus> {
        let mut url = self.url(&[index_name, "_doc", document_id])?;
        url.query_pairs_mut()
            .append_pair("refresh", &self.config.refresh);
        debug!(index = %index_name, document_id = %document_id, "Deleting document");

        let response = self.send(self.http_client.delete(url.clone()), &url).await?;

        match response.status() {
            status if status.is_success() => Ok(OperationStatus::Succeeded),
            StatusCode::NOT_FOUND => {
                debug!(index = %index_name, document_id = %document_id, "Document already absent");
                Ok(OperationStatus::Succeeded)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    index = %index_name,
                    document_id = %document_id,
                    status = status.as_u16(),
                    body = %body,
                    "Search engine rejected delete"
                );
                Ok(OperationStatus::Failed)
            }
        }
    }

    async fn search(
        &self,
        index_names: &[String],
        embedded_type: &str,
        embedded_id: &str
    ) -> IndexerResult<Vec<DocumentRef>> {
        if index_names.is_empty() {
            return Ok(Vec::new());
        }

        let indices = index_names.join(",");
        let mut pit_id = self.open_point_in_time(&indices).await?;
        let result = self
            .collect_hits(&mut pit_id, embedded_type, embedded_id)
            .await;
        self.close_point_in_time(&pit_id).await;
        let refs = result?;

        debug!(
            indices = %indices,
            embedded_type = %embedded_type,
            embedded_id = %embedded_id,
            hits = refs.len(),
            "Embedded resource search completed"
        );
        Ok(refs)
    }

    async fn get(
        &self,
        document_id: &str,
        index_name: &str
    ) -> IndexerResult<Option<AssembledDocument>> {
        let url = self.url(&[index_name, "_doc", document_id])?;
        let response = self.send(self.http_client.get(url.clone()), &url).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let parsed: GetResponse = response.json().await.map_err(|e| {
                    IndexerError::Index(format!("Failed to parse document: {}", e))
                })?;
                Ok(Some(parsed.source))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IndexerError::Index(format!(
                    "Get failed: {} - {}",
                    status.as_u16(),
                    body
                )))
            }
        }
    }

    async fn ensure_index(&self, index_name: &str) -> IndexerResult<()> {
        let url = self.url(&[index_name])?;
        let exists = self.send(self.http_client.head(url.clone()), &url).await?;
        if exists.status().is_success() {
            return Ok(());
        }

        let response = self
            .send(self.http_client.put(url.clone()).json(&index_mapping()), &url)
            .await?;

        if response.status().is_success() {
            info!(index = %index_name, "Created search index");
            return Ok(());
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(IndexerError::Index(format!(
            "Failed to create index {}: {} - {}",
            index_name, status, body
        )))
    }
}

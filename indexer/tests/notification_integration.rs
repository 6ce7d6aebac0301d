use axum::body::Body;
use axum::http::{Request, StatusCode};
use config::IndexerConfig;
use indexer::server::create_router;
use indexer::{
    DocumentManager, HttpResourceClient, InMemoryIndexWriter, InProcessChannel, OAuth2Session,
    ResponseCache, WorkerPool
};
use serde_json::json;
use std::sync::Arc;
use testing::{IdentityProviderFixture, UpstreamFixture, document, resource, stub};
use tower::ServiceExt;

fn config_yaml(idp: &IdentityProviderFixture, upstream: &UpstreamFixture) -> String {
    format!(
        r#"
auth:
  token_endpoint: {token_endpoint}
  client_id: indexer
  username: indexer-service
  password: secret
cache:
  ttl_seconds: 30
workers:
  count: 2
  queue_capacity: 8
endpoints:
  - resourceType: person
    baseURL: {person}
    includeRelationships: [organization, organization]
    indexName: persons
    reverseRelationshipTypes: [organization]
  - resourceType: organization
    baseUrl: {organization}
"#,
        token_endpoint = idp.token_endpoint(),
        person = upstream.base_url("person"),
        organization = upstream.base_url("organization")
    )
}

fn notification(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/notifications")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_intake_to_index_end_to_end() {
    let idp = IdentityProviderFixture::start().await;
    let upstream = UpstreamFixture::start().await;
    upstream
        .mount_document(
            "person",
            "abc",
            "access-1",
            document(
                resource("person", "abc", json!({ "name": "Grace" })),
                vec![stub("organization", "o1")],
                &["organization"]
            )
        )
        .await;
    upstream
        .mount_document(
            "organization",
            "o1",
            "access-1",
            document(resource("organization", "o1", json!({ "name": "Acme" })), vec![], &[])
        )
        .await;

    let config: IndexerConfig = serde_yaml::from_str(&config_yaml(&idp, &upstream)).unwrap();
    config.validate_all().unwrap();
    let registry = Arc::new(config.build_registry().unwrap());
    assert_eq!(
        registry.lookup("person").unwrap().include_relationships,
        vec!["organization".to_string()]
    );

    let auth = Arc::new(OAuth2Session::new(config.auth.clone(), &config.http).unwrap());
    let client = Arc::new(HttpResourceClient::new(auth, &config.http).unwrap());
    let index = Arc::new(InMemoryIndexWriter::new());
    let manager = Arc::new(
        DocumentManager::new(registry, client, index.clone())
            .with_cache(Arc::new(ResponseCache::from_config(&config.cache)))
    );
    manager.ensure_indices().await.unwrap();
    assert!(index.index_exists("persons"));

    let (channel, receiver) = InProcessChannel::bounded(config.workers.queue_capacity);
    let pool = WorkerPool::spawn(receiver, manager.clone(), config.workers.count);
    let router = create_router(Arc::new(channel));

    let accepted = router
        .clone()
        .oneshot(notification(json!({
            "documentType": "person",
            "documentId": "abc",
            "operationType": "ADD"
        })))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let rejected = router
        .clone()
        .oneshot(notification(json!({
            "documentType": "person",
            "documentId": "abc",
            "operationType": "NOT_DEFINED"
        })))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    drop(router);
    pool.shutdown().await;

    let stored = manager
        .get_indexed_document("person", "abc")
        .await
        .unwrap()
        .expect("person indexed by worker");
    assert_eq!(
        stored.included_entry("organization", "o1").unwrap()["attributes"]["name"],
        "Acme"
    );
    assert_eq!(index.write_count(), 1);
}

#[tokio::test]
async fn test_dry_run_notification_leaves_index_untouched() {
    let idp = IdentityProviderFixture::start().await;
    let upstream = UpstreamFixture::start().await;
    upstream
        .mount_document(
            "person",
            "abc",
            "access-1",
            document(resource("person", "abc", json!({ "name": "Grace" })), vec![], &[])
        )
        .await;

    let config: IndexerConfig = serde_yaml::from_str(&config_yaml(&idp, &upstream)).unwrap();
    let auth = Arc::new(OAuth2Session::new(config.auth.clone(), &config.http).unwrap());
    let client = Arc::new(HttpResourceClient::new(auth, &config.http).unwrap());
    let index = Arc::new(InMemoryIndexWriter::new());
    let manager = Arc::new(DocumentManager::new(
        Arc::new(config.build_registry().unwrap()),
        client,
        index.clone()
    ));

    let (channel, receiver) = InProcessChannel::bounded(4);
    let pool = WorkerPool::spawn(receiver, manager, 1);
    let response = create_router(Arc::new(channel))
        .oneshot(notification(json!({
            "documentType": "person",
            "documentId": "abc",
            "operationType": "UPDATE",
            "dryRun": true
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    pool.shutdown().await;

    assert_eq!(upstream.requests_for("person", "abc").await, 1);
    assert_eq!(index.write_count(), 0);
}

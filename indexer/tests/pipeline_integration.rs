use config::{EndpointRegistry, HttpConfig};
use indexer::index::IndexOperation;
use indexer::{
    DocumentManager, DocumentOperationNotification, HttpResourceClient, InMemoryIndexWriter,
    IndexerError, NotificationHandler, NotificationOutcome, OAuth2Session, OperationStatus,
    ResponseCache
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testing::{IdentityProviderFixture, UpstreamFixture, document, resource, stub};

struct Pipeline {
    idp: IdentityProviderFixture,
    upstream: UpstreamFixture,
    index: Arc<InMemoryIndexWriter>,
    manager: DocumentManager
}

/// `project` is indexed and embeds `organization` and `person`; neither of
/// those has an index of its own.
async fn pipeline() -> Pipeline {
    let idp = IdentityProviderFixture::start().await;
    let upstream = UpstreamFixture::start().await;

    let registry = EndpointRegistry::new([
        upstream
            .descriptor("project")
            .with_index("projects")
            .with_includes(["organization", "person"])
            .with_reverse_relationships(["organization", "person"]),
        upstream.descriptor("person"),
        upstream.descriptor("organization"),
    ])
    .unwrap();

    let http = HttpConfig::default();
    let auth = Arc::new(OAuth2Session::new(idp.auth_config(), &http).unwrap());
    let client = Arc::new(HttpResourceClient::new(auth, &http).unwrap());
    let index = Arc::new(InMemoryIndexWriter::new());
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 1000));
    let manager = DocumentManager::new(Arc::new(registry), client, index.clone()).with_cache(cache);

    Pipeline {
        idp,
        upstream,
        index,
        manager
    }
}

fn project_document(id: &str, organization_id: &str) -> serde_json::Value {
    document(
        resource("project", id, json!({ "title": format!("Project {}", id) })),
        vec![
            stub("organization", organization_id),
            resource("person", "lead", json!({ "name": "Ada" })),
        ],
        &["organization"]
    )
}

fn organization_document(id: &str, name: &str) -> serde_json::Value {
    document(resource("organization", id, json!({ "name": name })), vec![], &[])
}

#[tokio::test]
async fn test_index_then_lookup_returns_clean_document() {
    let p = pipeline().await;
    p.upstream
        .mount_document("project", "p1", "access-1", project_document("p1", "o1"))
        .await;
    p.upstream
        .mount_document("organization", "o1", "access-1", organization_document("o1", "Acme"))
        .await;

    p.manager.index_document("project", "p1").await.unwrap();

    let stored = p
        .manager
        .get_indexed_document("project", "p1")
        .await
        .unwrap()
        .expect("document indexed");
    assert_eq!(stored.id(), Some("p1"));
    assert!(!stored.meta.contains_key("external"));
    assert_eq!(
        stored.included_entry("organization", "o1").unwrap()["attributes"],
        json!({ "name": "Acme" })
    );
    assert_eq!(
        stored.included_entry("person", "lead").unwrap(),
        &resource("person", "lead", json!({ "name": "Ada" }))
    );
    assert_eq!(p.idp.token_requests().await, 1);
}

#[tokio::test]
async fn test_cascade_picks_up_renamed_embedded_resource() {
    let p = pipeline().await;
    p.upstream
        .mount_document("project", "p1", "access-1", project_document("p1", "o1"))
        .await;
    p.upstream
        .mount_document_times("organization", "o1", "access-1", organization_document("o1", "Acme"), 1)
        .await;
    p.upstream
        .mount_document("organization", "o1", "access-1", organization_document("o1", "Acme Corp"))
        .await;

    p.manager.index_document("project", "p1").await.unwrap();
    let report = p
        .manager
        .process_embedded_document("organization", "o1")
        .await
        .unwrap();

    assert_eq!(report.hits, 1);
    assert_eq!(report.reindexed, 1);
    let stored = p
        .manager
        .get_indexed_document("project", "p1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.included_entry("organization", "o1").unwrap()["attributes"]["name"],
        "Acme Corp"
    );
}

#[tokio::test]
async fn test_cascade_after_upstream_delete_strips_attributes() {
    let p = pipeline().await;
    p.upstream
        .mount_document("project", "p1", "access-1", project_document("p1", "o1"))
        .await;
    p.upstream
        .mount_document_times("organization", "o1", "access-1", organization_document("o1", "Acme"), 1)
        .await;
    p.upstream.mount_not_found("organization", "o1").await;

    p.manager.index_document("project", "p1").await.unwrap();
    let outcome = p
        .manager
        .handle(DocumentOperationNotification::delete("organization", "o1"))
        .await;
    assert_eq!(outcome, NotificationOutcome::Processed);

    let stored = p
        .manager
        .get_indexed_document("project", "p1")
        .await
        .unwrap()
        .unwrap();
    let entry = stored.included_entry("organization", "o1").unwrap();
    assert_eq!(entry, &stub("organization", "o1"));
}

#[tokio::test]
async fn test_unsupported_type_touches_no_network() {
    let p = pipeline().await;

    let result = p.manager.index_document("nonexistent-type", "any").await;

    assert!(matches!(result, Err(IndexerError::UnsupportedType(_))));
    assert_eq!(p.idp.token_requests().await, 0);
    assert_eq!(p.upstream.request_count().await, 0);
}

#[tokio::test]
async fn test_add_for_type_without_index_fetches_but_never_writes() {
    let p = pipeline().await;
    p.upstream
        .mount_document(
            "person",
            "abc",
            "access-1",
            document(resource("person", "abc", json!({ "name": "Grace" })), vec![], &[])
        )
        .await;

    let outcome = p
        .manager
        .handle(DocumentOperationNotification::add("person", "abc"))
        .await;

    assert_eq!(outcome, NotificationOutcome::Processed);
    assert_eq!(p.upstream.requests_for("person", "abc").await, 1);
    assert_eq!(p.index.write_count(), 0);
}

#[tokio::test]
async fn test_organization_update_searches_before_reindexing() {
    let p = pipeline().await;
    p.upstream
        .mount_document("project", "p1", "access-1", project_document("p1", "o1"))
        .await;
    p.upstream
        .mount_document("organization", "o1", "access-1", organization_document("o1", "Acme"))
        .await;
    p.manager.index_document("project", "p1").await.unwrap();
    p.index.clear_history();

    let outcome = p
        .manager
        .handle(DocumentOperationNotification::update("organization", "o1"))
        .await;

    assert_eq!(outcome, NotificationOutcome::Processed);
    let history = p.index.history();
    assert_eq!(
        history.first(),
        Some(&IndexOperation::Search {
            indices: vec!["projects".to_string()]
        })
    );
    assert_eq!(
        history.last(),
        Some(&IndexOperation::Write {
            index: "projects".to_string(),
            id: "p1".to_string()
        })
    );
}

#[tokio::test]
async fn test_second_unauthorized_is_api_error() {
    let p = pipeline().await;
    p.upstream.mount_status("project", "p9", 401).await;

    let result = p.manager.index_document("project", "p9").await;

    assert!(matches!(
        result,
        Err(IndexerError::Api {
            status: Some(401),
            ..
        })
    ));
    assert_eq!(p.upstream.requests_for("project", "p9").await, 2);
    // login plus exactly one refresh
    assert_eq!(p.idp.token_requests().await, 2);
}

#[tokio::test]
async fn test_unauthorized_once_then_refreshed_token_succeeds() {
    let p = pipeline().await;
    p.upstream
        .mount_document("project", "p2", "access-2", project_document("p2", "o2"))
        .await;
    p.upstream.mount_status("project", "p2", 401).await;
    p.upstream.mount_not_found("organization", "o2").await;

    let assembled = p.manager.index_document("project", "p2").await.unwrap();

    assert_eq!(assembled.id(), Some("p2"));
    assert_eq!(p.upstream.requests_for("project", "p2").await, 2);
    assert_eq!(p.index.document_count("projects"), 1);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let p = pipeline().await;
    p.upstream
        .mount_document("project", "p1", "access-1", project_document("p1", "o1"))
        .await;
    p.upstream.mount_not_found("organization", "o1").await;
    p.manager.index_document("project", "p1").await.unwrap();

    for _ in 0..2 {
        assert_eq!(
            p.manager.delete_document("project", "p1").await.unwrap(),
            OperationStatus::Succeeded
        );
    }
    assert!(
        p.manager
            .get_indexed_document("project", "p1")
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(
        p.manager.delete_document("person", "abc").await.unwrap(),
        OperationStatus::Succeeded
    );
}

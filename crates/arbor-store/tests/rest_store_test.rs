//! HTTP-level tests for the PostgREST store client.

use arbor_core::{Error, JsonMap, NaturalKey, RemoteStore};
use arbor_store::{RestStore, StoreConfig};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> RestStore {
    let config = StoreConfig::new(server.uri(), "test-key")
        .with_retry_backoff_ms(1)
        .with_max_retries(2);
    RestStore::new(config).expect("client should build")
}

fn object(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected JSON object"),
    }
}

#[tokio::test]
async fn test_create_sends_auth_and_returns_row() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/workspaces"))
        .and(header("apikey", "test-key"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("Prefer", "return=representation"))
        .and(body_json(json!({"code": "acme", "name": "Acme"})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!([{"id": "ws-1", "code": "acme", "name": "Acme"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let row = store
        .create("workspaces", &object(json!({"code": "acme", "name": "Acme"})))
        .await
        .expect("create should succeed");

    assert_eq!(row.id, "ws-1");
    assert_eq!(row.get_str("code"), Some("acme"));
}

#[tokio::test]
async fn test_create_conflict_is_distinguished() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"workspaces_code_key\"",
            "details": "Key (code)=(acme) already exists."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .create("workspaces", &object(json!({"code": "acme"})))
        .await
        .unwrap_err();

    match err {
        Error::Conflict { table, message } => {
            assert_eq!(table, "workspaces");
            assert!(message.contains("already exists"));
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_foreign_key_violation_is_not_a_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/projects"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23503",
            "message": "insert or update on table \"projects\" violates foreign key constraint \"projects_workspace_id_fkey\"",
            "details": "Key (workspace_id)=(ws-gone) is not present in table \"workspaces\"."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .create(
            "projects",
            &object(json!({"workspace_id": "ws-gone", "code": "p"})),
        )
        .await
        .unwrap_err();

    assert!(!err.is_conflict(), "got {:?}", err);
    assert!(matches!(err, Error::InvalidInput(_)));
    let msg = err.to_string();
    assert!(msg.contains("23503"));
    assert!(msg.contains("projects_workspace_id_fkey"));
}

#[tokio::test]
async fn test_create_conflict_without_code_is_still_a_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(409).set_body_string(""))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .create("workspaces", &object(json!({"code": "acme"})))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_create_retries_when_connection_is_refused() {
    // Reserve a port, then release it so the first attempt is refused.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let config = StoreConfig::new(format!("http://{}", addr), "test-key")
        .with_retry_backoff_ms(300)
        .with_max_retries(3);
    let store = RestStore::new(config).expect("client should build");
    let record = object(json!({"code": "acme"}));

    let start_server = async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let listener = std::net::TcpListener::bind(addr).unwrap();
        let server = MockServer::builder().listener(listener).start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/workspaces"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!([{"id": "ws-1", "code": "acme"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        server
    };

    let (result, _server) = tokio::join!(store.create("workspaces", &record), start_server);

    let row = result.expect("create should succeed once the store is up");
    assert_eq!(row.id, "ws-1");
}

#[tokio::test]
async fn test_patch_retries_transient_responses() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/workspaces"))
        .and(query_param("id", "eq.ws-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "ws-1", "code": "acme", "description": "new"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let patched = store
        .patch("workspaces", "ws-1", &object(json!({"description": "new"})))
        .await
        .expect("third attempt should succeed")
        .expect("patch should return the row");

    assert_eq!(patched.get_str("description"), Some("new"));
}

#[tokio::test]
async fn test_create_server_error_is_not_replayed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/stakeholders"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .create("stakeholders", &object(json!({"name": "x"})))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_find_by_natural_key_filters_on_every_column() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("workspace_id", "eq.ws-1"))
        .and(query_param("slug", "eq.proj-a/readme"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "doc-9", "workspace_id": "ws-1", "slug": "proj-a/readme"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let key = NaturalKey::new()
        .with("workspace_id", "ws-1")
        .with("slug", "proj-a/readme");
    let found = store
        .find_by_natural_key("documents", &key)
        .await
        .expect("lookup should succeed");

    assert_eq!(found.map(|r| r.id), Some("doc-9".to_string()));
}

#[tokio::test]
async fn test_find_by_natural_key_absent_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let found = store
        .find_by_natural_key("workspaces", &NaturalKey::new().with("code", "ghost"))
        .await
        .expect("lookup should succeed");

    assert!(found.is_none());
}

#[tokio::test]
async fn test_find_retries_transient_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "ws-1", "code": "acme"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let found = store
        .find_by_natural_key("workspaces", &NaturalKey::new().with("code", "acme"))
        .await
        .expect("second attempt should succeed");

    assert_eq!(found.map(|r| r.id), Some("ws-1".to_string()));
}

#[tokio::test]
async fn test_unauthorized_is_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/workspaces"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid API key"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .find_by_natural_key("workspaces", &NaturalKey::new().with("code", "acme"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(err.to_string().contains("Invalid API key"));
}

#[tokio::test]
async fn test_patch_addresses_row_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/workspaces"))
        .and(query_param("id", "eq.ws-1"))
        .and(body_json(json!({"description": "new"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "ws-1", "code": "acme", "description": "new"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let patched = store
        .patch("workspaces", "ws-1", &object(json!({"description": "new"})))
        .await
        .expect("patch should succeed")
        .expect("patch should return the row");

    assert_eq!(patched.get_str("description"), Some("new"));
}

#[tokio::test]
async fn test_patch_without_body_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/stakeholders"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let patched = store
        .patch("stakeholders", "s-1", &object(json!({"name": "x"})))
        .await
        .expect("patch should succeed");

    assert!(patched.is_none());
}

#[tokio::test]
async fn test_list_by_parent_paginates_until_short_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/stakeholders"))
        .and(query_param("workspace_id", "eq.ws-1"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "s1", "workspace_id": "ws-1"},
            {"id": "s2", "workspace_id": "ws-1"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/stakeholders"))
        .and(query_param("workspace_id", "eq.ws-1"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "s3", "workspace_id": "ws-1"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = StoreConfig::new(server.uri(), "test-key").with_page_size(2);
    let store = RestStore::new(config).expect("client should build");
    let rows = store
        .list_by_parent("stakeholders", &NaturalKey::new().with("workspace_id", "ws-1"))
        .await
        .expect("listing should succeed");

    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "s3"]);
}

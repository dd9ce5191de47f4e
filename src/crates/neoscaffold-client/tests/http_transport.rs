mod common;

use std::sync::Arc;

use neoscaffold_client::storage::USER_INFO_KEY;
use neoscaffold_client::{ApiClient, ClientSettings, KeyValueStore, StoredSession};
use neoscaffold_core::InterventionKind;
use serde_json::{json, Value};

use common::{signed_in_store, MockBackend};

#[tokio::test]
async fn test_requests_carry_session_headers() {
    let backend = MockBackend::start(|_| (200, r#"{"ok":true}"#.to_string())).await;
    let store = signed_in_store().await;
    let settings = ClientSettings::new(backend.url.clone()).with_auth(true);
    let session = Arc::new(StoredSession::new(store, Some(USER_INFO_KEY.to_string())));
    let api = ApiClient::new(&settings, session).unwrap();

    let response = api
        .toggle_interventions(InterventionKind::Stop, "abc", &["3".to_string()], false)
        .await
        .unwrap();
    assert_eq!(response, json!({"ok": true}));

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/interventions/stop-points");
    assert_eq!(request.header("authorization"), Some("Bearer tok"));
    assert_eq!(request.header("authenticator"), Some("google"));
    assert_eq!(
        request.json(),
        json!({"workflow_id": "abc", "node_ids": ["3"], "all_stop": false})
    );
}

#[tokio::test]
async fn test_unauthorized_invalidates_session() {
    let backend = MockBackend::start(|_| (401, r#"{"error":"token expired"}"#.to_string())).await;
    let store = signed_in_store().await;
    let settings = ClientSettings::new(backend.url.clone()).with_auth(true);
    let session = Arc::new(StoredSession::new(
        store.clone(),
        Some(USER_INFO_KEY.to_string()),
    ));
    let api = ApiClient::new(&settings, session.clone()).unwrap();

    let err = api.get_extensions().await.unwrap_err();

    assert!(err.is_authorization_failure());
    assert!(err.to_string().contains("401"));
    assert!(store.get(USER_INFO_KEY).await.unwrap().is_none());
    assert!(session.signed_out());
}

#[tokio::test]
async fn test_server_error_keeps_session() {
    let backend = MockBackend::start(|_| (500, String::new())).await;
    let store = signed_in_store().await;
    let settings = ClientSettings::new(backend.url.clone()).with_auth(true);
    let session = Arc::new(StoredSession::new(
        store.clone(),
        Some(USER_INFO_KEY.to_string()),
    ));
    let api = ApiClient::new(&settings, session.clone()).unwrap();

    assert!(api.queue_prompt("{}").await.is_err());
    assert!(store.get(USER_INFO_KEY).await.unwrap().is_some());
    assert!(!session.signed_out());
}

/// A local port containing "401" with nothing listening on it.
fn closed_port_with_401() -> u16 {
    [4011, 8401, 14010, 24011, 34015]
        .into_iter()
        .find(|port| std::net::TcpListener::bind(("127.0.0.1", *port)).is_ok())
        .expect("no free port containing 401")
}

#[tokio::test]
async fn test_connection_refused_keeps_session() {
    let url = format!("http://127.0.0.1:{}/api401", closed_port_with_401());
    let store = signed_in_store().await;
    let settings = ClientSettings::new(url).with_auth(true);
    let session = Arc::new(StoredSession::new(
        store.clone(),
        Some(USER_INFO_KEY.to_string()),
    ));
    let api = ApiClient::new(&settings, session.clone()).unwrap();

    let err = api.get_extensions().await.unwrap_err();

    assert!(err.to_string().contains("401"));
    assert!(!err.is_authorization_failure());
    assert!(store.get(USER_INFO_KEY).await.unwrap().is_some());
    assert!(!session.signed_out());
}

#[tokio::test]
async fn test_step_through_without_auth() {
    let backend = MockBackend::start(|_| (200, String::new())).await;
    let settings = ClientSettings::new(backend.url.clone());
    let session = Arc::new(StoredSession::new(signed_in_store().await, None));
    let api = ApiClient::new(&settings, session).unwrap();

    let response = api
        .step_through("abc", &["4".to_string(), "9".to_string()])
        .await
        .unwrap();
    assert_eq!(response, Value::Null);

    let request = &backend.requests()[0];
    assert_eq!(request.path, "/interventions/breakpoints/step-through");
    assert_eq!(request.header("authorization"), None);
    assert_eq!(request.json(), json!({"workflow_id": "abc", "node_ids": ["4", "9"]}));
}

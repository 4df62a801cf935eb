//! Shared scaffolding for the integration suites: an app wired against an
//! in-memory store and a scripted sandbox, plus small request helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use airlock::api::{self, AppState};
use airlock::crypto::MasterKey;
use airlock::dispatcher::Dispatcher;
use airlock::sandbox::SandboxBackend;
use airlock::services::{CredentialService, ExecutionService, ProfileService};
use airlock::store::Store;
use airlock::testing::ScriptedSandbox;
use airlock::worker::WorkerPool;

pub struct TestApp {
    pub router: Router,
    pub sandbox: Arc<ScriptedSandbox>,
    pub state: AppState,
}

pub fn test_app() -> TestApp {
    test_app_with(Duration::from_secs(300))
}

pub fn test_app_with(llm_wait: Duration) -> TestApp {
    let store = Store::in_memory().expect("in-memory store");
    let master_key = Arc::new(MasterKey::from_bytes([42u8; 32]));

    let credentials = CredentialService::new(store.clone(), Arc::clone(&master_key));
    let profiles = ProfileService::new(store.clone(), Arc::clone(&master_key));
    let history = ExecutionService::new(store.clone());

    let sandbox = Arc::new(ScriptedSandbox::default());
    let pool = WorkerPool::new(vec![Arc::clone(&sandbox) as Arc<dyn SandboxBackend>]);
    let dispatcher = Dispatcher::new(pool, history.clone(), llm_wait);

    let state = AppState {
        credentials,
        profiles,
        history,
        dispatcher,
        store,
        default_exec_timeout: Duration::from_secs(60),
    };
    TestApp {
        router: api::router(state.clone()),
        sandbox,
        state,
    }
}

/// Fire one request and decode the JSON body (Null for empty bodies).
pub async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, json)
}

/// Poll an execution until it leaves the non-terminal states.
pub async fn poll_until_terminal(router: &Router, execution_id: &str) -> serde_json::Value {
    for _ in 0..300 {
        let (status, body) = request(
            router,
            "GET",
            &format!("/executions/{execution_id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "poll failed: {body}");
        let state = body["status"].as_str().unwrap_or_default().to_string();
        if matches!(state.as_str(), "completed" | "error" | "timeout") {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never reached a terminal status");
}

/// Poll until the execution reports a given status.
pub async fn poll_until_status(
    router: &Router,
    execution_id: &str,
    wanted: &str,
) -> serde_json::Value {
    for _ in 0..300 {
        let (status, body) = request(
            router,
            "GET",
            &format!("/executions/{execution_id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "poll failed: {body}");
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never reached status {wanted}");
}

/// Run the admin first-boot flow and return a session token.
pub async fn admin_token(router: &Router) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/api/admin/setup",
        None,
        Some(serde_json::json!({ "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "setup failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

/// Create a credential (with value), a profile bound to it, and lock the
/// profile. Returns (profile_id, key_id, secret).
pub async fn provisioned_profile(
    router: &Router,
    admin: &str,
    credential_name: &str,
    credential_value: &str,
) -> (String, String, String) {
    let (status, _) = request(
        router,
        "POST",
        "/api/admin/credentials",
        Some(admin),
        Some(serde_json::json!({
            "name": credential_name,
            "description": "k",
            "value": credential_value,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, profile) = request(
        router,
        "POST",
        "/profiles",
        None,
        Some(serde_json::json!({ "description": "r" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let profile_id = profile["id"].as_str().unwrap().to_string();

    let (status, _) = request(
        router,
        "POST",
        &format!("/profiles/{profile_id}/credentials"),
        None,
        Some(serde_json::json!({ "credentials": [credential_name] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, locked) = request(
        router,
        "POST",
        &format!("/api/admin/profiles/{profile_id}/lock"),
        Some(admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "lock failed: {locked}");
    let key = locked["key"].as_str().unwrap();
    let (key_id, secret) = key.split_once(':').unwrap();
    (profile_id, key_id.to_string(), secret.to_string())
}

//! Integration tests for the agent surface: credential discovery, profile
//! setup, and the auth failures around `/execute`.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{admin_token, provisioned_profile, request, test_app};

#[tokio::test]
async fn health_check() {
    let app = test_app();
    let (status, body) = request(&app.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn agent_creates_credential_slots_batch() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        "POST",
        "/credentials",
        None,
        Some(json!({ "credentials": [
            { "name": "API_KEY", "description": "prod key" },
            { "name": "DB_URL" },
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], json!(["API_KEY", "DB_URL"]));
    assert_eq!(body["skipped"], json!([]));

    // Re-creating an existing slot skips it silently.
    let (status, body) = request(
        &app.router,
        "POST",
        "/credentials",
        None,
        Some(json!({ "credentials": [
            { "name": "API_KEY" },
            { "name": "NEW_ONE" },
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], json!(["NEW_ONE"]));
    assert_eq!(body["skipped"], json!(["API_KEY"]));

    let (status, body) = request(&app.router, "GET", "/credentials", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["credentials"].as_array().unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|c| c["value_exists"] == false));
}

#[tokio::test]
async fn invalid_credential_names_are_rejected() {
    let app = test_app();
    let too_long = "x".repeat(129);
    for bad in ["", "123bad", "has space", too_long.as_str()] {
        let (status, _) = request(
            &app.router,
            "POST",
            "/credentials",
            None,
            Some(json!({ "credentials": [{ "name": bad }] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "name {bad:?}");
    }
}

#[tokio::test]
async fn profile_crud_up_to_lock() {
    let app = test_app();

    let (status, profile) = request(
        &app.router,
        "POST",
        "/profiles",
        None,
        Some(json!({ "description": "ci runner" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(profile["locked"], false);
    assert_eq!(profile["revoked"], false);
    assert!(profile["key_id"].is_null());
    let profile_id = profile["id"].as_str().unwrap();

    let (status, fetched) = request(
        &app.router,
        "GET",
        &format!("/profiles/{profile_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["description"], "ci runner");

    let (status, _) = request(&app.router, "GET", "/profiles/unknown-id", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, listing) = request(&app.router, "GET", "/profiles", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["profiles"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn credential_binding_respects_lock_state() {
    let app = test_app();
    let admin = admin_token(&app.router).await;
    request(
        &app.router,
        "POST",
        "/credentials",
        None,
        Some(json!({ "credentials": [{ "name": "K" }] })),
    )
    .await;
    let (_, profile) = request(
        &app.router,
        "POST",
        "/profiles",
        None,
        Some(json!({ "description": "" })),
    )
    .await;
    let profile_id = profile["id"].as_str().unwrap();

    // Unknown credential name is 404.
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/profiles/{profile_id}/credentials"),
        None,
        Some(json!({ "credentials": ["MISSING"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, updated) = request(
        &app.router,
        "POST",
        &format!("/profiles/{profile_id}/credentials"),
        None,
        Some(json!({ "credentials": ["K"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["credentials"][0]["name"], "K");

    // Lock, then binding changes are refused.
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/admin/profiles/{profile_id}/lock"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/profiles/{profile_id}/credentials"),
        None,
        Some(json!({ "credentials": ["K"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = request(
        &app.router,
        "DELETE",
        &format!("/profiles/{profile_id}/credentials"),
        None,
        Some(json!({ "credentials": ["K"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn execute_requires_bearer_auth() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        "POST",
        "/execute",
        None,
        Some(json!({ "script": "print(1)", "hash": "0".repeat(64) })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Missing authentication token");

    // Wrong prefix is rejected before any lookup.
    let (status, body) = request(
        &app.router,
        "POST",
        "/execute",
        Some("atk_notaprofilekey"),
        Some(json!({ "script": "print(1)", "hash": "0".repeat(64) })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid profile key");

    // Well-formed but unknown key_id.
    let (status, body) = request(
        &app.router,
        "POST",
        "/execute",
        Some(&format!("ark_{}", "z".repeat(24))),
        Some(json!({ "script": "print(1)", "hash": "0".repeat(64) })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid profile key");
}

#[tokio::test]
async fn execute_rejects_bad_hmac_with_403() {
    let app = test_app();
    let admin = admin_token(&app.router).await;
    let (_, key_id, _secret) =
        provisioned_profile(&app.router, &admin, "API_KEY", "sk-live-abc1234").await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/execute",
        Some(&key_id),
        Some(json!({ "script": "print(1)", "hash": "0".repeat(64) })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["detail"].as_str().unwrap().contains("HMAC"));
}

#[tokio::test]
async fn execute_rejects_revoked_profile() {
    let app = test_app();
    let admin = admin_token(&app.router).await;
    let (profile_id, key_id, secret) =
        provisioned_profile(&app.router, &admin, "API_KEY", "sk-live-abc1234").await;

    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/admin/profiles/{profile_id}/revoke"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let script = "print(1)";
    let hash = airlock::services::profiles::script_hmac(&secret, script);
    let (status, body) = request(
        &app.router,
        "POST",
        "/execute",
        Some(&key_id),
        Some(json!({ "script": script, "hash": hash })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Profile has been revoked");
}

#[tokio::test]
async fn execute_rejects_expired_profile() {
    let app = test_app();
    let admin = admin_token(&app.router).await;
    let (profile_id, key_id, secret) =
        provisioned_profile(&app.router, &admin, "API_KEY", "sk-live-abc1234").await;

    let past = (chrono::Utc::now() - chrono::Duration::seconds(1)).to_rfc3339();
    let (status, _) = request(
        &app.router,
        "PUT",
        &format!("/api/admin/profiles/{profile_id}"),
        Some(&admin),
        Some(json!({ "expires_at": past })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let script = "print(1)";
    let hash = airlock::services::profiles::script_hmac(&secret, script);
    let (status, body) = request(
        &app.router,
        "POST",
        "/execute",
        Some(&key_id),
        Some(json!({ "script": script, "hash": hash })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Profile has expired");
}

#[tokio::test]
async fn poll_unknown_execution_is_404() {
    let app = test_app();
    let (status, _) = request(&app.router, "GET", "/executions/exec_nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn skill_document_lists_locked_profiles() {
    let app = test_app();
    let admin = admin_token(&app.router).await;

    let (status, body) = request(&app.router, "GET", "/skill.md", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("No profiles configured yet"));

    let (profile_id, _, _) =
        provisioned_profile(&app.router, &admin, "API_KEY", "sk-live-abc1234").await;
    let (_, body) = request(&app.router, "GET", "/skill.md", None, None).await;
    let text = body.as_str().unwrap();
    assert!(text.contains(&profile_id));
    assert!(text.contains("API_KEY"));
}

#[tokio::test]
async fn credential_delete_blocked_by_locked_profile_references() {
    let app = test_app();
    let admin = admin_token(&app.router).await;

    // Credential K attached to unlocked P1 and locked P2.
    request(
        &app.router,
        "POST",
        "/api/admin/credentials",
        Some(&admin),
        Some(json!({ "name": "K", "value": "v-123456" })),
    )
    .await;

    let (_, p1) = request(&app.router, "POST", "/profiles", None, Some(json!({}))).await;
    let p1_id = p1["id"].as_str().unwrap().to_string();
    request(
        &app.router,
        "POST",
        &format!("/profiles/{p1_id}/credentials"),
        None,
        Some(json!({ "credentials": ["K"] })),
    )
    .await;

    let (_, p2) = request(&app.router, "POST", "/profiles", None, Some(json!({}))).await;
    let p2_id = p2["id"].as_str().unwrap().to_string();
    request(
        &app.router,
        "POST",
        &format!("/profiles/{p2_id}/credentials"),
        None,
        Some(json!({ "credentials": ["K"] })),
    )
    .await;
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/admin/profiles/{p2_id}/lock"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Delete is blocked and names the locked profile.
    let (status, body) = request(
        &app.router,
        "DELETE",
        "/api/admin/credentials/K",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains(&p2_id));

    // Revoking P2 unblocks deletion; P1's binding disappears with it.
    request(
        &app.router,
        "POST",
        &format!("/api/admin/profiles/{p2_id}/revoke"),
        Some(&admin),
        None,
    )
    .await;
    let (status, _) = request(
        &app.router,
        "DELETE",
        "/api/admin/credentials/K",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, p1_after) = request(
        &app.router,
        "GET",
        &format!("/profiles/{p1_id}"),
        None,
        None,
    )
    .await;
    assert!(p1_after["credentials"].as_array().unwrap().is_empty());
}

//! Operator surface under `/api/admin`.
//!
//! Carries the session-auth scheme the web console expects: a password hash
//! and the current session-token hash live in the `admin` table; management
//! routes demand `Authorization: Bearer atk_...`. The interesting parts -
//! lock/revoke/regenerate, credential value writes, execution history - are
//! thin wrappers over the same services the agent surface uses.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::services::credentials::ValueChange;
use crate::services::profiles::{ExpiryChange, ProfileInfo};
use crate::store::ExecutionFilter;

use super::{bearer_token, ApiError, AppState};

const TOKEN_PREFIX: &str = "atk_";
const TOKEN_LENGTH: usize = 32;
const TOKEN_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const PASSWORD_HASH_KEY: &str = "admin_password_hash";
const SESSION_HASH_KEY: &str = "session_token_hash";

pub fn router(state: AppState) -> Router<AppState> {
    let managed = Router::new()
        .route(
            "/api/admin/credentials",
            get(list_credentials).post(create_credential),
        )
        .route(
            "/api/admin/credentials/{name}",
            put(update_credential).delete(delete_credential),
        )
        .route("/api/admin/profiles", get(list_profiles))
        .route(
            "/api/admin/profiles/{id}",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
        .route("/api/admin/profiles/{id}/lock", post(lock_profile))
        .route("/api/admin/profiles/{id}/revoke", post(revoke_profile))
        .route(
            "/api/admin/profiles/{id}/regenerate-key",
            post(regenerate_key),
        )
        .route("/api/admin/executions", get(list_executions))
        .route("/api/admin/executions/{id}", get(get_execution))
        .route_layer(axum::middleware::from_fn_with_state(state, require_admin));

    Router::new()
        .route("/api/admin/status", get(admin_status))
        .route("/api/admin/setup", post(admin_setup))
        .route("/api/admin/login", post(admin_login))
        .merge(managed)
}

fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn generate_token() -> String {
    let mut rng = OsRng;
    let random: String = (0..TOKEN_LENGTH)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect();
    format!("{TOKEN_PREFIX}{random}")
}

/// Route-layer guard for the management routes.
async fn require_admin(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let provided = sha256_hex(token);
    let stored = state.store.admin_get(SESSION_HASH_KEY)?;
    let valid = stored
        .map(|hash| {
            hash.len() == provided.len()
                && bool::from(hash.as_bytes().ct_eq(provided.as_bytes()))
        })
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::unauthorized("Invalid or expired session token"));
    }
    Ok(next.run(request).await)
}

// -- Setup / login --

#[derive(Debug, Deserialize)]
struct PasswordRequest {
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

async fn admin_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let configured = state.store.admin_get(PASSWORD_HASH_KEY)?.is_some();
    Ok(Json(serde_json::json!({ "setup_required": !configured })))
}

/// First-visit password setup. Works exactly once.
async fn admin_setup(
    State(state): State<AppState>,
    Json(body): Json<PasswordRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if state.store.admin_get(PASSWORD_HASH_KEY)?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "Admin password already configured",
        ));
    }
    if body.password.len() < 8 {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Password must be at least 8 characters",
        ));
    }

    state
        .store
        .admin_set(PASSWORD_HASH_KEY, &sha256_hex(&body.password))?;
    let token = generate_token();
    state.store.admin_set(SESSION_HASH_KEY, &sha256_hex(&token))?;
    Ok(Json(TokenResponse { token }))
}

async fn admin_login(
    State(state): State<AppState>,
    Json(body): Json<PasswordRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let stored = state
        .store
        .admin_get(PASSWORD_HASH_KEY)?
        .ok_or_else(|| ApiError::unauthorized("Admin password not configured - run setup first"))?;

    let provided = sha256_hex(&body.password);
    let matches = stored.len() == provided.len()
        && bool::from(stored.as_bytes().ct_eq(provided.as_bytes()));
    if !matches {
        return Err(ApiError::unauthorized("Invalid password"));
    }

    let token = generate_token();
    state.store.admin_set(SESSION_HASH_KEY, &sha256_hex(&token))?;
    Ok(Json(TokenResponse { token }))
}

// -- Credentials --

#[derive(Debug, Serialize)]
struct AdminCredentialInfo {
    name: String,
    description: String,
    has_value: bool,
    created_at: String,
    updated_at: Option<String>,
}

impl From<crate::services::CredentialInfo> for AdminCredentialInfo {
    fn from(info: crate::services::CredentialInfo) -> Self {
        Self {
            name: info.name,
            description: info.description,
            has_value: info.value_exists,
            created_at: info.created_at,
            updated_at: info.updated_at,
        }
    }
}

async fn list_credentials(
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminCredentialInfo>>, ApiError> {
    let credentials = state
        .credentials
        .list()?
        .into_iter()
        .map(AdminCredentialInfo::from)
        .collect();
    Ok(Json(credentials))
}

#[derive(Debug, Deserialize)]
struct CreateCredentialRequest {
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    description: String,
}

async fn create_credential(
    State(state): State<AppState>,
    Json(body): Json<CreateCredentialRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state
        .credentials
        .create(&body.name, &body.description, body.value.as_deref())?;
    Ok((StatusCode::CREATED, Json(AdminCredentialInfo::from(info))))
}

#[derive(Debug, Deserialize)]
struct UpdateCredentialRequest {
    /// Absent: leave value untouched. Null: clear it. String: replace it.
    #[serde(default, deserialize_with = "deserialize_double_option")]
    value: Option<Option<String>>,
    #[serde(default)]
    description: Option<String>,
}

fn deserialize_double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(deserializer)?))
}

async fn update_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateCredentialRequest>,
) -> Result<Json<AdminCredentialInfo>, ApiError> {
    let change = match body.value {
        None => ValueChange::Unchanged,
        Some(None) => ValueChange::Clear,
        Some(Some(plaintext)) => ValueChange::Set(plaintext),
    };
    let info = state
        .credentials
        .update(&name, change, body.description.as_deref())?;
    Ok(Json(AdminCredentialInfo::from(info)))
}

async fn delete_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.credentials.delete(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Profiles --

async fn list_profiles(State(state): State<AppState>) -> Result<Json<Vec<ProfileInfo>>, ApiError> {
    Ok(Json(state.profiles.list()?))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileInfo>, ApiError> {
    Ok(Json(state.profiles.get(&id)?))
}

#[derive(Debug, Deserialize)]
struct UpdateProfileRequest {
    #[serde(default)]
    description: Option<String>,
    /// Absent: leave expiry untouched. Null: clear it. String: set it.
    #[serde(default, deserialize_with = "deserialize_double_option")]
    expires_at: Option<Option<String>>,
}

async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileInfo>, ApiError> {
    let expiry = match body.expires_at {
        None => ExpiryChange::Unchanged,
        Some(None) => ExpiryChange::Clear,
        Some(Some(raw)) => ExpiryChange::Set(raw),
    };
    Ok(Json(state.profiles.update(&id, body.description.as_deref(), expiry)?))
}

/// Locking returns the full `ark_ID:SECRET` key, shown exactly once.
#[derive(Debug, Serialize)]
struct ProfileLockedResponse {
    #[serde(flatten)]
    profile: ProfileInfo,
    key: String,
}

async fn lock_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileLockedResponse>, ApiError> {
    let result = state.profiles.lock(&id)?;
    Ok(Json(ProfileLockedResponse {
        profile: result.profile,
        key: result.key,
    }))
}

async fn revoke_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileInfo>, ApiError> {
    Ok(Json(state.profiles.revoke(&id)?))
}

async fn regenerate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileLockedResponse>, ApiError> {
    let result = state.profiles.regenerate_key(&id)?;
    Ok(Json(ProfileLockedResponse {
        profile: result.profile,
        key: result.key,
    }))
}

async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.profiles.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Executions --

#[derive(Debug, Deserialize)]
struct ExecutionListQuery {
    #[serde(default)]
    profile_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ExecutionSummary {
    execution_id: String,
    profile_id: String,
    status: String,
    execution_time_ms: Option<i64>,
    created_at: String,
    completed_at: Option<String>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionListQuery>,
) -> Result<Json<Vec<ExecutionSummary>>, ApiError> {
    let filter = ExecutionFilter {
        profile_id: query.profile_id,
        status: query.status,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    let rows = state.history.list(&filter)?;
    Ok(Json(
        rows.into_iter()
            .map(|row| ExecutionSummary {
                execution_id: row.id,
                profile_id: row.profile_id,
                status: row.status,
                execution_time_ms: row.execution_time_ms,
                created_at: row.created_at,
                completed_at: row.completed_at,
            })
            .collect(),
    ))
}

/// Admin detail includes the script, which the agent surface never returns.
#[derive(Debug, Serialize)]
struct AdminExecutionDetail {
    execution_id: String,
    profile_id: String,
    script: String,
    status: String,
    result: Option<serde_json::Value>,
    stdout: String,
    stderr: String,
    error: Option<String>,
    execution_time_ms: Option<i64>,
    created_at: String,
    completed_at: Option<String>,
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdminExecutionDetail>, ApiError> {
    let row = state
        .history
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(format!("Execution {id} not found")))?;
    Ok(Json(AdminExecutionDetail {
        execution_id: row.id,
        profile_id: row.profile_id,
        script: row.script,
        status: row.status,
        result: row
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        stdout: row.stdout,
        stderr: row.stderr,
        error: row.error,
        execution_time_ms: row.execution_time_ms,
        created_at: row.created_at,
        completed_at: row.completed_at,
    }))
}

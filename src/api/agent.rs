//! Agent-facing routes: credential discovery, profile setup up to lock,
//! authenticated execution, polling, and LLM respond.
//!
//! `/execute` is the only authenticated route here: Bearer key_id plus a
//! per-request HMAC over the script. Everything after authentication - the
//! resolved plaintext map in particular - stays inside the request scope.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::services::credentials::CredentialError;
use crate::services::profiles::{self, ProfileInfo};

use super::{bearer_token, ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/credentials", get(list_credentials).post(create_credentials))
        .route("/profiles", get(list_profiles).post(create_profile))
        .route("/profiles/{id}", get(get_profile))
        .route(
            "/profiles/{id}/credentials",
            post(add_profile_credentials).delete(remove_profile_credentials),
        )
        .route("/execute", post(execute))
        .route("/executions/{id}", get(poll_execution))
        .route("/executions/{id}/respond", post(respond_to_execution))
        .route("/skill.md", get(skill_md))
}

// -- Credentials --

#[derive(Debug, Serialize)]
struct AgentCredentialInfo {
    name: String,
    description: String,
    value_exists: bool,
}

async fn list_credentials(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let credentials: Vec<AgentCredentialInfo> = state
        .credentials
        .list()?
        .into_iter()
        .map(|c| AgentCredentialInfo {
            name: c.name,
            description: c.description,
            value_exists: c.value_exists,
        })
        .collect();
    Ok(Json(serde_json::json!({ "credentials": credentials })))
}

#[derive(Debug, Deserialize)]
struct CreateCredentialItem {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct CreateCredentialsRequest {
    credentials: Vec<CreateCredentialItem>,
}

/// Batch-create credential slots (names and descriptions only; values are
/// operator business). Duplicate names are skipped, invalid names reject
/// the whole request.
async fn create_credentials(
    State(state): State<AppState>,
    Json(body): Json<CreateCredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut created = Vec::new();
    let mut skipped = Vec::new();

    for item in body.credentials {
        match state.credentials.create(&item.name, &item.description, None) {
            Ok(_) => created.push(item.name),
            Err(CredentialError::NameTaken(_)) => skipped.push(item.name),
            Err(e) => return Err(e.into()),
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "created": created, "skipped": skipped })),
    ))
}

// -- Profiles --

async fn list_profiles(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let profiles: Vec<ProfileInfo> = state.profiles.list()?;
    Ok(Json(serde_json::json!({ "profiles": profiles })))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileInfo>, ApiError> {
    Ok(Json(state.profiles.get(&id)?))
}

#[derive(Debug, Deserialize)]
struct CreateProfileRequest {
    #[serde(default)]
    description: String,
}

async fn create_profile(
    State(state): State<AppState>,
    Json(body): Json<CreateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.profiles.create(&body.description)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Debug, Deserialize)]
struct ProfileCredentialsRequest {
    credentials: Vec<String>,
}

async fn add_profile_credentials(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProfileCredentialsRequest>,
) -> Result<Json<ProfileInfo>, ApiError> {
    Ok(Json(state.profiles.add_credentials(&id, &body.credentials)?))
}

async fn remove_profile_credentials(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProfileCredentialsRequest>,
) -> Result<Json<ProfileInfo>, ApiError> {
    Ok(Json(state.profiles.remove_credentials(&id, &body.credentials)?))
}

// -- Execution --

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    script: String,
    /// HMAC-SHA256(secret, script), lowercase hex.
    hash: String,
    /// Max execution time in seconds.
    #[serde(default)]
    timeout: Option<u64>,
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let auth = state.profiles.authenticate(token)?;

    // The key was valid; now prove the code is what the key holder signed.
    if !profiles::verify_script(
        secrecy::ExposeSecret::expose_secret(&auth.secret),
        &body.script,
        &body.hash,
    ) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Script hash verification failed - HMAC mismatch",
        ));
    }

    let secrets = state.credentials.resolve_for_profile(&auth.profile_id)?;
    let timeout = body
        .timeout
        .map(std::time::Duration::from_secs)
        .unwrap_or(state.default_exec_timeout);

    let execution_id = state
        .dispatcher
        .submit(&auth.profile_id, body.script, secrets, timeout)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "execution_id": execution_id,
            "poll_url": format!("/executions/{execution_id}"),
            "status": "pending",
        })),
    ))
}

async fn poll_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .dispatcher
        .poll(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Execution {id} not found")))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct LlmResponseBody {
    response: String,
}

async fn respond_to_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<LlmResponseBody>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown-but-persisted ids should 409 as "not awaiting", not 404.
    let snapshot = state.dispatcher.respond(&id, body.response).await;
    match snapshot {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(crate::dispatcher::DispatchError::NotFound(_)) => {
            match state.dispatcher.poll(&id).await? {
                Some(persisted) => Err(ApiError::new(
                    StatusCode::CONFLICT,
                    format!("Execution is '{}', not 'awaiting_llm'", persisted.status),
                )),
                None => Err(ApiError::not_found(format!("Execution {id} not found"))),
            }
        }
        Err(e) => Err(e.into()),
    }
}

// -- Skill document --

async fn skill_md(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let profiles = state.profiles.list()?;
    let mut profile_lines = String::new();
    for profile in profiles.iter().filter(|p| p.locked && !p.revoked) {
        let names: Vec<&str> = profile.credentials.iter().map(|c| c.name.as_str()).collect();
        profile_lines.push_str(&format!(
            "- `{}` - {} (credentials: {})\n",
            profile.id,
            if profile.description.is_empty() {
                "no description"
            } else {
                &profile.description
            },
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            },
        ));
    }
    if profile_lines.is_empty() {
        profile_lines.push_str("No profiles configured yet. Ask your admin to set one up.\n");
    }

    let content = format!(
        "# Airlock - Code Execution Service\n\
         \n\
         ## Overview\n\
         Airlock executes scripts with access to configured credentials.\n\
         \n\
         ## Authentication\n\
         Use a profile key (`ark_ID:SECRET`) for execution.\n\
         Include the key_id in the `Authorization: Bearer ark_...` header.\n\
         Include HMAC-SHA256(secret, script) as the `hash` field in the request body.\n\
         \n\
         ## Endpoints\n\
         \n\
         - `POST /execute` - Submit a script for execution (Bearer auth + HMAC)\n\
         - `GET /executions/{{id}}` - Poll execution status\n\
         - `POST /executions/{{id}}/respond` - Provide LLM response\n\
         - `GET /profiles` - List all profiles\n\
         - `POST /profiles` - Create a new profile\n\
         - `GET /credentials` - List all credentials\n\
         \n\
         ## Available Profiles\n\
         {profile_lines}"
    );

    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/markdown")],
        content,
    ))
}

//! HTTP surface: router assembly, shared state, and the mapping from typed
//! service errors to wire statuses.
//!
//! Error bodies are always `{"detail": "..."}`. Internal failures (store,
//! crypto) are logged with detail and surfaced as an opaque 500.

pub mod admin;
pub mod agent;
pub mod health;

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::services::credentials::CredentialError;
use crate::services::executions::ExecutionHistoryError;
use crate::services::profiles::{AuthError, ProfileError};
use crate::services::{CredentialService, ExecutionService, ProfileService};
use crate::store::{Store, StoreError};

/// Everything the handlers need, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialService,
    pub profiles: ProfileService,
    pub history: ExecutionService,
    pub dispatcher: Dispatcher,
    /// Raw store access for the admin session table.
    pub store: Store,
    /// Applied when an execute request omits `timeout`.
    pub default_exec_timeout: Duration,
}

/// Build the full router: agent surface, operator surface, health.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(agent::router())
        .merge(admin::router(state.clone()))
        .merge(health::router())
        .with_state(state)
}

/// An error ready to go on the wire.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "detail": self.detail })),
        )
            .into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        let status = match &err {
            CredentialError::InvalidName(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CredentialError::NameTaken(_) | CredentialError::InUse { .. } => StatusCode::CONFLICT,
            CredentialError::NotFound(_) | CredentialError::ProfileNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CredentialError::ProfileNotLocked(_) => StatusCode::CONFLICT,
            CredentialError::Store(_) | CredentialError::Crypto(_) => {
                tracing::error!(error = %err, "Credential service failure");
                return Self::internal();
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<ProfileError> for ApiError {
    fn from(err: ProfileError) -> Self {
        let status = match &err {
            ProfileError::NotFound(_) | ProfileError::UnknownCredential(_) => StatusCode::NOT_FOUND,
            ProfileError::InvalidExpiry(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ProfileError::AlreadyLocked(_)
            | ProfileError::NotLocked(_)
            | ProfileError::Revoked(_)
            | ProfileError::AlreadyRevoked(_)
            | ProfileError::LockedActive(_)
            | ProfileError::CredentialsLocked => StatusCode::CONFLICT,
            ProfileError::Store(_) | ProfileError::Crypto(_) => {
                tracing::error!(error = %err, "Profile service failure");
                return Self::internal();
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match &err {
            AuthError::Store(_) | AuthError::Crypto(_) => {
                tracing::error!(error = %err, "Authentication failure");
                Self::internal()
            }
            _ => Self::unauthorized(err.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match &err {
            DispatchError::NotFound(_) => Self::not_found(err.to_string()),
            DispatchError::WrongState { .. } => Self::new(StatusCode::CONFLICT, err.to_string()),
            DispatchError::History(_) => {
                tracing::error!(error = %err, "Dispatcher history failure");
                Self::internal()
            }
        }
    }
}

impl From<ExecutionHistoryError> for ApiError {
    fn from(err: ExecutionHistoryError) -> Self {
        tracing::error!(error = %err, "Execution history failure");
        Self::internal()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Store failure");
        Self::internal()
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header.
pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

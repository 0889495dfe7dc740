//! Signer Service REST API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use signer::{SupervisorError, SupervisorHandle, TokenInfo, TokenRegistry};
use std::sync::Arc;
use tracing::info;

/// Shared handler state
pub struct AppState {
    pub registry: TokenRegistry,
    pub supervisor: SupervisorHandle,
}

/// Request to activate a token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub pin: String,
}

/// All known tokens, available or not
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListResponse {
    pub tokens: Vec<TokenInfo>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { error: msg.into() }),
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: msg.into() }),
        )
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse { error: msg.into() }),
        )
    }
}

impl From<SupervisorError> for ApiError {
    fn from(e: SupervisorError) -> Self {
        match &e {
            SupervisorError::UnknownToken(_) => ApiError::not_found(e.to_string()),
            SupervisorError::ModuleNotRunning(_) | SupervisorError::NotRunning => {
                ApiError::unavailable(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

// ==================== Handlers ====================

/// Health check
pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn list_tokens(State(state): State<Arc<AppState>>) -> Json<TokenListResponse> {
    Json(TokenListResponse {
        tokens: state.registry.list(),
    })
}

pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<String>,
) -> Result<Json<TokenInfo>, ApiError> {
    state
        .registry
        .get(&token_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Token not found: {}", token_id)))
}

/// Hand a PIN to the token's worker. Login happens asynchronously; poll the
/// token's `active` flag for the result.
pub async fn activate_token(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<String>,
    Json(request): Json<ActivateRequest>,
) -> Result<StatusCode, ApiError> {
    if request.pin.is_empty() {
        return Err(ApiError::bad_request("PIN cannot be empty"));
    }
    ensure_available(&state, &token_id)?;

    info!(token_id = %token_id, "Token activation requested");
    state
        .supervisor
        .activate_token(&token_id, &request.pin)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn deactivate_token(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ensure_available(&state, &token_id)?;

    info!(token_id = %token_id, "Token deactivation requested");
    state.supervisor.deactivate_token(&token_id).await?;
    Ok(StatusCode::ACCEPTED)
}

fn ensure_available(state: &AppState, token_id: &str) -> Result<(), ApiError> {
    match state.registry.get(token_id) {
        Some(token) if token.available => Ok(()),
        Some(_) => Err(ApiError::unavailable(format!(
            "Token not available: {}",
            token_id
        ))),
        None => Err(ApiError::not_found(format!("Token not found: {}", token_id))),
    }
}

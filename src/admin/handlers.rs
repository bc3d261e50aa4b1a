use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::client_config::ClientConfig;
use crate::config::ServerConfig;
use crate::server::ClientConfigAssertion;
use crate::service::{handle_message_export_config, SaveError};

/// Error id returned when a reload fails.
pub const RELOAD_FAILED_ERROR_ID: &str = "config.reload.failed";
/// Error id returned when the client config cannot be signed yet.
pub const ASSERTION_UNAVAILABLE_ERROR_ID: &str = "config.client.assertion_unavailable";

/// JSON error body with a stable id.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub id: &'static str,
    pub message: String,
    pub status_code: u16,
}

impl ApiError {
    pub fn new(id: &'static str, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            id,
            message: message.into(),
            status_code: status.as_u16(),
        }
    }
}

impl From<SaveError> for ApiError {
    fn from(err: SaveError) -> Self {
        ApiError::new(err.id(), err.to_string(), err.status_code())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Serialize)]
pub struct ReloadStatus {
    pub status: &'static str,
}

pub async fn get_config(State(state): State<AdminState>) -> Json<ServerConfig> {
    Json(state.server.sanitized_config())
}

/// Replace the configuration and tell the cluster.
///
/// Masked secrets in the body keep their current values.
pub async fn put_config(
    State(state): State<AdminState>,
    Json(mut config): Json<ServerConfig>,
) -> Result<Json<ServerConfig>, ApiError> {
    let service = state.server.config();
    let current = service.get();

    config.desanitize(&current);
    handle_message_export_config(&mut config, &current);

    let (_, saved) = service.save(config, true).await.map_err(|e| {
        tracing::warn!(error = %e, id = e.id(), "Admin config save failed");
        ApiError::from(e)
    })?;

    let mut body = (*saved).clone();
    body.sanitize();
    Ok(Json(body))
}

pub async fn reload_config(
    State(state): State<AdminState>,
) -> Result<Json<ReloadStatus>, ApiError> {
    state.server.config().reload().await.map_err(|e| {
        ApiError::new(
            RELOAD_FAILED_ERROR_ID,
            e.to_string(),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    })?;
    Ok(Json(ReloadStatus { status: "OK" }))
}

pub async fn get_environment_config(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(state.server.environment_config())
}

pub async fn get_client_config(State(state): State<AdminState>) -> Json<ClientConfig> {
    Json(state.server.client_config_with_computed().await)
}

pub async fn get_limited_client_config(State(state): State<AdminState>) -> Json<ClientConfig> {
    Json(state.server.limited_client_config_with_computed().await)
}

/// Signed hash of the client config, verifiable with the published key.
pub async fn get_client_config_assertion(
    State(state): State<AdminState>,
) -> Result<Json<ClientConfigAssertion>, ApiError> {
    state
        .server
        .client_config_assertion()
        .map(Json)
        .map_err(|e| {
            ApiError::new(
                ASSERTION_UNAVAILABLE_ERROR_ID,
                e.to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            )
        })
}

//! Error types for fleet operations and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, Error, PartialEq)]
pub enum FleetError {
    /// Missing or malformed input
    #[error("{0}")]
    Validation(String),

    /// Unknown server, stream or route
    #[error("{0}")]
    NotFound(String),

    /// The stream is already routed and the caller did not force
    #[error("Stream already routed to another server")]
    Conflict { current_server_id: String },

    /// No fresh server matches the request
    #[error("No available edge servers found")]
    NoAvailableServer,

    /// The fleet thread is gone
    #[error("Fleet state unavailable")]
    Unavailable,
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = match &self {
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound(_) | FleetError::NoAvailableServer => StatusCode::NOT_FOUND,
            FleetError::Conflict { .. } => StatusCode::CONFLICT,
            FleetError::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = match &self {
            FleetError::Conflict { current_server_id } => json!({
                "success": false,
                "error": self.to_string(),
                "currentServer": current_server_id,
            }),
            FleetError::Unavailable => json!({
                "success": false,
                "error": "Internal server error",
            }),
            _ => json!({
                "success": false,
                "error": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

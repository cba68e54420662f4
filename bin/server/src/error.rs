//! HTTP error mapping.
//!
//! Engine failures reach handlers as `Report<TurnError>`. Only the
//! traveller-facing apology and a retry hint leave the server; details go to
//! the log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use concierge_routing::TurnError;
use rootcause::Report;
use serde_json::json;
use std::fmt;

/// Errors returned by the HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The path did not contain a valid conversation id.
    InvalidId { id: String, reason: String },
    /// The engine rejected or failed the request.
    Turn(TurnError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidId { id, reason } => {
                write!(f, "invalid conversation id '{id}': {reason}")
            }
            Self::Turn(e) => write!(f, "{e}"),
        }
    }
}

impl From<Report<TurnError>> for ApiError {
    fn from(report: Report<TurnError>) -> Self {
        let error = report.current_context().clone();
        if matches!(
            status_for(&error),
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
        ) {
            tracing::error!(error = %report, "turn failed");
        }
        Self::Turn(error)
    }
}

fn status_for(error: &TurnError) -> StatusCode {
    match error {
        TurnError::ConcurrentTurn { .. }
        | TurnError::AwaitingApproval { .. }
        | TurnError::NotSuspended { .. } => StatusCode::CONFLICT,
        TurnError::NotFound { .. } => StatusCode::NOT_FOUND,
        TurnError::IdentityUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TurnError::Assistant(_) => StatusCode::BAD_GATEWAY,
        TurnError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        TurnError::Routing(_) | TurnError::StepLimitExceeded { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::InvalidId { .. } => (
                StatusCode::BAD_REQUEST,
                json!({"error": "Invalid conversation id", "retryable": false}),
            ),
            Self::Turn(error) => (
                status_for(error),
                json!({"error": error.user_message(), "retryable": error.is_retryable()}),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::ConversationId;
    use concierge_routing::{CheckpointError, RoutingError};

    #[test]
    fn concurrent_turn_is_a_conflict() {
        let error = TurnError::ConcurrentTurn {
            conversation_id: ConversationId::new(),
        };
        assert_eq!(status_for(&error), StatusCode::CONFLICT);
    }

    #[test]
    fn routing_and_persistence_failures_are_server_errors() {
        let routing = TurnError::Routing(RoutingError::EscalateFromPrimary);
        let persistence = TurnError::Persistence(CheckpointError::Unavailable {
            reason: "pool timed out".to_string(),
        });
        assert_eq!(status_for(&routing), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(&persistence), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invalid_id_is_a_bad_request() {
        let response = ApiError::InvalidId {
            id: "nope".to_string(),
            reason: "invalid length".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

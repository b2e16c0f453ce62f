//! HTTP error type: every failure leaves as `{"error": "..."}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use db::DbError;
use engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Database(DbError::NotFound) | EngineError::NodeNotFound(_) => {
                Self::NotFound(message)
            }
            EngineError::ExecutionEnded { .. } | EngineError::WorkflowDisabled(_) => {
                Self::Conflict(message)
            }
            EngineError::DuplicateNodeId(_)
            | EngineError::UnknownNodeReference { .. }
            | EngineError::LinkMismatch { .. }
            | EngineError::MissingRoot
            | EngineError::MultipleRoots(_)
            | EngineError::CycleDetected => Self::BadRequest(message),
            EngineError::Configuration { .. } => Self::Unprocessable(message),
            EngineError::Database(_) => Self::Internal(message),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        EngineError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::ExecutionStatus;

    #[test]
    fn engine_errors_map_to_http_statuses() {
        let cases = [
            (EngineError::Database(DbError::NotFound), StatusCode::NOT_FOUND),
            (
                EngineError::ExecutionEnded {
                    execution_id: 1,
                    status: ExecutionStatus::Resolved,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::CycleDetected, StatusCode::BAD_REQUEST),
            (
                EngineError::Configuration {
                    node_id: 1,
                    node_type: "x".into(),
                    reason: "no instruction".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (EngineError::Database(DbError::TransactionFinished), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}

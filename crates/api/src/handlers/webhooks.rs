use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::debug;

use db::models::ExecutionRow;

use crate::{ApiError, AppState};

/// The request body becomes the execution's `$context`.
pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ExecutionRow>), ApiError> {
    match state.runtime.trigger_webhook(&path, payload).await? {
        Some(execution) => Ok((StatusCode::ACCEPTED, Json(execution))),
        None => {
            debug!(path = %path, "no workflow listens on webhook");
            Err(ApiError::NotFound(format!("no workflow listens on webhook '{path}'")))
        }
    }
}

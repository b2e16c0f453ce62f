use axum::{
    extract::{Path, State},
    Json,
};

use db::models::{ExecutionRow, JobPatch};

use crate::{ApiError, AppState};

/// Record an external decision on a suspended job (`{status?, result?}`)
/// and continue its execution.
pub async fn resume(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(patch): Json<JobPatch>,
) -> Result<Json<ExecutionRow>, ApiError> {
    Ok(Json(state.runtime.resume(id, patch).await?))
}

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use db::models::{ExecutionRow, JobRow};

use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct ExecutionWithJobs {
    #[serde(flatten)]
    pub execution: ExecutionRow,
    pub jobs: Vec<JobRow>,
}

pub async fn get(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionWithJobs>, ApiError> {
    let (execution, jobs) = state.runtime.execution_with_jobs(id).await?;
    Ok(Json(ExecutionWithJobs { execution, jobs }))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::models::{ExecutionRow, FlowNodeRow, WorkflowRow};
use engine::WorkflowDefinition;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ExecuteWorkflowDto {
    /// Becomes the execution's `$context`.
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Serialize)]
pub struct WorkflowWithNodes {
    #[serde(flatten)]
    pub workflow: WorkflowRow,
    pub nodes: Vec<FlowNodeRow>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkflowRow>>, ApiError> {
    Ok(Json(state.runtime.database().list_workflows().await?))
}

pub async fn get(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowWithNodes>, ApiError> {
    let database = state.runtime.database();
    let workflow = database.get_workflow(id).await?;
    let nodes = database.list_nodes(id).await?;
    Ok(Json(WorkflowWithNodes { workflow, nodes }))
}

/// Install a workflow definition as the current version of its key.
pub async fn create(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<WorkflowRow>), ApiError> {
    let workflow = state.runtime.install(definition).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn executions(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionRow>>, ApiError> {
    let database = state.runtime.database();
    database.get_workflow(id).await?;
    Ok(Json(database.list_executions(id).await?))
}

/// Run the workflow now. The execution comes back finished or suspended.
pub async fn execute(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<(StatusCode, Json<ExecutionRow>), ApiError> {
    let execution = state.runtime.execute(id, payload.context).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

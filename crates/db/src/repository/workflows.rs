//! Workflow version operations.

use sqlx::PgExecutor;

use crate::{
    DbError,
    models::{NewWorkflow, WorkflowRow},
};

const COLUMNS: &str = "id, key, title, enabled, current, trigger_type, config, created_at";

/// Insert a new workflow version and mark it current for its key.
///
/// Any previous version with the same key stops being current. Run inside a
/// transaction so both statements land together.
pub async fn create_workflow<'e, E>(executor: E, workflow: &NewWorkflow) -> Result<WorkflowRow, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        WITH retired AS (
            UPDATE workflows SET current = FALSE WHERE key = $1 AND current
        )
        INSERT INTO workflows (key, title, enabled, current, trigger_type, config, created_at)
        VALUES ($1, $2, $3, TRUE, $4, $5, now())
        RETURNING {COLUMNS}
        "#
    ))
    .bind(workflow.key)
    .bind(&workflow.title)
    .bind(workflow.enabled)
    .bind(&workflow.trigger_type)
    .bind(&workflow.config)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch a single workflow version by its primary key.
pub async fn get_workflow<'e, E>(executor: E, id: i64) -> Result<WorkflowRow, DbError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, WorkflowRow>(&format!("SELECT {COLUMNS} FROM workflows WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(DbError::NotFound)
}

/// Return all workflow versions, newest first.
pub async fn list_workflows<'e, E>(executor: E) -> Result<Vec<WorkflowRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows ORDER BY id DESC"
    ))
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

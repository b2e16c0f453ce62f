//! Execution repository functions.

use sqlx::PgExecutor;

use crate::{
    DbError,
    models::{ExecutionRow, ExecutionStatus, NewExecution},
};

const COLUMNS: &str = "id, workflow_id, key, context, status, use_transaction, created_at, updated_at";

/// Create a new execution in `Started` status.
pub async fn create_execution<'e, E>(
    executor: E,
    execution: &NewExecution,
) -> Result<ExecutionRow, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        r#"
        INSERT INTO executions (workflow_id, key, context, status, use_transaction, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, now(), now())
        RETURNING {COLUMNS}
        "#
    ))
    .bind(execution.workflow_id)
    .bind(execution.key)
    .bind(&execution.context)
    .bind(ExecutionStatus::Started.code())
    .bind(execution.use_transaction)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch an execution, optionally taking a row lock (`FOR UPDATE`).
pub async fn get_execution<'e, E>(
    executor: E,
    id: i64,
    for_update: bool,
) -> Result<ExecutionRow, DbError>
where
    E: PgExecutor<'e>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };
    sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM executions WHERE id = $1{lock}"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// All executions of a workflow version, newest first.
pub async fn list_executions<'e, E>(executor: E, workflow_id: i64) -> Result<Vec<ExecutionRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM executions WHERE workflow_id = $1 ORDER BY id DESC"
    ))
    .bind(workflow_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Move a `Started` execution to `status`. Returns whether a row changed.
pub async fn finish_execution<'e, E>(
    executor: E,
    id: i64,
    status: ExecutionStatus,
) -> Result<bool, DbError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, updated_at = now()
        WHERE id = $2 AND status = $3
        "#,
    )
    .bind(status.code())
    .bind(id)
    .bind(ExecutionStatus::Started.code())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

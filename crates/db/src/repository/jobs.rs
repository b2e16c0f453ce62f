//! Job repository functions.
//!
//! Jobs are never deleted: a node invocation inserts one row, a resumed
//! node updates its existing row.

use sqlx::PgExecutor;

use crate::{
    DbError,
    models::{JobPatch, JobRow, NewJob},
};

const COLUMNS: &str = "id, execution_id, node_id, upstream_id, status, result, created_at, updated_at";

pub async fn insert_job<'e, E>(executor: E, job: &NewJob) -> Result<JobRow, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        INSERT INTO jobs (execution_id, node_id, upstream_id, status, result, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, now(), now())
        RETURNING {COLUMNS}
        "#
    ))
    .bind(job.execution_id)
    .bind(job.node_id)
    .bind(job.upstream_id)
    .bind(job.status.code())
    .bind(&job.result)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Targeted update by id; absent patch fields keep their stored value.
pub async fn update_job<'e, E>(executor: E, id: i64, patch: &JobPatch) -> Result<JobRow, DbError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE jobs
        SET status = COALESCE($1, status),
            result = COALESCE($2, result),
            updated_at = now()
        WHERE id = $3
        RETURNING {COLUMNS}
        "#
    ))
    .bind(patch.status.map(|s| s.code()))
    .bind(&patch.result)
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// Write back a job that was loaded and then modified in memory.
pub async fn save_job<'e, E>(executor: E, job: &JobRow) -> Result<JobRow, DbError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE jobs
        SET upstream_id = $1, status = $2, result = $3, updated_at = now()
        WHERE id = $4
        RETURNING {COLUMNS}
        "#
    ))
    .bind(job.upstream_id)
    .bind(job.status.code())
    .bind(&job.result)
    .bind(job.id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn get_job<'e, E>(executor: E, id: i64) -> Result<JobRow, DbError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, JobRow>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(DbError::NotFound)
}

/// All jobs of an execution in creation order.
pub async fn list_jobs<'e, E>(executor: E, execution_id: i64) -> Result<Vec<JobRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE execution_id = $1 ORDER BY id ASC"
    ))
    .bind(execution_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

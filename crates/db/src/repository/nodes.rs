//! Flow node operations.

use sqlx::PgExecutor;

use crate::{
    DbError,
    models::{FlowNodeRow, NewFlowNode},
};

const COLUMNS: &str =
    "id, workflow_id, title, node_type, config, upstream_id, downstream_id, branch_index";

pub async fn create_node<'e, E>(executor: E, node: &NewFlowNode) -> Result<FlowNodeRow, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, FlowNodeRow>(&format!(
        r#"
        INSERT INTO flow_nodes
            (workflow_id, title, node_type, config, upstream_id, downstream_id, branch_index)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(node.workflow_id)
    .bind(&node.title)
    .bind(&node.node_type)
    .bind(&node.config)
    .bind(node.upstream_id)
    .bind(node.downstream_id)
    .bind(node.branch_index)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

pub async fn set_downstream<'e, E>(
    executor: E,
    node_id: i64,
    downstream_id: Option<i64>,
) -> Result<(), DbError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("UPDATE flow_nodes SET downstream_id = $1 WHERE id = $2")
        .bind(downstream_id)
        .bind(node_id)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// All nodes of one workflow version in id order.
pub async fn list_nodes<'e, E>(executor: E, workflow_id: i64) -> Result<Vec<FlowNodeRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, FlowNodeRow>(&format!(
        "SELECT {COLUMNS} FROM flow_nodes WHERE workflow_id = $1 ORDER BY id ASC"
    ))
    .bind(workflow_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

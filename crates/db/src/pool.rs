//! Postgres pool for the flowline store, and the embedded schema.

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

pub type DbPool = PgPool;

/// Pool ceiling when `DATABASE_MAX_CONNECTIONS` is not set.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// A processor holds its connection for a whole transactional run, so a
/// waiting caller gives up instead of queueing forever.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Workflows, flow nodes, executions and jobs tables.
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    info!(max_connections, "database pool ready");
    Ok(pool)
}

/// Bring the schema up to date. Already-applied versions are skipped.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    MIGRATOR.run(pool).await?;
    info!(migrations = MIGRATOR.iter().count(), "schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_embedded_in_version_order() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert_eq!(versions.first(), Some(&1));
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }
}

//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionFinished,
}

/// An integer status code that does not name a known status.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown status code {0}")]
pub struct UnknownStatus(pub i16);

pub type DbResult<T> = Result<T, DbError>;

//! Repository functions — one function per database operation.
//!
//! Every function takes any Postgres executor (`&PgPool` or a connection
//! borrowed from an open transaction) and returns a `Result<T, DbError>`.
//! No business logic, no domain types — pure SQL.

pub mod workflows;
pub mod nodes;
pub mod executions;
pub mod jobs;

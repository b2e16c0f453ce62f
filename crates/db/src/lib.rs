//! `db` crate — pure persistence layer.
//!
//! Provides typed row structs, the [`Repository`]/[`Database`]/[`Transaction`]
//! storage contracts, a Postgres implementation built on repository
//! functions, and an in-memory transactional store. No business logic lives
//! here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::{DbError, DbResult, UnknownStatus};
pub use memory::MemoryDatabase;
pub use pool::DbPool;
pub use postgres::PgDatabase;
pub use store::{Database, Repository, Transaction};

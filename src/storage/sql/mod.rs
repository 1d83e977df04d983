//! Unified SQL storage implementations.
//!
//! This module provides shared implementations for SQL-based storage backends
//! (PostgreSQL, SQLite). The implementations are parameterized by database type
//! using the `SqlDatabase` trait.

mod dead_letter;
mod event_log;
mod lease;
mod projection_store;
mod query;

pub use dead_letter::SqlDeadLetterSink;
pub use event_log::SqlEventLog;
pub use lease::SqlLease;
pub use projection_store::SqlProjectionStore;
pub use query::SqlDatabase;

#[cfg(feature = "postgres")]
pub mod postgres {
    //! PostgreSQL database backend.

    use std::sync::Arc;

    use sea_query::PostgresQueryBuilder;
    use sqlx::PgPool;

    use crate::storage::{Result, Storage};

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        type Pool = PgPool;

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_delete(stmt: sea_query::DeleteStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn serial_primary_key() -> &'static str {
            "BIGSERIAL PRIMARY KEY"
        }
    }

    /// PostgreSQL event log.
    pub type PostgresEventLog = super::SqlEventLog<Postgres>;

    /// PostgreSQL progress and document store.
    pub type PostgresProjectionStore = super::SqlProjectionStore<Postgres>;

    /// PostgreSQL dead letter sink.
    pub type PostgresDeadLetterSink = super::SqlDeadLetterSink<Postgres>;

    /// PostgreSQL lease table.
    pub type PostgresLease = super::SqlLease<Postgres>;

    /// Create tables and wire every store to one pool.
    pub async fn init(pool: PgPool) -> Result<Storage> {
        let event_log = Arc::new(PostgresEventLog::new(pool.clone()));
        event_log.init().await?;

        let projections = Arc::new(PostgresProjectionStore::new(pool.clone()));
        projections.init().await?;

        let dead_letters = Arc::new(PostgresDeadLetterSink::new(pool.clone()));
        dead_letters.init().await?;

        let lease = Arc::new(PostgresLease::new(pool));
        lease.init().await?;

        Ok(Storage {
            event_log,
            progress: projections.clone(),
            documents: projections,
            dead_letters,
            lease,
        })
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite database backend.

    use std::sync::Arc;

    use sea_query::SqliteQueryBuilder;
    use sqlx::SqlitePool;

    use crate::storage::{Result, Storage};

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        type Pool = SqlitePool;

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_delete(stmt: sea_query::DeleteStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn serial_primary_key() -> &'static str {
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        }
    }

    /// SQLite event log.
    pub type SqliteEventLog = super::SqlEventLog<Sqlite>;

    /// SQLite progress and document store.
    pub type SqliteProjectionStore = super::SqlProjectionStore<Sqlite>;

    /// SQLite dead letter sink.
    pub type SqliteDeadLetterSink = super::SqlDeadLetterSink<Sqlite>;

    /// SQLite lease table.
    pub type SqliteLease = super::SqlLease<Sqlite>;

    /// Create tables and wire every store to one pool.
    pub async fn init(pool: SqlitePool) -> Result<Storage> {
        let event_log = Arc::new(SqliteEventLog::new(pool.clone()));
        event_log.init().await?;

        let projections = Arc::new(SqliteProjectionStore::new(pool.clone()));
        projections.init().await?;

        let dead_letters = Arc::new(SqliteDeadLetterSink::new(pool.clone()));
        dead_letters.init().await?;

        let lease = Arc::new(SqliteLease::new(pool));
        lease.init().await?;

        Ok(Storage {
            event_log,
            progress: projections.clone(),
            documents: projections,
            dead_letters,
            lease,
        })
    }
}

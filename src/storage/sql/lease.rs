//! Unified SQL DistributedLease implementation.
//!
//! One row per lease in `daemon_leases`. Acquisition is a single upsert
//! that only overwrites a row when it has expired or already belongs to
//! the caller, so two nodes can never both see `rows_affected > 0`.
//! Expiry is wall-clock epoch milliseconds.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based lease table.
pub struct SqlLease<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlLease<DB> {
    /// Create a new SQL lease table with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }
}

fn expiry(now_ms: i64, ttl: std::time::Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Macro to implement DistributedLease for a specific SQL backend.
macro_rules! impl_lease {
    ($db_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlLease<$db_type> {
            /// Create the leases table if it does not exist.
            pub async fn init(&self) -> crate::storage::Result<()> {
                sqlx::raw_sql(crate::storage::schema::CREATE_DAEMON_LEASES_TABLE)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::DistributedLease for SqlLease<$db_type> {
            async fn try_acquire(
                &self,
                name: &str,
                holder: &str,
                ttl: std::time::Duration,
            ) -> crate::storage::Result<bool> {
                use sea_query::{Expr, OnConflict, Query};

                use crate::storage::schema::DaemonLeases;

                let now = chrono::Utc::now().timestamp_millis();
                let stmt = Query::insert()
                    .into_table(DaemonLeases::Table)
                    .columns([DaemonLeases::Name, DaemonLeases::Holder, DaemonLeases::ExpiresAt])
                    .values_panic([name.into(), holder.into(), expiry(now, ttl).into()])
                    .on_conflict(
                        OnConflict::column(DaemonLeases::Name)
                            .update_columns([DaemonLeases::Holder, DaemonLeases::ExpiresAt])
                            .action_and_where(
                                Expr::col((DaemonLeases::Table, DaemonLeases::ExpiresAt))
                                    .lte(now)
                                    .or(Expr::col((DaemonLeases::Table, DaemonLeases::Holder)).eq(holder)),
                            )
                            .to_owned(),
                    )
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                let result = sqlx::query(&sql).execute(&self.pool).await?;
                Ok(result.rows_affected() > 0)
            }

            async fn renew(
                &self,
                name: &str,
                holder: &str,
                ttl: std::time::Duration,
            ) -> crate::storage::Result<bool> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::DaemonLeases;

                let now = chrono::Utc::now().timestamp_millis();
                let stmt = Query::update()
                    .table(DaemonLeases::Table)
                    .value(DaemonLeases::ExpiresAt, expiry(now, ttl))
                    .and_where(Expr::col(DaemonLeases::Name).eq(name))
                    .and_where(Expr::col(DaemonLeases::Holder).eq(holder))
                    .to_owned();

                let sql = <$db_type>::build_update(stmt);
                let result = sqlx::query(&sql).execute(&self.pool).await?;
                Ok(result.rows_affected() > 0)
            }

            async fn release(&self, name: &str, holder: &str) -> crate::storage::Result<()> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::DaemonLeases;

                let stmt = Query::delete()
                    .from_table(DaemonLeases::Table)
                    .and_where(Expr::col(DaemonLeases::Name).eq(name))
                    .and_where(Expr::col(DaemonLeases::Holder).eq(holder))
                    .to_owned();

                let sql = <$db_type>::build_delete(stmt);
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_lease!(super::postgres::Postgres, "postgres");
impl_lease!(super::sqlite::Sqlite, "sqlite");

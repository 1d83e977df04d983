//! Unified SQL ProgressStore and DocumentStore implementation.
//!
//! Progress rows and projection documents share a pool so a range's
//! document writes and cursor move commit in one transaction.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based progress and document store.
///
/// This generic implementation works with any SQL database that implements
/// the `SqlDatabase` trait (PostgreSQL, SQLite).
pub struct SqlProjectionStore<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlProjectionStore<DB> {
    /// Create a new SQL projection store with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }
}

/// Macro to implement ProgressStore and DocumentStore for a specific SQL backend.
///
/// `$conn` is the backend's connection type; helpers take it so they run
/// inside a caller's transaction.
macro_rules! impl_projection_store {
    ($db_type:ty, $feature:literal, $conn:ty) => {
        #[cfg(feature = $feature)]
        impl SqlProjectionStore<$db_type> {
            /// Create the progress and document tables if they do not exist.
            pub async fn init(&self) -> crate::storage::Result<()> {
                use crate::storage::schema::{
                    CREATE_PROJECTION_DOCUMENTS_TABLE, CREATE_PROJECTION_PROGRESS_TABLE,
                };

                sqlx::raw_sql(CREATE_PROJECTION_PROGRESS_TABLE)
                    .execute(&self.pool)
                    .await?;
                sqlx::raw_sql(CREATE_PROJECTION_DOCUMENTS_TABLE)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }

            async fn stored_progress(conn: &mut $conn, shard: &str) -> crate::storage::Result<Option<i64>> {
                use sea_query::{Expr, Query};
                use sqlx::Row;

                use crate::storage::schema::ProjectionProgress;

                let stmt = Query::select()
                    .column(ProjectionProgress::LastSeqId)
                    .from(ProjectionProgress::Table)
                    .and_where(Expr::col(ProjectionProgress::Name).eq(shard))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row = sqlx::query(&sql).fetch_optional(&mut *conn).await?;

                match row {
                    Some(row) => Ok(Some(row.try_get("last_seq_id")?)),
                    None => Ok(None),
                }
            }

            async fn insert_row(conn: &mut $conn, shard: &str, sequence: i64) -> crate::storage::Result<()> {
                use sea_query::Query;

                use crate::storage::schema::ProjectionProgress;

                let stmt = Query::insert()
                    .into_table(ProjectionProgress::Table)
                    .columns([
                        ProjectionProgress::Name,
                        ProjectionProgress::LastSeqId,
                        ProjectionProgress::UpdatedAt,
                    ])
                    .values_panic([
                        shard.into(),
                        sequence.into(),
                        chrono::Utc::now().to_rfc3339().into(),
                    ])
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&mut *conn).await?;
                Ok(())
            }

            /// Compare-and-set the cursor. A missing row counts as 0.
            async fn advance(
                conn: &mut $conn,
                shard: &str,
                expected: i64,
                sequence: i64,
            ) -> crate::storage::Result<()> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::ProjectionProgress;
                use crate::storage::StorageError;

                if sequence < expected {
                    return Err(StorageError::ProgressRegression {
                        shard: shard.to_string(),
                        from: expected,
                        to: sequence,
                    });
                }

                let stmt = Query::update()
                    .table(ProjectionProgress::Table)
                    .value(ProjectionProgress::LastSeqId, sequence)
                    .value(ProjectionProgress::UpdatedAt, chrono::Utc::now().to_rfc3339())
                    .and_where(Expr::col(ProjectionProgress::Name).eq(shard))
                    .and_where(Expr::col(ProjectionProgress::LastSeqId).eq(expected))
                    .to_owned();

                let sql = <$db_type>::build_update(stmt);
                let result = sqlx::query(&sql).execute(&mut *conn).await?;
                if result.rows_affected() > 0 {
                    return Ok(());
                }

                match Self::stored_progress(conn, shard).await? {
                    None if expected == 0 => Self::insert_row(conn, shard, sequence).await,
                    None => Err(StorageError::ProgressionOutOfOrder {
                        shard: shard.to_string(),
                        expected,
                        actual: 0,
                    }),
                    Some(actual) => Err(StorageError::ProgressionOutOfOrder {
                        shard: shard.to_string(),
                        expected,
                        actual,
                    }),
                }
            }

            async fn apply_operation(
                conn: &mut $conn,
                operation: &crate::storage::DocumentOp,
            ) -> crate::storage::Result<()> {
                use sea_query::{Expr, OnConflict, Query};

                use crate::storage::schema::ProjectionDocuments;
                use crate::storage::DocumentOp;

                let sql = match operation {
                    DocumentOp::Upsert { collection, id, body } => {
                        let stmt = Query::insert()
                            .into_table(ProjectionDocuments::Table)
                            .columns([
                                ProjectionDocuments::Collection,
                                ProjectionDocuments::Id,
                                ProjectionDocuments::Body,
                                ProjectionDocuments::UpdatedAt,
                            ])
                            .values_panic([
                                collection.as_str().into(),
                                id.as_str().into(),
                                serde_json::to_string(body)?.into(),
                                chrono::Utc::now().to_rfc3339().into(),
                            ])
                            .on_conflict(
                                OnConflict::columns([
                                    ProjectionDocuments::Collection,
                                    ProjectionDocuments::Id,
                                ])
                                .update_columns([
                                    ProjectionDocuments::Body,
                                    ProjectionDocuments::UpdatedAt,
                                ])
                                .to_owned(),
                            )
                            .to_owned();
                        <$db_type>::build_insert(stmt)
                    }
                    DocumentOp::Delete { collection, id } => {
                        let stmt = Query::delete()
                            .from_table(ProjectionDocuments::Table)
                            .and_where(Expr::col(ProjectionDocuments::Collection).eq(collection.as_str()))
                            .and_where(Expr::col(ProjectionDocuments::Id).eq(id.as_str()))
                            .to_owned();
                        <$db_type>::build_delete(stmt)
                    }
                };

                sqlx::query(&sql).execute(&mut *conn).await?;
                Ok(())
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::ProgressStore for SqlProjectionStore<$db_type> {
            async fn insert_progress(&self, shard: &str, sequence: i64) -> crate::storage::Result<()> {
                let mut tx = self.pool.begin().await?;
                if Self::stored_progress(&mut *tx, shard).await?.is_some() {
                    return Err(crate::storage::StorageError::ProgressExists {
                        shard: shard.to_string(),
                    });
                }
                Self::insert_row(&mut *tx, shard, sequence).await?;
                tx.commit().await?;
                Ok(())
            }

            async fn update_progress(
                &self,
                shard: &str,
                expected_previous: i64,
                sequence: i64,
            ) -> crate::storage::Result<()> {
                let mut tx = self.pool.begin().await?;
                Self::advance(&mut *tx, shard, expected_previous, sequence).await?;
                tx.commit().await?;
                Ok(())
            }

            async fn fetch_progress(&self, shard: &str) -> crate::storage::Result<i64> {
                let mut conn = self.pool.acquire().await?;
                Ok(Self::stored_progress(&mut *conn, shard).await?.unwrap_or(0))
            }

            async fn fetch_all_progress(
                &self,
            ) -> crate::storage::Result<Vec<crate::storage::ProjectionProgress>> {
                use sea_query::{Order, Query};
                use sqlx::Row;

                use crate::storage::schema::ProjectionProgress;

                let stmt = Query::select()
                    .columns([ProjectionProgress::Name, ProjectionProgress::LastSeqId])
                    .from(ProjectionProgress::Table)
                    .order_by(ProjectionProgress::Name, Order::Asc)
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

                let mut progress = Vec::with_capacity(rows.len());
                for row in rows {
                    progress.push(crate::storage::ProjectionProgress {
                        shard: row.try_get("name")?,
                        sequence: row.try_get("last_seq_id")?,
                    });
                }
                Ok(progress)
            }

            async fn reset_progress(&self, shard: &str) -> crate::storage::Result<()> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::ProjectionProgress;

                let stmt = Query::delete()
                    .from_table(ProjectionProgress::Table)
                    .and_where(Expr::col(ProjectionProgress::Name).eq(shard))
                    .to_owned();

                let sql = <$db_type>::build_delete(stmt);
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }

            async fn commit(&self, commit: crate::storage::ProgressCommit) -> crate::storage::Result<()> {
                let mut tx = self.pool.begin().await?;
                Self::advance(&mut *tx, &commit.shard, commit.previous, commit.ceiling).await?;
                for operation in &commit.operations {
                    Self::apply_operation(&mut *tx, operation).await?;
                }
                tx.commit().await?;
                Ok(())
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::DocumentStore for SqlProjectionStore<$db_type> {
            async fn load(
                &self,
                collection: &str,
                id: &str,
            ) -> crate::storage::Result<Option<serde_json::Value>> {
                use sea_query::{Expr, Query};
                use sqlx::Row;

                use crate::storage::schema::ProjectionDocuments;

                let stmt = Query::select()
                    .column(ProjectionDocuments::Body)
                    .from(ProjectionDocuments::Table)
                    .and_where(Expr::col(ProjectionDocuments::Collection).eq(collection))
                    .and_where(Expr::col(ProjectionDocuments::Id).eq(id))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

                match row {
                    Some(row) => {
                        let body: String = row.try_get("body")?;
                        Ok(Some(serde_json::from_str(&body)?))
                    }
                    None => Ok(None),
                }
            }

            async fn delete_collection(&self, collection: &str) -> crate::storage::Result<u64> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::ProjectionDocuments;

                let stmt = Query::delete()
                    .from_table(ProjectionDocuments::Table)
                    .and_where(Expr::col(ProjectionDocuments::Collection).eq(collection))
                    .to_owned();

                let sql = <$db_type>::build_delete(stmt);
                let result = sqlx::query(&sql).execute(&self.pool).await?;
                Ok(result.rows_affected())
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_projection_store!(super::postgres::Postgres, "postgres", sqlx::PgConnection);
impl_projection_store!(super::sqlite::Sqlite, "sqlite", sqlx::SqliteConnection);

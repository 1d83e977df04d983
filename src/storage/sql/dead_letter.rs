//! Unified SQL DeadLetterSink implementation.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based dead letter sink over the `dead_letters` table.
pub struct SqlDeadLetterSink<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlDeadLetterSink<DB> {
    /// Create a new SQL dead letter sink with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }
}

/// Macro to implement DeadLetterSink for a specific SQL backend.
macro_rules! impl_dead_letter_sink {
    ($db_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlDeadLetterSink<$db_type> {
            /// Create the dead letters table if it does not exist.
            pub async fn init(&self) -> crate::storage::Result<()> {
                let ddl = crate::storage::schema::create_dead_letters_table(
                    <$db_type>::serial_primary_key(),
                );
                sqlx::raw_sql(&ddl).execute(&self.pool).await?;
                Ok(())
            }

            async fn insert(&self, dead_letter: &crate::dlq::DeadLetterEvent) -> crate::storage::Result<()> {
                use sea_query::Query;

                use crate::storage::schema::DeadLetters;

                let stmt = Query::insert()
                    .into_table(DeadLetters::Table)
                    .columns([
                        DeadLetters::Shard,
                        DeadLetters::ProjectionName,
                        DeadLetters::EventSequence,
                        DeadLetters::EventType,
                        DeadLetters::StreamId,
                        DeadLetters::Reason,
                        DeadLetters::Message,
                        DeadLetters::RecordedAt,
                    ])
                    .values_panic([
                        dead_letter.shard.as_str().into(),
                        dead_letter.projection_name.as_str().into(),
                        dead_letter.event_sequence.into(),
                        dead_letter.event_type.as_str().into(),
                        dead_letter.stream_id.as_str().into(),
                        dead_letter.reason.as_str().into(),
                        dead_letter.message.as_str().into(),
                        dead_letter.recorded_at.to_rfc3339().into(),
                    ])
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }

            async fn select(&self, shard: &str) -> crate::storage::Result<Vec<crate::dlq::DeadLetterEvent>> {
                use sea_query::{Expr, Order, Query};
                use sqlx::Row;

                use crate::dlq::{DeadLetterEvent, DeadLetterReason};
                use crate::storage::schema::DeadLetters;
                use crate::storage::StorageError;

                let stmt = Query::select()
                    .columns([
                        DeadLetters::Shard,
                        DeadLetters::ProjectionName,
                        DeadLetters::EventSequence,
                        DeadLetters::EventType,
                        DeadLetters::StreamId,
                        DeadLetters::Reason,
                        DeadLetters::Message,
                        DeadLetters::RecordedAt,
                    ])
                    .from(DeadLetters::Table)
                    .and_where(Expr::col(DeadLetters::Shard).eq(shard))
                    .order_by(DeadLetters::Id, Order::Asc)
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

                let mut dead_letters = Vec::with_capacity(rows.len());
                for row in rows {
                    let reason: String = row.try_get("reason")?;
                    let reason = DeadLetterReason::parse(&reason).ok_or_else(|| {
                        StorageError::InvalidData(format!("unknown dead letter reason: {}", reason))
                    })?;
                    let recorded_at: String = row.try_get("recorded_at")?;
                    let recorded_at = chrono::DateTime::parse_from_rfc3339(&recorded_at)
                        .map(|t| t.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now());

                    dead_letters.push(DeadLetterEvent {
                        shard: row.try_get("shard")?,
                        projection_name: row.try_get("projection_name")?,
                        event_sequence: row.try_get("event_sequence")?,
                        event_type: row.try_get("event_type")?,
                        stream_id: row.try_get("stream_id")?,
                        reason,
                        message: row.try_get("message")?,
                        recorded_at,
                    });
                }
                Ok(dead_letters)
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::dlq::DeadLetterSink for SqlDeadLetterSink<$db_type> {
            async fn record(&self, dead_letter: crate::dlq::DeadLetterEvent) -> Result<(), crate::dlq::DlqError> {
                tracing::warn!(
                    shard = %dead_letter.shard,
                    sequence = dead_letter.event_sequence,
                    reason = %dead_letter.reason,
                    "Recording dead letter"
                );
                Ok(self.insert(&dead_letter).await?)
            }

            async fn list(&self, shard: &str) -> Result<Vec<crate::dlq::DeadLetterEvent>, crate::dlq::DlqError> {
                Ok(self.select(shard).await?)
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_dead_letter_sink!(super::postgres::Postgres, "postgres");
impl_dead_letter_sink!(super::sqlite::Sqlite, "sqlite");

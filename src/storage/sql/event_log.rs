//! Unified SQL EventLogGateway implementation.
//!
//! Uses a macro to generate implementations for each SQL backend,
//! eliminating code duplication while maintaining type safety.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based implementation of EventLogGateway over the `events` table.
pub struct SqlEventLog<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlEventLog<DB> {
    /// Create a new SQL event log with the given pool.
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

/// Contiguous-ceiling probe as one statement.
///
/// `start` is always a candidate, so the MIN is never NULL. Each candidate
/// is paired with its successor; the first candidate without a direct
/// successor is the safe ceiling. Both columns come from the same
/// statement snapshot.
fn gap_query(start: i64) -> String {
    format!(
        "SELECT \
            (SELECT MIN(seq_id) FROM ( \
                SELECT seq_id, LEAD(seq_id) OVER (ORDER BY seq_id) AS next_id FROM ( \
                    SELECT CAST({start} AS BIGINT) AS seq_id \
                    UNION ALL \
                    SELECT seq_id FROM events WHERE seq_id > {start} \
                ) AS candidates \
            ) AS ids WHERE next_id IS NULL OR next_id - seq_id > 1) AS safe_ceiling, \
            (SELECT COALESCE(MAX(seq_id), 0) FROM events) AS highest_sequence"
    )
}

/// Macro to implement EventLogGateway for a specific SQL backend.
macro_rules! impl_event_log {
    ($db_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlEventLog<$db_type> {
            /// Create the events table if it does not exist.
            pub async fn init(&self) -> crate::storage::Result<()> {
                sqlx::raw_sql(crate::storage::schema::CREATE_EVENTS_TABLE)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }

            /// Insert an event at its assigned sequence.
            ///
            /// Appending is owned by the event store; this exists for
            /// seeding and tests.
            pub async fn append(&self, event: &crate::storage::RawEvent) -> crate::storage::Result<()> {
                use sea_query::Query;

                use crate::storage::schema::Events;

                let stmt = Query::insert()
                    .into_table(Events::Table)
                    .columns([
                        Events::SeqId,
                        Events::StreamId,
                        Events::Version,
                        Events::EventType,
                        Events::StreamType,
                        Events::TenantId,
                        Events::CreatedAt,
                        Events::Data,
                    ])
                    .values_panic([
                        event.sequence.into(),
                        event.stream_id.clone().into(),
                        event.version.into(),
                        event.event_type.clone().into(),
                        event.stream_type.clone().into(),
                        event.tenant_id.clone().into(),
                        event.timestamp.clone().into(),
                        event.data.clone().into(),
                    ])
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::EventLogGateway for SqlEventLog<$db_type> {
            async fn read_range(
                &self,
                floor: i64,
                ceiling: i64,
                filter: &crate::storage::EventFilter,
            ) -> crate::storage::Result<Vec<crate::storage::RawEvent>> {
                use sea_query::{Expr, Order, Query};
                use sqlx::Row;

                use crate::storage::schema::Events;

                // The statement is not `Send`; drop it before awaiting.
                let sql = {
                    let mut stmt = Query::select();
                    stmt.columns([
                        Events::SeqId,
                        Events::StreamId,
                        Events::Version,
                        Events::EventType,
                        Events::StreamType,
                        Events::TenantId,
                        Events::CreatedAt,
                        Events::Data,
                    ])
                    .from(Events::Table)
                    .and_where(Expr::col(Events::SeqId).gt(floor))
                    .and_where(Expr::col(Events::SeqId).lte(ceiling))
                    .order_by(Events::SeqId, Order::Asc);

                    if !filter.event_types.is_empty() {
                        stmt.and_where(Expr::col(Events::EventType).is_in(filter.event_types.iter().cloned()));
                    }
                    if !filter.stream_types.is_empty() {
                        stmt.and_where(Expr::col(Events::StreamType).is_in(filter.stream_types.iter().cloned()));
                    }
                    if let Some(tenant) = &filter.tenant_id {
                        stmt.and_where(Expr::col(Events::TenantId).eq(tenant.as_str()));
                    }

                    <$db_type>::build_select(stmt)
                };
                let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

                let mut events = Vec::with_capacity(rows.len());
                for row in rows {
                    events.push(crate::storage::RawEvent {
                        sequence: row.try_get("seq_id")?,
                        stream_id: row.try_get("stream_id")?,
                        version: row.try_get("version")?,
                        event_type: row.try_get("event_type")?,
                        stream_type: row.try_get("stream_type")?,
                        tenant_id: row.try_get("tenant_id")?,
                        timestamp: row.try_get("created_at")?,
                        data: row.try_get("data")?,
                    });
                }

                Ok(events)
            }

            async fn detect_gap(&self, start: i64) -> crate::storage::Result<crate::storage::GapProbe> {
                use sqlx::Row;

                let sql = gap_query(start);
                let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
                let safe_ceiling: Option<i64> = row.try_get("safe_ceiling")?;
                let highest_sequence: i64 = row.try_get("highest_sequence")?;

                Ok(crate::storage::GapProbe {
                    safe_ceiling: safe_ceiling.unwrap_or(start),
                    highest_sequence,
                })
            }

            async fn highest_sequence(&self) -> crate::storage::Result<i64> {
                use sea_query::{Expr, Query};
                use sqlx::Row;

                use crate::storage::schema::Events;

                let stmt = Query::select()
                    .expr(Expr::col(Events::SeqId).max())
                    .from(Events::Table)
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
                let highest: Option<i64> = row.try_get(0)?;
                Ok(highest.unwrap_or(0))
            }

            async fn first_sequence_after(&self, sequence: i64) -> crate::storage::Result<Option<i64>> {
                use sea_query::{Expr, Query};
                use sqlx::Row;

                use crate::storage::schema::Events;

                let stmt = Query::select()
                    .expr(Expr::col(Events::SeqId).min())
                    .from(Events::Table)
                    .and_where(Expr::col(Events::SeqId).gt(sequence))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
                let next: Option<i64> = row.try_get(0)?;
                Ok(next)
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_event_log!(super::postgres::Postgres, "postgres");
impl_event_log!(super::sqlite::Sqlite, "sqlite");

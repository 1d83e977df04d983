//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{DeadLetterTarget, StorageConfig, StorageType};
use crate::dlq::{noop_sink, DeadLetterSink};

pub mod mock;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

pub use crate::interfaces::{
    DistributedLease, DocumentOp, DocumentStore, EventFilter, EventLogGateway, GapProbe,
    ProgressCommit, ProgressStore, ProjectionProgress, RawEvent, Result, StorageError,
};

/// Handles to every store the daemon talks to.
///
/// The daemon never owns concrete backends; it is handed this bundle at
/// construction time.
#[derive(Clone)]
pub struct Storage {
    pub event_log: Arc<dyn EventLogGateway>,
    pub progress: Arc<dyn ProgressStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub lease: Arc<dyn DistributedLease>,
}

impl Storage {
    /// Fresh in-memory storage.
    ///
    /// Returns the bundle plus the concrete mocks so tests can append
    /// events and inject faults.
    pub fn in_memory() -> (Self, mock::MockHandles) {
        let handles = mock::MockHandles::default();
        let storage = Self {
            event_log: handles.event_log.clone(),
            progress: handles.projections.clone(),
            documents: handles.projections.clone(),
            dead_letters: handles.dead_letters.clone(),
            lease: handles.lease.clone(),
        };
        (storage, handles)
    }
}

/// Initialize storage based on configuration.
///
/// SQL backends create their tables if they do not exist.
pub async fn init_storage(config: &StorageConfig) -> std::result::Result<Storage, Box<dyn std::error::Error>> {
    let mut storage = connect(config).await?;
    if config.dead_letters == DeadLetterTarget::Log {
        info!("Dead letters: logged and dropped");
        storage.dead_letters = noop_sink();
    }
    Ok(storage)
}

async fn connect(config: &StorageConfig) -> std::result::Result<Storage, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Storage::in_memory().0)
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);
            if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.sqlite.path))
                    .await?;
            Ok(sql::sqlite::init(pool).await?)
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            info!("Storage: postgres");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.postgres.max_connections)
                .connect(&config.postgres.uri)
                .await?;
            Ok(sql::postgres::init(pool).await?)
        }
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => {
            tracing::error!("PostgreSQL storage requested but 'postgres' feature is not enabled");
            Err("PostgreSQL feature not enabled".into())
        }
    }
}

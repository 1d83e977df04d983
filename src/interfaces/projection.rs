//! Projection callback interface.
//!
//! Projections turn events into document writes. Three adapter shapes are
//! supported, each a small capability trait:
//!
//! - [`EventProjection`]: synchronous, one event at a time
//! - [`AsyncEventProjection`]: one event at a time, may read documents
//! - [`BatchProjection`]: the whole loaded range in one call
//!
//! [`ProjectionHandler`] is the closed set the daemon dispatches on.
//!
//! # Example
//!
//! ```ignore
//! struct OrderCount;
//!
//! #[async_trait]
//! impl AsyncEventProjection for OrderCount {
//!     async fn apply(&self, event: &Event, session: &mut ProjectionSession<'_>)
//!         -> Result<(), ProjectionError>
//!     {
//!         let count = session.load("order_counts", &event.stream_id).await?
//!             .and_then(|v| v.as_i64())
//!             .unwrap_or(0);
//!         session.store_value("order_counts", &event.stream_id, json!(count + 1));
//!         Ok(())
//!     }
//! }
//!
//! let definition = ProjectionDefinition::new("order_count", ProjectionHandler::asynchronous(OrderCount))
//!     .with_event_types(["OrderPlaced"])
//!     .with_collection("order_counts");
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::document_store::{DocumentOp, DocumentStore};
use super::event_log::{EventFilter, StorageError};
use crate::config::AsyncOptions;
use crate::daemon::shard::{ShardName, ALL_GROUP};

/// Errors raised by projection callbacks.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The event payload could never be handled. Always dead-lettered.
    #[error("Cannot deserialize event {sequence}: {reason}")]
    Deserialization { sequence: i64, reason: String },

    /// Business logic rejected the event. Handled per the apply policy.
    #[error("Projection failed at sequence {sequence}: {message}")]
    Apply { sequence: i64, message: String },

    #[error("Document store error: {0}")]
    Storage(#[from] StorageError),
}

impl ProjectionError {
    pub fn apply(event: &Event, message: impl fmt::Display) -> Self {
        ProjectionError::Apply {
            sequence: event.sequence,
            message: message.to_string(),
        }
    }

    pub fn deserialization(event: &Event, reason: impl fmt::Display) -> Self {
        ProjectionError::Deserialization {
            sequence: event.sequence,
            reason: reason.to_string(),
        }
    }
}

/// A decoded log entry handed to projections.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub sequence: i64,
    pub stream_id: String,
    pub version: i64,
    pub event_type: String,
    /// Set when the stream declares an aggregate type.
    pub aggregate_type_name: Option<String>,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Event {
    /// Decode the payload into a typed event.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ProjectionError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ProjectionError::deserialization(self, e))
    }
}

/// Unit-of-work a projection writes into during one range.
///
/// Writes are buffered and only reach storage with the progress commit.
/// Reads see buffered writes first, then committed documents.
pub struct ProjectionSession<'a> {
    documents: &'a dyn DocumentStore,
    pending: Vec<DocumentOp>,
}

impl<'a> ProjectionSession<'a> {
    pub fn new(documents: &'a dyn DocumentStore) -> Self {
        Self {
            documents,
            pending: Vec::new(),
        }
    }

    /// Buffer an upsert of a serializable document.
    pub fn store<T: Serialize>(
        &mut self,
        collection: &str,
        id: &str,
        document: &T,
    ) -> Result<(), ProjectionError> {
        let body = serde_json::to_value(document).map_err(StorageError::from)?;
        self.store_value(collection, id, body);
        Ok(())
    }

    /// Buffer an upsert of a raw JSON document.
    pub fn store_value(&mut self, collection: &str, id: &str, body: Value) {
        self.pending.push(DocumentOp::Upsert {
            collection: collection.to_string(),
            id: id.to_string(),
            body,
        });
    }

    /// Buffer a delete.
    pub fn delete(&mut self, collection: &str, id: &str) {
        self.pending.push(DocumentOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    /// Load a document, preferring this session's buffered writes.
    pub async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, ProjectionError> {
        let buffered = self
            .pending
            .iter()
            .rev()
            .find(|op| op.collection() == collection && op.id() == id);
        match buffered {
            Some(DocumentOp::Upsert { body, .. }) => Ok(Some(body.clone())),
            Some(DocumentOp::Delete { .. }) => Ok(None),
            None => Ok(self.documents.load(collection, id).await?),
        }
    }

    /// Load and decode a document.
    pub async fn load_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, ProjectionError> {
        match self.load(collection, id).await? {
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    /// Buffered writes so far.
    pub fn pending(&self) -> &[DocumentOp] {
        &self.pending
    }

    pub(crate) fn mark(&self) -> usize {
        self.pending.len()
    }

    /// Discard writes buffered after `mark`.
    pub(crate) fn rollback_to(&mut self, mark: usize) {
        self.pending.truncate(mark);
    }

    pub(crate) fn into_operations(self) -> Vec<DocumentOp> {
        self.pending
    }
}

/// Synchronous single-event projection.
pub trait EventProjection: Send + Sync {
    fn apply(&self, event: &Event, session: &mut ProjectionSession<'_>)
        -> Result<(), ProjectionError>;
}

/// Single-event projection that may await document reads.
#[async_trait]
pub trait AsyncEventProjection: Send + Sync {
    async fn apply(
        &self,
        event: &Event,
        session: &mut ProjectionSession<'_>,
    ) -> Result<(), ProjectionError>;
}

/// Projection that consumes a whole range at once.
///
/// Any error aborts the range; per-event skip policies do not apply.
#[async_trait]
pub trait BatchProjection: Send + Sync {
    async fn apply_batch(
        &self,
        events: &[Event],
        session: &mut ProjectionSession<'_>,
    ) -> Result<(), ProjectionError>;
}

/// The closed set of projection adapters.
#[derive(Clone)]
pub enum ProjectionHandler {
    Single(Arc<dyn EventProjection>),
    Async(Arc<dyn AsyncEventProjection>),
    Batched(Arc<dyn BatchProjection>),
}

impl ProjectionHandler {
    pub fn single(projection: impl EventProjection + 'static) -> Self {
        ProjectionHandler::Single(Arc::new(projection))
    }

    pub fn asynchronous(projection: impl AsyncEventProjection + 'static) -> Self {
        ProjectionHandler::Async(Arc::new(projection))
    }

    pub fn batched(projection: impl BatchProjection + 'static) -> Self {
        ProjectionHandler::Batched(Arc::new(projection))
    }
}

impl fmt::Debug for ProjectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ProjectionHandler::Single(_) => "Single",
            ProjectionHandler::Async(_) => "Async",
            ProjectionHandler::Batched(_) => "Batched",
        };
        f.debug_tuple("ProjectionHandler").field(&kind).finish()
    }
}

/// Registration of one projection with the daemon.
///
/// A projection runs as one shard per group. The `All` group sees every
/// tenant; any other group name restricts the shard to that tenant.
#[derive(Debug, Clone)]
pub struct ProjectionDefinition {
    name: String,
    version: u32,
    groups: Vec<String>,
    event_types: Vec<String>,
    stream_types: Vec<String>,
    collections: Vec<String>,
    handler: ProjectionHandler,
    options: Option<AsyncOptions>,
}

impl ProjectionDefinition {
    pub fn new(name: impl Into<String>, handler: ProjectionHandler) -> Self {
        Self {
            name: name.into(),
            version: 1,
            groups: vec![ALL_GROUP.to_string()],
            event_types: Vec::new(),
            stream_types: Vec::new(),
            collections: Vec::new(),
            handler,
            options: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version.max(1);
        self
    }

    /// Replace the default `All` group with per-tenant groups.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        if self.groups.is_empty() {
            self.groups.push(ALL_GROUP.to_string());
        }
        self
    }

    pub fn with_event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = event_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream_types<I, S>(mut self, stream_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_types = stream_types.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a document collection this projection owns.
    ///
    /// Owned collections are deleted when the projection is rebuilt.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        if !self.collections.contains(&collection) {
            self.collections.push(collection);
        }
        self
    }

    /// Override the daemon-wide batch and hopper sizes for this projection.
    pub fn with_options(mut self, options: AsyncOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn handler(&self) -> &ProjectionHandler {
        &self.handler
    }

    pub fn options(&self) -> Option<&AsyncOptions> {
        self.options.as_ref()
    }

    /// One shard per group.
    pub fn shard_names(&self) -> Vec<ShardName> {
        self.groups
            .iter()
            .map(|group| ShardName::new(&self.name, group, self.version))
            .collect()
    }

    /// Read filter for one of this projection's shards.
    pub fn filter_for(&self, shard: &ShardName) -> EventFilter {
        EventFilter {
            event_types: self.event_types.clone(),
            stream_types: self.stream_types.clone(),
            tenant_id: shard.tenant().map(str::to_string),
        }
    }
}

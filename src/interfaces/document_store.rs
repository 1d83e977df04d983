//! Document persistence interface.

use async_trait::async_trait;
use serde_json::Value;

use super::event_log::Result;

/// A write produced by a projection.
///
/// Operations are buffered during a range and applied by
/// `ProgressStore::commit` in the same transaction as the cursor move.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOp {
    Upsert {
        collection: String,
        id: String,
        body: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl DocumentOp {
    pub fn collection(&self) -> &str {
        match self {
            DocumentOp::Upsert { collection, .. } | DocumentOp::Delete { collection, .. } => {
                collection
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            DocumentOp::Upsert { id, .. } | DocumentOp::Delete { id, .. } => id,
        }
    }
}

/// Read side of projection documents, plus collection teardown.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a committed document.
    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Delete every document in a collection. Returns the number removed.
    async fn delete_collection(&self, collection: &str) -> Result<u64>;
}

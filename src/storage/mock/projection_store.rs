//! Mock ProgressStore and DocumentStore implementation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::storage::{
    DocumentOp, DocumentStore, ProgressCommit, ProgressStore, ProjectionProgress, Result,
    StorageError,
};

type DocumentKey = (String, String);

/// Mock store holding cursors and documents in memory.
///
/// `commit` holds both locks for its whole duration, so its cursor check
/// and document writes are atomic with respect to other callers.
#[derive(Default)]
pub struct MockProjectionStore {
    progress: RwLock<BTreeMap<String, i64>>,
    documents: RwLock<HashMap<DocumentKey, Value>>,
    fail_on_commit: RwLock<bool>,
    fail_next_commits: RwLock<usize>,
    fail_on_load: RwLock<bool>,
    delete_delay: RwLock<Option<Duration>>,
    commits: RwLock<Vec<ProgressCommit>>,
}

impl MockProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail_on_commit.write().await = fail;
    }

    /// Fail the next `count` commits, then recover.
    pub async fn fail_next_commits(&self, count: usize) {
        *self.fail_next_commits.write().await = count;
    }

    pub async fn set_fail_on_load(&self, fail: bool) {
        *self.fail_on_load.write().await = fail;
    }

    /// Make `delete_collection` take `delay` before touching any document.
    pub async fn set_delete_delay(&self, delay: Option<Duration>) {
        *self.delete_delay.write().await = delay;
    }

    /// Committed document, bypassing fault injection.
    pub async fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.documents
            .read()
            .await
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of documents in a collection.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }

    /// Every successful commit, in order.
    pub async fn commits(&self) -> Vec<ProgressCommit> {
        self.commits.read().await.clone()
    }

    async fn check_commit_faults(&self) -> Result<()> {
        if *self.fail_on_commit.read().await {
            return Err(StorageError::Unavailable("commit failed".to_string()));
        }
        let mut remaining = self.fail_next_commits.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StorageError::Unavailable("commit failed".to_string()));
        }
        Ok(())
    }
}

fn advance(
    progress: &mut BTreeMap<String, i64>,
    shard: &str,
    expected: i64,
    sequence: i64,
) -> Result<()> {
    if sequence < expected {
        return Err(StorageError::ProgressRegression {
            shard: shard.to_string(),
            from: expected,
            to: sequence,
        });
    }
    let actual = progress.get(shard).copied().unwrap_or(0);
    if actual != expected {
        return Err(StorageError::ProgressionOutOfOrder {
            shard: shard.to_string(),
            expected,
            actual,
        });
    }
    progress.insert(shard.to_string(), sequence);
    Ok(())
}

#[async_trait]
impl ProgressStore for MockProjectionStore {
    async fn insert_progress(&self, shard: &str, sequence: i64) -> Result<()> {
        let mut progress = self.progress.write().await;
        if progress.contains_key(shard) {
            return Err(StorageError::ProgressExists {
                shard: shard.to_string(),
            });
        }
        progress.insert(shard.to_string(), sequence);
        Ok(())
    }

    async fn update_progress(&self, shard: &str, expected_previous: i64, sequence: i64) -> Result<()> {
        let mut progress = self.progress.write().await;
        advance(&mut progress, shard, expected_previous, sequence)
    }

    async fn fetch_progress(&self, shard: &str) -> Result<i64> {
        Ok(self.progress.read().await.get(shard).copied().unwrap_or(0))
    }

    async fn fetch_all_progress(&self) -> Result<Vec<ProjectionProgress>> {
        Ok(self
            .progress
            .read()
            .await
            .iter()
            .map(|(shard, sequence)| ProjectionProgress {
                shard: shard.clone(),
                sequence: *sequence,
            })
            .collect())
    }

    async fn reset_progress(&self, shard: &str) -> Result<()> {
        self.progress.write().await.remove(shard);
        Ok(())
    }

    async fn commit(&self, commit: ProgressCommit) -> Result<()> {
        self.check_commit_faults().await?;

        let mut progress = self.progress.write().await;
        let mut documents = self.documents.write().await;

        advance(&mut progress, &commit.shard, commit.previous, commit.ceiling)?;
        for operation in &commit.operations {
            match operation {
                DocumentOp::Upsert { collection, id, body } => {
                    documents.insert((collection.clone(), id.clone()), body.clone());
                }
                DocumentOp::Delete { collection, id } => {
                    documents.remove(&(collection.clone(), id.clone()));
                }
            }
        }

        self.commits.write().await.push(commit);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MockProjectionStore {
    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        if *self.fail_on_load.read().await {
            return Err(StorageError::Unavailable("document load failed".to_string()));
        }
        Ok(self.document(collection, id).await)
    }

    async fn delete_collection(&self, collection: &str) -> Result<u64> {
        let delay = *self.delete_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|(c, _), _| c != collection);
        Ok((before - documents.len()) as u64)
    }
}

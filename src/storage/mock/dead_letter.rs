//! Mock DeadLetterSink implementation.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dlq::{DeadLetterEvent, DeadLetterSink, DlqError};

/// Mock sink that keeps dead letters in memory.
#[derive(Default)]
pub struct MockDeadLetterSink {
    records: RwLock<Vec<DeadLetterEvent>>,
    fail_on_record: RwLock<bool>,
}

impl MockDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_record(&self, fail: bool) {
        *self.fail_on_record.write().await = fail;
    }

    /// Every recorded dead letter, oldest first.
    pub async fn all(&self) -> Vec<DeadLetterEvent> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MockDeadLetterSink {
    async fn record(&self, dead_letter: DeadLetterEvent) -> Result<(), DlqError> {
        if *self.fail_on_record.read().await {
            return Err(DlqError::PublishFailed("dead letter sink unavailable".to_string()));
        }
        self.records.write().await.push(dead_letter);
        Ok(())
    }

    async fn list(&self, shard: &str) -> Result<Vec<DeadLetterEvent>, DlqError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|dl| dl.shard == shard)
            .cloned()
            .collect())
    }
}

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::FeedbackRecord;

/// Durable history of submitted surveys. Implementations keep records in
/// insertion order and never modify a stored record.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<FeedbackRecord>, StoreError>;

    async fn append_one(&self, record: &FeedbackRecord) -> Result<(), StoreError>;

    async fn clear_all(&self) -> Result<(), StoreError>;
}

/// Process-local store backing `survey --dry-run`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<FeedbackRecord>>,
    failing: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_records(records: Vec<FeedbackRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failing: Mutex::new(false),
        }
    }

    /// Makes every later call fail until switched back.
    #[cfg(test)]
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    async fn check(&self) -> Result<(), StoreError> {
        if *self.failing.lock().await {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<FeedbackRecord>, StoreError> {
        self.check().await?;
        Ok(self.records.lock().await.clone())
    }

    async fn append_one(&self, record: &FeedbackRecord) -> Result<(), StoreError> {
        self.check().await?;
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.check().await?;
        self.records.lock().await.clear();
        Ok(())
    }
}

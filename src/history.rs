use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::HistoryError;
use crate::verify::VerificationStatus;

/// One entry in the verification history log, scoped to the user who ran
/// the verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub verification_id: String,
    pub user_id: String,
    pub recorded_at: DateTime<Utc>,
    pub object_class: String,
    pub agent_id: String,
    pub status: VerificationStatus,
    pub title: String,
    pub summary: String,
    pub confidence: Option<f32>,
}

/// Boundary to the external history store. Appends are best-effort:
/// callers log failures and move on.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError>;
}

/// In-process history sink backing tests and the demo binary.
pub struct MemoryHistory {
    records: RwLock<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        self.records.write().await.push(record);
        Ok(())
    }
}

//! Record store
//!
//! Persistence for queue records, per-day sequence counters and the single
//! connection status document. [`PgRecordStore`] backs production;
//! [`MemoryRecordStore`] keeps everything in process for tests and local runs.

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use antrian_shared::{AntrianError, DayWindow, NewQueueRecord, QueueRecord, QueueStatus, StatusDocument};

/// Record store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Sequence number {sequence_number} already issued for {day}")]
    DuplicateSequence { sequence_number: i32, day: Date },

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    #[error("Store operation timed out")]
    Timeout,
}

impl From<AntrianError> for StoreError {
    fn from(err: AntrianError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write a numbered record with status `Waiting`
    async fn append(&self, record: NewQueueRecord) -> StoreResult<QueueRecord>;

    /// Records submitted in `[start, end)`, ordered by sequence number
    async fn records_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Vec<QueueRecord>>;

    /// Records with `status`, oldest first
    async fn records_with_status(&self, status: QueueStatus) -> StoreResult<Vec<QueueRecord>>;

    /// Atomically take the next sequence number for a day.
    ///
    /// The first call for a day seeds its counter from the highest number
    /// already stored inside the window.
    async fn next_daily_sequence(&self, window: &DayWindow) -> StoreResult<i32>;

    async fn load_status(&self) -> StoreResult<Option<StatusDocument>>;

    /// Replace the status document
    async fn save_status(&self, document: &StatusDocument) -> StoreResult<()>;

    /// Cheap reachability check for readiness checks
    async fn ping(&self) -> StoreResult<()>;
}

//! In-process record store

use std::collections::HashMap;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;

use antrian_shared::{
    DayWindow, NewQueueRecord, QueueRecord, QueueStatus, RecordId, StatusDocument,
};

use super::{RecordStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    records: Vec<(Date, QueueRecord)>,
    counters: HashMap<Date, i32>,
    status: Option<StatusDocument>,
}

/// Record store held entirely in memory
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an existing record as if staff had entered it
    pub async fn seed(&self, queue_day: Date, record: QueueRecord) {
        self.inner.lock().await.records.push((queue_day, record));
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn append(&self, record: NewQueueRecord) -> StoreResult<QueueRecord> {
        let mut inner = self.inner.lock().await;
        let day = record.queue_day;
        let sequence_number = record.sequence_number;

        if inner
            .records
            .iter()
            .any(|(d, r)| *d == day && r.sequence_number == sequence_number)
        {
            return Err(StoreError::DuplicateSequence {
                sequence_number,
                day,
            });
        }

        let stored = record.into_record(RecordId::new());
        inner.records.push((day, stored.clone()));
        Ok(stored)
    }

    async fn records_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Vec<QueueRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<QueueRecord> = inner
            .records
            .iter()
            .map(|(_, r)| r)
            .filter(|r| r.submitted_at >= start && r.submitted_at < end)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence_number);
        Ok(records)
    }

    async fn records_with_status(&self, status: QueueStatus) -> StoreResult<Vec<QueueRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<QueueRecord> = inner
            .records
            .iter()
            .map(|(_, r)| r)
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.submitted_at);
        Ok(records)
    }

    async fn next_daily_sequence(&self, window: &DayWindow) -> StoreResult<i32> {
        let mut inner = self.inner.lock().await;
        let next = match inner.counters.get(&window.day) {
            Some(last) => last + 1,
            None => {
                inner
                    .records
                    .iter()
                    .map(|(_, r)| r)
                    .filter(|r| window.contains(r.submitted_at))
                    .map(|r| r.sequence_number)
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        };
        inner.counters.insert(window.day, next);
        Ok(next)
    }

    async fn load_status(&self) -> StoreResult<Option<StatusDocument>> {
        Ok(self.inner.lock().await.status.clone())
    }

    async fn save_status(&self, document: &StatusDocument) -> StoreResult<()> {
        self.inner.lock().await.status = Some(document.clone());
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

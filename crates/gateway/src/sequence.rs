//! Per-day queue number allocation

use std::sync::Arc;

use time::{Date, OffsetDateTime, UtcOffset};

use antrian_shared::DayWindow;

use crate::store::{RecordStore, StoreResult};

/// Hands out queue numbers that restart at 1 every local calendar day.
///
/// Numbers come from an atomic counter in the record store, so concurrent
/// callers never receive the same value for the same day. A number whose
/// record is never written is not reissued.
#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn RecordStore>,
    offset: UtcOffset,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn RecordStore>, offset: UtcOffset) -> Self {
        Self { store, offset }
    }

    /// Local calendar day that `instant` falls on
    pub fn local_day(&self, instant: OffsetDateTime) -> Date {
        instant.to_offset(self.offset).date()
    }

    pub async fn allocate(&self, day: Date) -> StoreResult<i32> {
        let window = DayWindow::for_day(day, self.offset);
        let sequence_number = self.store.next_daily_sequence(&window).await?;
        tracing::debug!(day = %day, sequence_number, "Allocated queue number");
        Ok(sequence_number)
    }
}

//! Postgres-backed record store

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use antrian_shared::{
    DayWindow, NewQueueRecord, QueueRecord, QueueRecordRow, QueueStatus, StatusDocument,
    StatusDocumentRow,
};

use super::{RecordStore, StoreError, StoreResult};

const RECORD_COLUMNS: &str =
    "id, sequence_number, submitted_at, source_channel, sender_id, status, answers";

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn into_records(rows: Vec<QueueRecordRow>) -> StoreResult<Vec<QueueRecord>> {
    rows.into_iter()
        .map(|row| QueueRecord::try_from(row).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn append(&self, record: NewQueueRecord) -> StoreResult<QueueRecord> {
        let sequence_number = record.sequence_number;
        let day = record.queue_day;

        let row: QueueRecordRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO queue_records
                (id, sequence_number, submitted_at, queue_day, source_channel, sender_id, status, answers)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(record.sequence_number)
        .bind(record.submitted_at)
        .bind(record.queue_day)
        .bind(&record.source_channel)
        .bind(&record.sender_id)
        .bind(QueueStatus::Waiting.code())
        .bind(sqlx::types::Json(&record.answers))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::DuplicateSequence {
                    sequence_number,
                    day,
                }
            }
            _ => StoreError::Database(e),
        })?;

        Ok(QueueRecord::try_from(row)?)
    }

    async fn records_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Vec<QueueRecord>> {
        let rows: Vec<QueueRecordRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM queue_records
            WHERE submitted_at >= $1 AND submitted_at < $2
            ORDER BY sequence_number
            "#
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn records_with_status(&self, status: QueueStatus) -> StoreResult<Vec<QueueRecord>> {
        let rows: Vec<QueueRecordRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM queue_records
            WHERE status = $1
            ORDER BY submitted_at
            "#
        ))
        .bind(status.code())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn next_daily_sequence(&self, window: &DayWindow) -> StoreResult<i32> {
        // Concurrent first calls for a day serialize on the primary key; the
        // loser takes the update branch.
        let (value,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO daily_sequences AS ds (queue_day, last_value)
            VALUES (
                $1,
                COALESCE(
                    (SELECT MAX(sequence_number) FROM queue_records
                     WHERE submitted_at >= $2 AND submitted_at < $3),
                    0
                ) + 1
            )
            ON CONFLICT (queue_day) DO UPDATE SET last_value = ds.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(window.day)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(value)
    }

    async fn load_status(&self) -> StoreResult<Option<StatusDocument>> {
        let row: Option<StatusDocumentRow> = sqlx::query_as(
            r#"
            SELECT status, credential_payload, detail, updated_at, generation
            FROM gateway_status
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StatusDocument::try_from).transpose()?)
    }

    async fn save_status(&self, document: &StatusDocument) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO gateway_status (id, status, credential_payload, detail, updated_at, generation)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                credential_payload = EXCLUDED.credential_payload,
                detail = EXCLUDED.detail,
                updated_at = EXCLUDED.updated_at,
                generation = EXCLUDED.generation
            "#,
        )
        .bind(document.status.as_str())
        .bind(&document.credential_payload)
        .bind(&document.detail)
        .bind(document.updated_at)
        .bind(document.generation)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antrian_shared::{create_pool, run_migrations, Answers, ConnectionState};
    use time::macros::{date, offset};

    async fn store() -> PgRecordStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url, 5).await.expect("Failed to create pool");
        run_migrations(&pool).await.expect("migrations failed");
        PgRecordStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_daily_sequence_is_contiguous_under_concurrency() {
        let store = store().await;
        // Far-future day so reruns start from an empty window
        let day = date!(2099 - 01 - 01);
        sqlx::query("DELETE FROM daily_sequences WHERE queue_day = $1")
            .bind(day)
            .execute(store.pool())
            .await
            .unwrap();
        let window = DayWindow::for_day(day, offset!(+7));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.next_daily_sequence(&window).await.unwrap()
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_append_rejects_duplicate_sequence() {
        let store = store().await;
        let day = date!(2099 - 01 - 02);
        sqlx::query("DELETE FROM queue_records WHERE queue_day = $1")
            .bind(day)
            .execute(store.pool())
            .await
            .unwrap();
        let window = DayWindow::for_day(day, offset!(+7));

        let record = NewQueueRecord::from_chat(1, day, window.start, "628123", Answers::new());
        let stored = store.append(record.clone()).await.unwrap();
        assert_eq!(stored.status, QueueStatus::Waiting);
        assert_eq!(stored.source_channel, "chat");

        let err = store.append(record).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSequence { sequence_number: 1, .. }));

        let day_records = store.records_between(window.start, window.end).await.unwrap();
        assert_eq!(day_records.len(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_status_document_round_trip() {
        let store = store().await;
        let doc = StatusDocument::new(
            &ConnectionState::AwaitingScan {
                credential: "2@payload".to_string(),
            },
            None,
            9,
            OffsetDateTime::now_utc().replace_nanosecond(0).unwrap(),
        );
        store.save_status(&doc).await.unwrap();
        assert_eq!(store.load_status().await.unwrap(), Some(doc));
    }
}

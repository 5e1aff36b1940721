//! Ticket issuance for completed questionnaires

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::{Month, OffsetDateTime, UtcOffset, Weekday};
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{error, info, warn};

use antrian_shared::{NewQueueRecord, QueueRecord};

use crate::conversation::Completion;
use crate::render::{truncate_chars, ImageRenderer, RenderError, TicketFace, COMPLAINT_PREVIEW_CHARS};
use crate::sequence::SequenceAllocator;
use crate::store::{RecordStore, StoreError, StoreResult};
use crate::transport::{MediaAttachment, TransportAdapter, TransportError};

/// Total delivery attempts, including the first
const MAX_DELIVERY_ATTEMPTS: usize = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

const NAME_KEY: &str = "nama_pasien";
const MEMBERSHIP_KEY: &str = "kepesertaan";
const COMPLAINT_KEY: &str = "keluhan";

const MSG_PROCESSING: &str = "⏳ Terima kasih! Data Anda sedang diproses...";

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub clinic_name: String,
    pub offset: UtcOffset,
    /// Keyword shown to users who need to start over
    pub restart_keyword: String,
    pub store_timeout: Duration,
    pub delivery_timeout: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            clinic_name: "PUSKESMAS".to_string(),
            offset: UtcOffset::UTC,
            restart_keyword: "MULAI".to_string(),
            store_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("Failed to allocate queue number: {0}")]
    Allocation(#[source] StoreError),

    #[error("Failed to save queue record: {0}")]
    Persist(#[source] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A persisted ticket and whether its image reached the patient
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    pub record: QueueRecord,
    pub delivered: bool,
}

pub struct TicketIssuer {
    allocator: SequenceAllocator,
    store: Arc<dyn RecordStore>,
    renderer: Arc<dyn ImageRenderer>,
    transport: Arc<dyn TransportAdapter>,
    config: IssuerConfig,
}

impl TicketIssuer {
    pub fn new(
        allocator: SequenceAllocator,
        store: Arc<dyn RecordStore>,
        renderer: Arc<dyn ImageRenderer>,
        transport: Arc<dyn TransportAdapter>,
        config: IssuerConfig,
    ) -> Self {
        Self {
            allocator,
            store,
            renderer,
            transport,
            config,
        }
    }

    /// Number, persist and deliver a ticket for a finished questionnaire.
    ///
    /// The sender is told about every outcome. An error means no record was
    /// written; a delivery failure still returns the persisted ticket.
    pub async fn issue(&self, completion: &Completion) -> Result<IssuedTicket, IssueError> {
        let sender_id = completion.sender_id.as_str();
        self.reply(sender_id, MSG_PROCESSING).await;

        let now = OffsetDateTime::now_utc();
        let day = self.allocator.local_day(now);

        let sequence_number = match self.bounded(self.allocator.allocate(day)).await {
            Ok(n) => n,
            Err(e) => {
                error!(sender_id = %sender_id, error = %e, "Queue number allocation failed");
                self.reply(sender_id, &self.save_failed_message()).await;
                return Err(IssueError::Allocation(e));
            }
        };

        let new_record = NewQueueRecord::from_chat(
            sequence_number,
            day,
            now,
            sender_id,
            completion.answers.clone(),
        );
        let record = match self.bounded(self.store.append(new_record)).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    sender_id = %sender_id,
                    sequence_number,
                    error = %e,
                    "Failed to save queue record"
                );
                self.reply(sender_id, &self.save_failed_message()).await;
                return Err(IssueError::Persist(e));
            }
        };

        info!(
            sender_id = %sender_id,
            ticket = %record.ticket_label(),
            record_id = %record.id,
            "Queue ticket issued"
        );

        let delivered = match self.deliver(&record).await {
            Ok(message_id) => {
                info!(sender_id = %sender_id, message_id = %message_id, "Ticket delivered");
                true
            }
            Err(e) => {
                warn!(
                    sender_id = %sender_id,
                    ticket = %record.ticket_label(),
                    error = %e,
                    "Ticket delivery failed"
                );
                self.reply(sender_id, &delivery_failed_message(&record)).await;
                false
            }
        };

        Ok(IssuedTicket { record, delivered })
    }

    pub fn restart_keyword(&self) -> &str {
        &self.config.restart_keyword
    }

    /// Send a text reply. Failures are logged and never retried.
    pub async fn reply(&self, to: &str, text: &str) {
        match timeout(self.config.delivery_timeout, self.transport.send_text(to, text)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(to = %to, error = %e, "Failed to send reply"),
            Err(_) => warn!(to = %to, "Timed out sending reply"),
        }
    }

    async fn bounded<T>(&self, operation: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        timeout(self.config.store_timeout, operation)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout))
    }

    async fn deliver(&self, record: &QueueRecord) -> Result<String, DeliveryError> {
        let renderer = Arc::clone(&self.renderer);
        let sequence_number = record.sequence_number;
        let face = TicketFace {
            clinic_name: self.config.clinic_name.clone(),
            sequence_number,
            name: record.answer(NAME_KEY).to_string(),
            complaint: record.answer(COMPLAINT_KEY).to_string(),
            issued_at: format_local_datetime(record.submitted_at, self.config.offset),
        };

        let png = tokio::task::spawn_blocking(move || renderer.render(&face))
        .await
        .map_err(|e| RenderError::Task(e.to_string()))??;

        let caption = ticket_caption(record, &self.config);
        let filename = format!("tiket_antrian_{}.png", sequence_number);

        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_DELIVERY_ATTEMPTS - 1)
            .map(jitter);

        let message_id = RetryIf::spawn(
            strategy,
            || async {
                let media = MediaAttachment::png(filename.clone(), png.clone());
                match timeout(
                    self.config.delivery_timeout,
                    self.transport.send_media(&record.sender_id, media, &caption),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout),
                }
            },
            |e: &TransportError| {
                let transient = e.is_transient();
                if transient {
                    tracing::debug!(error = %e, "Transient delivery error - will retry");
                }
                transient
            },
        )
        .await?;

        Ok(message_id)
    }

    fn save_failed_message(&self) -> String {
        format!(
            "❌ Maaf, terjadi kesalahan sistem saat menyimpan data. Silakan ketik *{}* untuk mencoba lagi.",
            self.config.restart_keyword
        )
    }
}

fn delivery_failed_message(record: &QueueRecord) -> String {
    format!(
        "⚠️ Maaf, tiket gagal dikirim. Pendaftaran Anda tetap tercatat dengan nomor antrian *{}*. Sebutkan nomor ini kepada petugas.",
        record.ticket_label()
    )
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "Senin",
        Weekday::Tuesday => "Selasa",
        Weekday::Wednesday => "Rabu",
        Weekday::Thursday => "Kamis",
        Weekday::Friday => "Jumat",
        Weekday::Saturday => "Sabtu",
        Weekday::Sunday => "Minggu",
    }
}

fn month_name(month: Month) -> &'static str {
    match month {
        Month::January => "Januari",
        Month::February => "Februari",
        Month::March => "Maret",
        Month::April => "April",
        Month::May => "Mei",
        Month::June => "Juni",
        Month::July => "Juli",
        Month::August => "Agustus",
        Month::September => "September",
        Month::October => "Oktober",
        Month::November => "November",
        Month::December => "Desember",
    }
}

/// Long Indonesian date of `instant` in clinic local time
pub fn format_local_date(instant: OffsetDateTime, offset: UtcOffset) -> String {
    let local = instant.to_offset(offset);
    format!(
        "{}, {:02} {} {}",
        weekday_name(local.weekday()),
        local.day(),
        month_name(local.month()),
        local.year()
    )
}

/// Long Indonesian date plus `HH:MM` of `instant` in clinic local time
pub fn format_local_datetime(instant: OffsetDateTime, offset: UtcOffset) -> String {
    let local = instant.to_offset(offset);
    format!(
        "{} {:02}:{:02}",
        format_local_date(instant, offset),
        local.hour(),
        local.minute()
    )
}

/// Caption sent with the ticket image
pub fn ticket_caption(record: &QueueRecord, config: &IssuerConfig) -> String {
    format!(
        "🎫 *TIKET ANTRIAN*\n🏥 {clinic}\n\n📅 Tanggal: {date}\n🔢 Nomor Antrian: *{label}*\n👤 Nama: {name}\n💳 Kepesertaan: {membership}\n🩺 Keluhan: {complaint}\n\nℹ️ Harap datang 15 menit sebelum dipanggil dan tunjukkan tiket ini kepada petugas.\n\nKetik *{keyword}* untuk pendaftaran baru.",
        clinic = config.clinic_name,
        date = format_local_date(record.submitted_at, config.offset),
        label = record.ticket_label(),
        name = record.answer(NAME_KEY),
        membership = record.answer(MEMBERSHIP_KEY),
        complaint = truncate_chars(record.answer(COMPLAINT_KEY), COMPLAINT_PREVIEW_CHARS),
        keyword = config.restart_keyword,
    )
}

//! Common types used across the Antrian gateway

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::error::AntrianError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Queue record ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Source channel written on every record issued through the chat intake
pub const CHAT_SOURCE_CHANNEL: &str = "chat";

/// Prefix printed in front of a sequence number on tickets
pub const TICKET_PREFIX: &str = "A";

/// Format a sequence number the way it is shown to patients and staff
pub fn ticket_label(sequence_number: i32) -> String {
    format!("{}{}", TICKET_PREFIX, sequence_number)
}

// =============================================================================
// Queue Records
// =============================================================================

/// Queue entry status. Only staff workflows move a record past `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Waiting,
    InProgress,
    Done,
}

impl QueueStatus {
    /// Persisted numeric code (0 = waiting, 1 = in progress, 2 = done)
    pub fn code(&self) -> i16 {
        match self {
            Self::Waiting => 0,
            Self::InProgress => 1,
            Self::Done => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Waiting),
            1 => Some(Self::InProgress),
            2 => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" | "0" => Ok(Self::Waiting),
            "in_progress" | "1" => Ok(Self::InProgress),
            "done" | "2" => Ok(Self::Done),
            _ => Err(format!("Invalid queue status: {}", s)),
        }
    }
}

/// Collected questionnaire answers keyed by question key
pub type Answers = BTreeMap<String, String>;

/// A persisted queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: RecordId,
    pub sequence_number: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    pub source_channel: String,
    pub sender_id: String,
    pub status: QueueStatus,
    pub answers: Answers,
}

impl QueueRecord {
    pub fn ticket_label(&self) -> String {
        ticket_label(self.sequence_number)
    }

    /// Answer for `key`, empty when the question was skipped or is unknown
    pub fn answer(&self, key: &str) -> &str {
        self.answers.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Database row for `queue_records`
#[derive(Debug, Clone, FromRow)]
pub struct QueueRecordRow {
    pub id: Uuid,
    pub sequence_number: i32,
    pub submitted_at: OffsetDateTime,
    pub source_channel: String,
    pub sender_id: String,
    pub status: i16,
    pub answers: sqlx::types::Json<Answers>,
}

impl TryFrom<QueueRecordRow> for QueueRecord {
    type Error = AntrianError;

    fn try_from(row: QueueRecordRow) -> Result<Self, Self::Error> {
        let status = QueueStatus::from_code(row.status).ok_or_else(|| {
            AntrianError::Corrupt(format!("record {} has status code {}", row.id, row.status))
        })?;
        Ok(Self {
            id: RecordId(row.id),
            sequence_number: row.sequence_number,
            submitted_at: row.submitted_at,
            source_channel: row.source_channel,
            sender_id: row.sender_id,
            status,
            answers: row.answers.0,
        })
    }
}

/// A queue entry that has been numbered but not yet written
#[derive(Debug, Clone)]
pub struct NewQueueRecord {
    pub sequence_number: i32,
    /// Local day the sequence number was allocated for
    pub queue_day: Date,
    pub submitted_at: OffsetDateTime,
    pub source_channel: String,
    pub sender_id: String,
    pub answers: Answers,
}

impl NewQueueRecord {
    /// Build a waiting chat record
    pub fn from_chat(
        sequence_number: i32,
        queue_day: Date,
        submitted_at: OffsetDateTime,
        sender_id: impl Into<String>,
        answers: Answers,
    ) -> Self {
        Self {
            sequence_number,
            queue_day,
            submitted_at,
            source_channel: CHAT_SOURCE_CHANNEL.to_string(),
            sender_id: sender_id.into(),
            answers,
        }
    }

    pub fn into_record(self, id: RecordId) -> QueueRecord {
        QueueRecord {
            id,
            sequence_number: self.sequence_number,
            submitted_at: self.submitted_at,
            source_channel: self.source_channel,
            sender_id: self.sender_id,
            status: QueueStatus::Waiting,
            answers: self.answers,
        }
    }
}

// =============================================================================
// Calendar Days
// =============================================================================

/// Local midnight-to-midnight window of one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub day: Date,
    /// Inclusive start
    pub start: OffsetDateTime,
    /// Exclusive end
    pub end: OffsetDateTime,
}

impl DayWindow {
    pub fn for_day(day: Date, offset: UtcOffset) -> Self {
        let start = day.midnight().assume_offset(offset);
        Self {
            day,
            start,
            end: start + Duration::days(1),
        }
    }

    /// Window of the local day that contains `instant`
    pub fn containing(instant: OffsetDateTime, offset: UtcOffset) -> Self {
        Self::for_day(instant.to_offset(offset).date(), offset)
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        instant >= self.start && instant < self.end
    }
}

// =============================================================================
// Transport Connection Status
// =============================================================================

/// Shown in front of the reason of an `Error` status
pub const AUTH_FAILURE_PREFIX: &str = "Autentikasi gagal";

/// Connection state of the chat transport.
///
/// The credential payload only exists while a scan is awaited, so it lives
/// inside that variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Initializing,
    AwaitingScan {
        credential: String,
    },
    Connected,
    Error {
        reason: String,
    },
}

impl ConnectionState {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Disconnected => StatusKind::Disconnected,
            Self::Initializing => StatusKind::Initializing,
            Self::AwaitingScan { .. } => StatusKind::AwaitingScan,
            Self::Connected => StatusKind::Connected,
            Self::Error { .. } => StatusKind::Error,
        }
    }

    pub fn credential(&self) -> Option<&str> {
        match self {
            Self::AwaitingScan { credential } => Some(credential),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Wire/storage name of a connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Disconnected,
    Initializing,
    AwaitingScan,
    Connected,
    Error,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Initializing => "INITIALIZING",
            Self::AwaitingScan => "AWAITING_SCAN",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISCONNECTED" => Ok(Self::Disconnected),
            "INITIALIZING" => Ok(Self::Initializing),
            "AWAITING_SCAN" => Ok(Self::AwaitingScan),
            "CONNECTED" => Ok(Self::Connected),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid connection status: {}", s)),
        }
    }
}

/// The single persisted connection status document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Transport generation that produced this write
    pub generation: i64,
}

impl StatusDocument {
    pub fn new(
        state: &ConnectionState,
        detail: Option<String>,
        generation: i64,
        updated_at: OffsetDateTime,
    ) -> Self {
        let detail = match state {
            ConnectionState::Error { reason } if detail.is_none() => Some(reason.clone()),
            _ => detail,
        };
        Self {
            status: state.kind(),
            credential_payload: state.credential().map(str::to_string),
            detail,
            updated_at,
            generation,
        }
    }

    /// Detail as shown to operators. An `Error` document stores the bare
    /// reason, which is displayed behind [`AUTH_FAILURE_PREFIX`].
    pub fn display_detail(&self) -> Option<String> {
        match (self.status, &self.detail) {
            (StatusKind::Error, Some(reason)) => Some(format!("{}: {}", AUTH_FAILURE_PREFIX, reason)),
            (_, detail) => detail.clone(),
        }
    }

    /// Copy of this document with [`Self::display_detail`] as its detail
    pub fn for_display(&self) -> Self {
        Self {
            detail: self.display_detail(),
            ..self.clone()
        }
    }

    /// Rebuild the state this document describes.
    ///
    /// A scan document without a payload cannot be represented and reads as
    /// `Initializing`.
    pub fn state(&self) -> ConnectionState {
        match self.status {
            StatusKind::Disconnected => ConnectionState::Disconnected,
            StatusKind::Initializing => ConnectionState::Initializing,
            StatusKind::AwaitingScan => match &self.credential_payload {
                Some(credential) => ConnectionState::AwaitingScan {
                    credential: credential.clone(),
                },
                None => ConnectionState::Initializing,
            },
            StatusKind::Connected => ConnectionState::Connected,
            StatusKind::Error => ConnectionState::Error {
                reason: self.detail.clone().unwrap_or_default(),
            },
        }
    }
}

/// Database row for `gateway_status`
#[derive(Debug, Clone, FromRow)]
pub struct StatusDocumentRow {
    pub status: String,
    pub credential_payload: Option<String>,
    pub detail: Option<String>,
    pub updated_at: OffsetDateTime,
    pub generation: i64,
}

impl TryFrom<StatusDocumentRow> for StatusDocument {
    type Error = AntrianError;

    fn try_from(row: StatusDocumentRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<StatusKind>().map_err(AntrianError::Corrupt)?;
        Ok(Self {
            status,
            credential_payload: row.credential_payload,
            detail: row.detail,
            updated_at: row.updated_at,
            generation: row.generation,
        })
    }
}

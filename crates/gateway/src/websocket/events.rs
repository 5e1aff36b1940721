//! WebSocket event types and serialization

use antrian_shared::{StatusDocument, StatusKind};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat ping to keep connection alive
    Ping,

    /// Ask for the current status again
    Refresh,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection status changed, or a snapshot on connect
    Status {
        status: StatusKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        credential_payload: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(with = "time::serde::rfc3339")]
        updated_at: OffsetDateTime,
        generation: i64,
    },

    /// Response to client ping
    Pong,

    /// Error message
    Error { message: String },

    /// Connection acknowledgment
    Connected { session_id: Uuid },
}

impl From<StatusDocument> for ServerEvent {
    fn from(doc: StatusDocument) -> Self {
        ServerEvent::Status {
            detail: doc.display_detail(),
            status: doc.status,
            credential_payload: doc.credential_payload,
            updated_at: doc.updated_at,
            generation: doc.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antrian_shared::ConnectionState;

    #[test]
    fn test_client_event_deserialization() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));

        let event: ClientEvent = serde_json::from_str(r#"{"type":"refresh"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Refresh));

        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let json = serde_json::to_string(&ServerEvent::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_error_event_serialization() {
        let event = ServerEvent::Error {
            message: "Invalid event format".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Invalid event format");
    }

    #[test]
    fn test_status_event_carries_credential() {
        let doc = StatusDocument::new(
            &ConnectionState::AwaitingScan {
                credential: "2@abc".to_string(),
            },
            Some("Pindai kode QR".to_string()),
            3,
            OffsetDateTime::UNIX_EPOCH,
        );
        let json = serde_json::to_value(ServerEvent::from(doc)).unwrap();

        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "AWAITING_SCAN");
        assert_eq!(json["credential_payload"], "2@abc");
        assert_eq!(json["generation"], 3);
    }

    #[test]
    fn test_error_status_event_shows_prefixed_reason() {
        let doc = StatusDocument::new(
            &ConnectionState::Error {
                reason: "session rejected".to_string(),
            },
            None,
            2,
            OffsetDateTime::UNIX_EPOCH,
        );
        let json = serde_json::to_value(ServerEvent::from(doc)).unwrap();

        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["detail"], "Autentikasi gagal: session rejected");
    }

    #[test]
    fn test_status_event_omits_missing_fields() {
        let doc = StatusDocument::new(
            &ConnectionState::Connected,
            None,
            1,
            OffsetDateTime::UNIX_EPOCH,
        );
        let json = serde_json::to_value(ServerEvent::from(doc)).unwrap();

        assert_eq!(json["status"], "CONNECTED");
        assert!(json.get("credential_payload").is_none());
        assert!(json.get("detail").is_none());
    }
}

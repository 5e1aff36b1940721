//! Chat transport abstraction
//!
//! A transport owns the session with the chat network. It reports what
//! happens on that session as [`TransportEvent`]s to subscribed listeners and
//! sends text and media on request.

mod bridge;
mod listeners;
mod loopback;

pub use bridge::{sign_payload, BridgeEvent, BridgeTransportConfig, HttpBridgeTransport, SIGNATURE_HEADER};
pub use listeners::{ListenerRegistry, Subscription};
pub use loopback::{LoopbackTransport, SentMessage};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Something that happened on the transport session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport began bringing up a session
    Initializing,
    /// A login credential must be scanned by the operator
    CredentialChallenge(String),
    /// Session authenticated and usable
    Ready,
    /// The chat network rejected the session
    AuthFailed(String),
    /// Session lost
    Disconnected(String),
    /// Inbound chat message
    Message(InboundMessage),
}

/// A chat message received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: Option<String>,
    /// Sender identifier without any network suffix
    pub sender_id: String,
    pub text: String,
    pub is_group: bool,
    /// Sent by the gateway's own account
    pub from_me: bool,
}

impl InboundMessage {
    pub fn direct(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: None,
            sender_id: sender_id.into(),
            text: text.into(),
            is_group: false,
            from_me: false,
        }
    }
}

/// Binary payload attached to an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub filename: String,
    pub data: Vec<u8>,
}

impl MediaAttachment {
    pub fn png(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            filename: filename.into(),
            data,
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Transport session is not running")]
    NotRunning,

    #[error("Transport request timed out")]
    Timeout,

    #[error("Invalid transport response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Timeout => true,
            Self::NotRunning | Self::InvalidResponse(_) => false,
        }
    }
}

/// Channel half handed to a transport when subscribing
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Begin bringing up a session. Progress arrives as events.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Tear down the current session. Safe to call when none exists.
    async fn destroy(&self) -> Result<(), TransportError>;

    /// Deliver every future event to `listener` until the subscription ends
    fn subscribe(&self, listener: EventSender) -> Subscription;

    /// Whether the session is authenticated right now
    async fn is_alive(&self) -> Result<bool, TransportError>;

    /// Returns the transport's message id
    async fn send_text(&self, to: &str, text: &str) -> Result<String, TransportError>;

    async fn send_media(
        &self,
        to: &str,
        media: MediaAttachment,
        caption: &str,
    ) -> Result<String, TransportError>;
}

//! HTTP chat bridge transport
//!
//! The chat network session lives in a separate bridge process. The gateway
//! drives it over a small HTTP API and receives its events on a signed
//! webhook, which are fanned out to subscribers here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::{
    EventSender, InboundMessage, ListenerRegistry, MediaAttachment, Subscription,
    TransportAdapter, TransportError, TransportEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature (`sha256=<hex>`)
pub const SIGNATURE_HEADER: &str = "x-bridge-signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Suffix the chat network appends to direct-chat ids
const DIRECT_SUFFIX: &str = "@c.us";

/// Suffix of group chat ids
const GROUP_SUFFIX: &str = "@g.us";

#[derive(Debug, Clone)]
pub struct BridgeTransportConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub webhook_secret: String,
    pub request_timeout: Duration,
}

/// Event posted by the bridge to the gateway webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Initializing,
    Qr {
        payload: String,
    },
    Ready,
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        #[serde(default)]
        id: Option<String>,
        from: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        is_group: bool,
        #[serde(default)]
        from_me: bool,
    },
}

impl From<BridgeEvent> for TransportEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Initializing => Self::Initializing,
            BridgeEvent::Qr { payload } => Self::CredentialChallenge(payload),
            BridgeEvent::Ready => Self::Ready,
            BridgeEvent::AuthFailure { reason } => Self::AuthFailed(reason),
            BridgeEvent::Disconnected { reason } => Self::Disconnected(reason),
            BridgeEvent::Message {
                id,
                from,
                body,
                is_group,
                from_me,
            } => Self::Message(InboundMessage {
                message_id: id,
                is_group: is_group || from.ends_with(GROUP_SUFFIX),
                sender_id: normalize_sender(&from),
                text: body,
                from_me,
            }),
        }
    }
}

/// Strip the network suffix from a chat id
fn normalize_sender(chat_id: &str) -> String {
    chat_id
        .strip_suffix(DIRECT_SUFFIX)
        .unwrap_or(chat_id)
        .to_string()
}

/// Address a sender id the way the network expects
fn chat_id(to: &str) -> String {
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{}{}", to, DIRECT_SUFFIX)
    }
}

/// Compute the signature header value for a webhook body
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    connected: bool,
    /// Account id of the authenticated session
    #[serde(default)]
    wid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    to: String,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct MediaRequest<'a> {
    to: String,
    mime_type: &'a str,
    filename: &'a str,
    data: String,
    caption: &'a str,
}

pub struct HttpBridgeTransport {
    client: Client,
    config: BridgeTransportConfig,
    listeners: ListenerRegistry,
    /// Set between a successful `initialize` and the next `destroy`
    started: AtomicBool,
}

impl HttpBridgeTransport {
    pub fn new(config: BridgeTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            config,
            listeners: ListenerRegistry::new(),
            started: AtomicBool::new(false),
        })
    }

    fn ensure_started(&self) -> Result<(), TransportError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotRunning)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_empty(&self, path: &str) -> Result<(), TransportError> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn post_send<T: Serialize>(&self, path: &str, body: &T) -> Result<String, TransportError> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(sent.id)
    }

    /// Check a webhook signature against the configured secret
    pub fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        let Some(hex_sig) = signature.trim().strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    /// Fan a verified webhook event out to subscribers
    pub fn ingest(&self, event: BridgeEvent) -> usize {
        let event = TransportEvent::from(event);
        match &event {
            TransportEvent::Message(_) => debug!("Bridge delivered inbound message"),
            other => info!(event = ?other, "Bridge session event"),
        }
        let delivered = self.listeners.dispatch(event);
        if delivered == 0 {
            warn!("Bridge event dropped, no subscribers");
        }
        delivered
    }
}

#[async_trait]
impl TransportAdapter for HttpBridgeTransport {
    fn name(&self) -> &str {
        "http-bridge"
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        self.post_empty("/session/start").await?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.started.store(false, Ordering::SeqCst);
        match self.post_empty("/session/stop").await {
            // Nothing to stop
            Err(TransportError::Rejected { status: 404, .. }) => Ok(()),
            other => other,
        }
    }

    fn subscribe(&self, listener: EventSender) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn is_alive(&self) -> Result<bool, TransportError> {
        let response = self
            .authorize(self.client.get(self.url("/session/info")))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let info: SessionInfo = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(info.connected && info.wid.is_some_and(|wid| !wid.is_empty()))
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String, TransportError> {
        self.ensure_started()?;
        self.post_send(
            "/messages/text",
            &TextRequest {
                to: chat_id(to),
                text,
            },
        )
        .await
    }

    async fn send_media(
        &self,
        to: &str,
        media: MediaAttachment,
        caption: &str,
    ) -> Result<String, TransportError> {
        self.ensure_started()?;
        self.post_send(
            "/messages/media",
            &MediaRequest {
                to: chat_id(to),
                mime_type: &media.mime_type,
                filename: &media.filename,
                data: base64::engine::general_purpose::STANDARD.encode(&media.data),
                caption,
            },
        )
        .await
    }
}

//! In-process transport
//!
//! Records outbound messages instead of sending them and lets the caller
//! inject session events. Used to run the gateway without a chat bridge.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    EventSender, InboundMessage, ListenerRegistry, MediaAttachment, Subscription,
    TransportAdapter, TransportError, TransportEvent,
};

/// An outbound message captured by [`LoopbackTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text {
        to: String,
        text: String,
    },
    Media {
        to: String,
        media: MediaAttachment,
        caption: String,
    },
}

impl SentMessage {
    pub fn to(&self) -> &str {
        match self {
            Self::Text { to, .. } | Self::Media { to, .. } => to,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Media { .. } => None,
        }
    }
}

#[derive(Default)]
pub struct LoopbackTransport {
    listeners: ListenerRegistry,
    sent: Mutex<Vec<SentMessage>>,
    alive: AtomicBool,
    /// Liveness checks never answer while set
    stalled: AtomicBool,
    initializations: AtomicUsize,
    destroys: AtomicUsize,
    /// Media sends left to fail before succeeding
    failing_media: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a session event as if the network had produced it
    pub fn emit(&self, event: TransportEvent) -> usize {
        self.listeners.dispatch(event)
    }

    pub fn receive(&self, sender_id: &str, text: &str) -> usize {
        self.emit(TransportEvent::Message(InboundMessage::direct(sender_id, text)))
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make liveness checks hang until cleared
    pub fn stall_liveness(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make the next `count` media sends fail with a transient error
    pub fn fail_media_sends(&self, count: usize) {
        self.failing_media.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.to() == to).collect()
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn record(&self, message: SentMessage) -> String {
        let mut sent = self
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sent.push(message);
        format!("loopback-{}", sent.len())
    }
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, listener: EventSender) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn is_alive(&self) -> Result<bool, TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.alive.load(Ordering::SeqCst))
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String, TransportError> {
        Ok(self.record(SentMessage::Text {
            to: to.to_string(),
            text: text.to_string(),
        }))
    }

    async fn send_media(
        &self,
        to: &str,
        media: MediaAttachment,
        caption: &str,
    ) -> Result<String, TransportError> {
        let failing = self
            .failing_media
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Rejected {
                status: 503,
                message: "loopback media failure".to_string(),
            });
        }
        Ok(self.record(SentMessage::Media {
            to: to.to_string(),
            media,
            caption: caption.to_string(),
        }))
    }
}

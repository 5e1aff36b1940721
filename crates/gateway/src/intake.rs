//! Inbound chat message handling
//!
//! A single dispatcher reads the transport's inbound channel and routes each
//! message onto a FIFO queue owned by its sender. One worker task drains each
//! queue, so a sender's messages are handled in arrival order while different
//! senders proceed concurrently. Queues with nothing pending are reaped on a
//! fixed interval and recreated on the sender's next message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::conversation::{ConversationEngine, Outcome};
use crate::issuer::{IssuedTicket, TicketIssuer};
use crate::transport::InboundMessage;

/// How often idle sender queues are dropped
pub const QUEUE_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// What happened to one inbound message
#[derive(Debug, Clone)]
pub enum IntakeResult {
    /// Group, own or empty message
    Ignored,
    Replied,
    Issued(IssuedTicket),
    /// Questionnaire finished but no record could be written
    IssueFailed,
}

pub struct IntakeService {
    engine: Arc<ConversationEngine>,
    issuer: TicketIssuer,
}

/// One sender's FIFO and the count of messages queued or in flight on it
struct SenderQueue {
    tx: mpsc::UnboundedSender<InboundMessage>,
    pending: Arc<AtomicUsize>,
}

/// Routes inbound messages onto per-sender queues.
///
/// Only the dispatcher increments `pending`, and it is also the only one that
/// reaps, so a queue observed at zero cannot receive a message concurrently.
struct Dispatcher {
    service: Arc<IntakeService>,
    queues: HashMap<String, SenderQueue>,
}

impl Dispatcher {
    fn new(service: Arc<IntakeService>) -> Self {
        Self {
            service,
            queues: HashMap::new(),
        }
    }

    fn enqueue(&mut self, message: InboundMessage) {
        if is_ignored(&message) {
            debug!(sender_id = %message.sender_id, "Ignoring inbound message");
            return;
        }

        let sender_id = message.sender_id.clone();
        let queue = self
            .queues
            .entry(sender_id.clone())
            .or_insert_with(|| start_worker(&self.service, &sender_id));
        queue.pending.fetch_add(1, Ordering::AcqRel);

        if let Err(mpsc::error::SendError(message)) = queue.tx.send(message) {
            warn!(sender_id = %sender_id, "Sender worker stopped, starting a new one");
            let queue = start_worker(&self.service, &sender_id);
            queue.pending.fetch_add(1, Ordering::AcqRel);
            if queue.tx.send(message).is_err() {
                error!(sender_id = %sender_id, "Dropping message, sender worker unavailable");
                return;
            }
            self.queues.insert(sender_id, queue);
        }
    }

    /// Drop queues with nothing pending; their workers exit once drained
    fn reap_idle(&mut self) -> usize {
        let before = self.queues.len();
        self.queues
            .retain(|_, queue| queue.pending.load(Ordering::Acquire) > 0);
        before - self.queues.len()
    }

    fn queued_senders(&self) -> usize {
        self.queues.len()
    }
}

fn start_worker(service: &Arc<IntakeService>, sender_id: &str) -> SenderQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
    let pending = Arc::new(AtomicUsize::new(0));

    let service = Arc::clone(service);
    let counter = Arc::clone(&pending);
    let sender_id = sender_id.to_string();
    tokio::spawn(async move {
        debug!(sender_id = %sender_id, "Sender queue started");
        while let Some(message) = rx.recv().await {
            service.process(message).await;
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(sender_id = %sender_id, "Sender queue drained");
    });

    SenderQueue { tx, pending }
}

fn is_ignored(message: &InboundMessage) -> bool {
    message.from_me || message.is_group || message.text.trim().is_empty()
}

impl IntakeService {
    pub fn new(engine: Arc<ConversationEngine>, issuer: TicketIssuer) -> Self {
        Self { engine, issuer }
    }

    pub fn engine(&self) -> &Arc<ConversationEngine> {
        &self.engine
    }

    /// Consume inbound messages until the channel closes
    pub fn spawn(self: Arc<Self>, inbound: mpsc::UnboundedReceiver<InboundMessage>) -> JoinHandle<()> {
        self.spawn_with_reap_interval(inbound, QUEUE_REAP_INTERVAL)
    }

    pub fn spawn_with_reap_interval(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut dispatcher = Dispatcher::new(self);
            let mut reap = tokio::time::interval(every);
            reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            reap.tick().await;

            loop {
                tokio::select! {
                    message = inbound.recv() => match message {
                        Some(message) => dispatcher.enqueue(message),
                        None => break,
                    },
                    _ = reap.tick() => {
                        let reaped = dispatcher.reap_idle();
                        if reaped > 0 {
                            debug!(
                                reaped,
                                remaining = dispatcher.queued_senders(),
                                "Reaped idle sender queues"
                            );
                        }
                    }
                }
            }
            debug!("Inbound message channel closed");
        })
    }

    /// Handle one message on a child task, recovering the sender if it panics.
    ///
    /// Returns `None` when the handler panicked or was cancelled.
    pub async fn process(self: &Arc<Self>, message: InboundMessage) -> Option<IntakeResult> {
        let sender_id = message.sender_id.clone();
        let worker = {
            let service = Arc::clone(self);
            tokio::spawn(async move { service.handle(message).await })
        };

        match worker.await {
            Ok(result) => Some(result),
            Err(e) if e.is_panic() => {
                error!(sender_id = %sender_id, "Message handler panicked");
                self.recover(&sender_id).await;
                None
            }
            Err(_) => None,
        }
    }

    pub async fn handle(&self, message: InboundMessage) -> IntakeResult {
        if is_ignored(&message) {
            return IntakeResult::Ignored;
        }
        let text = message.text.trim();

        let sender_id = message.sender_id.as_str();
        let mut slot = self.engine.lock_sender(sender_id).await;
        debug!(sender_id = %sender_id, "Handling inbound message");

        match self.engine.advance(&mut slot, sender_id, text) {
            Outcome::Reply(reply) => {
                self.issuer.reply(sender_id, &reply).await;
                IntakeResult::Replied
            }
            Outcome::Complete(completion) => match self.issuer.issue(&completion).await {
                Ok(ticket) => IntakeResult::Issued(ticket),
                Err(e) => {
                    warn!(sender_id = %sender_id, error = %e, "Ticket issuance failed");
                    IntakeResult::IssueFailed
                }
            },
        }
    }

    async fn recover(&self, sender_id: &str) {
        self.engine.discard(sender_id).await;
        let message = format!(
            "❌ Terjadi kesalahan tak terduga. Silakan ketik *{}* untuk mengulang pendaftaran.",
            self.issuer.restart_keyword()
        );
        self.issuer.reply(sender_id, &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{InputClassifier, Questionnaire};
    use crate::issuer::IssuerConfig;
    use crate::render::PngTicketRenderer;
    use crate::sequence::SequenceAllocator;
    use crate::store::MemoryRecordStore;
    use crate::transport::LoopbackTransport;
    use time::macros::offset;

    fn service(transport: Arc<LoopbackTransport>) -> Arc<IntakeService> {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = Arc::new(ConversationEngine::new(
            Arc::new(Questionnaire::patient_registration().unwrap()),
            InputClassifier::default(),
            None,
        ));
        let issuer = TicketIssuer::new(
            SequenceAllocator::new(store.clone(), offset!(+7)),
            store,
            Arc::new(PngTicketRenderer::new()),
            transport,
            IssuerConfig::default(),
        );
        Arc::new(IntakeService::new(engine, issuer))
    }

    async fn wait_for_replies(transport: &LoopbackTransport, sender: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while transport.sent_to(sender).len() < count {
            assert!(tokio::time::Instant::now() < deadline, "replies never arrived");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_idle_queues_are_reaped() {
        let transport = Arc::new(LoopbackTransport::new());
        let mut dispatcher = Dispatcher::new(service(transport.clone()));

        dispatcher.enqueue(InboundMessage::direct("6281", "MULAI"));
        dispatcher.enqueue(InboundMessage::direct("6282", "MULAI"));
        dispatcher.enqueue(InboundMessage::direct("6281", "Budi Santoso"));
        assert_eq!(dispatcher.queued_senders(), 2);

        wait_for_replies(&transport, "6281", 2).await;
        wait_for_replies(&transport, "6282", 1).await;
        // The counter drops right after the reply is recorded
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(dispatcher.reap_idle(), 2);
        assert_eq!(dispatcher.queued_senders(), 0);

        // A reaped sender gets a fresh queue and keeps its conversation
        dispatcher.enqueue(InboundMessage::direct("6281", "3201234567890123"));
        assert_eq!(dispatcher.queued_senders(), 1);
        wait_for_replies(&transport, "6281", 3).await;
        let slot = dispatcher.service.engine().lock_sender("6281").await;
        assert_eq!(slot.as_ref().unwrap().awaiting_key, "tanggal_lahir");
    }

    #[tokio::test]
    async fn test_ignored_messages_get_no_queue() {
        let transport = Arc::new(LoopbackTransport::new());
        let mut dispatcher = Dispatcher::new(service(transport.clone()));

        let mut group = InboundMessage::direct("6281", "MULAI");
        group.is_group = true;
        dispatcher.enqueue(group);
        dispatcher.enqueue(InboundMessage::direct("6282", "  "));

        assert_eq!(dispatcher.queued_senders(), 0);
    }
}

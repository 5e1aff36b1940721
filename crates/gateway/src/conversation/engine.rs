//! Conversation state machine
//!
//! [`ConversationEngine::advance`] is a pure step over one sender's slot.
//! Callers obtain the slot with [`ConversationEngine::lock_sender`] and may keep
//! holding it while they act on the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use antrian_shared::Answers;

use super::input::{InputClassifier, UtteranceKind};
use super::questions::Questionnaire;
use super::sessions::{ConversationState, SenderGuard, SessionMap};

/// A finished questionnaire ready for ticket issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub sender_id: String,
    /// One entry per question key, empty for skipped questions
    pub answers: Answers,
}

/// Result of one conversation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Text to send back to the sender
    Reply(String),
    /// All questions answered; the conversation has been cleared
    Complete(Completion),
}

pub struct ConversationEngine {
    questionnaire: Arc<Questionnaire>,
    classifier: InputClassifier,
    sessions: SessionMap,
    ttl: Option<Duration>,
}

impl ConversationEngine {
    pub fn new(
        questionnaire: Arc<Questionnaire>,
        classifier: InputClassifier,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            questionnaire,
            classifier,
            sessions: SessionMap::new(),
            ttl,
        }
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    /// Wait for exclusive access to one sender's conversation
    pub async fn lock_sender(&self, sender_id: &str) -> SenderGuard {
        self.sessions.lock(sender_id).await
    }

    /// Lock the sender's slot and advance it by one message
    pub async fn handle_inbound(&self, sender_id: &str, raw_text: &str) -> Outcome {
        let mut slot = self.lock_sender(sender_id).await;
        self.advance(&mut slot, sender_id, raw_text)
    }

    /// Advance `slot` with one inbound message.
    ///
    /// A restart keyword, a missing state and an expired state all begin a new
    /// conversation at the first question.
    pub fn advance(
        &self,
        slot: &mut Option<ConversationState>,
        sender_id: &str,
        raw_text: &str,
    ) -> Outcome {
        let now = Instant::now();
        let utterance = self.classifier.classify(raw_text);

        let live = slot.take().filter(|state| {
            let expired = state.is_expired(self.ttl, now);
            if expired {
                tracing::debug!(sender_id = %sender_id, "Conversation expired");
            }
            !expired
        });

        let mut state = match live {
            Some(state) if utterance.kind != UtteranceKind::Restart => state,
            prior => {
                if prior.is_some() {
                    tracing::info!(sender_id = %sender_id, "Conversation restarted by sender");
                }
                return self.begin(slot, sender_id, now);
            }
        };
        state.last_activity = now;

        let Some(question) = self.questionnaire.get(&state.awaiting_key) else {
            tracing::warn!(
                sender_id = %sender_id,
                awaiting_key = %state.awaiting_key,
                "Conversation awaits an unknown question, starting over"
            );
            return self.begin(slot, sender_id, now);
        };

        let value = if utterance.kind == UtteranceKind::Skip && question.optional {
            String::new()
        } else if question.validator.accepts(&utterance.text) {
            question.transform.apply(&utterance.text)
        } else {
            let reply = question.rejection();
            *slot = Some(state);
            return Outcome::Reply(reply);
        };

        state.answers.insert(question.key.clone(), value);

        match self.questionnaire.next_after(&question.key) {
            Some(next) => {
                let prompt = next.prompt.clone();
                state.awaiting_key = next.key.clone();
                *slot = Some(state);
                Outcome::Reply(prompt)
            }
            None => {
                tracing::info!(sender_id = %sender_id, "Questionnaire completed");
                Outcome::Complete(Completion {
                    sender_id: sender_id.to_string(),
                    answers: self.questionnaire.complete_answers(state.answers),
                })
            }
        }
    }

    fn begin(&self, slot: &mut Option<ConversationState>, sender_id: &str, now: Instant) -> Outcome {
        let first = self.questionnaire.first();
        *slot = Some(ConversationState::new(sender_id, first.key.clone(), now));
        Outcome::Reply(first.prompt.clone())
    }

    /// Forget the sender's conversation, waiting for any holder to finish
    pub async fn discard(&self, sender_id: &str) {
        *self.lock_sender(sender_id).await = None;
    }

    /// Remove expired and finished conversations
    pub fn sweep_expired(&self) -> usize {
        self.sessions.sweep(self.ttl, Instant::now())
    }

    pub fn active_conversations(&self) -> usize {
        self.sessions.active()
    }

    /// Periodically sweep expired conversations until the task is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let removed = engine.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle conversations");
                }
            }
        })
    }
}

//! Per-sender conversation slots
//!
//! Each sender owns one async mutex around its optional conversation state.
//! Holding the guard gives exclusive access to that conversation while other
//! senders proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use antrian_shared::Answers;

/// In-flight conversation with one sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub sender_id: String,
    /// Key of the question whose answer is expected next
    pub awaiting_key: String,
    pub answers: Answers,
    /// When the sender started this conversation
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl ConversationState {
    pub fn new(sender_id: impl Into<String>, awaiting_key: impl Into<String>, now: Instant) -> Self {
        Self {
            sender_id: sender_id.into(),
            awaiting_key: awaiting_key.into(),
            answers: Answers::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.saturating_duration_since(self.last_activity) >= ttl)
    }
}

type Slot = Arc<AsyncMutex<Option<ConversationState>>>;

/// Exclusive access to one sender's conversation
pub type SenderGuard = OwnedMutexGuard<Option<ConversationState>>;

/// Map of sender → conversation slot
#[derive(Debug, Default)]
pub struct SessionMap {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // Slot bookkeeping cannot be left half-updated, so a poisoned map is still usable
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for exclusive access to `sender_id`'s conversation
    pub async fn lock(&self, sender_id: &str) -> SenderGuard {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(sender_id.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Drop idle and expired slots nobody is using.
    ///
    /// A slot is only removed while the map holds the sole reference, so a
    /// task that already fetched it can never end up on an orphaned slot.
    pub fn sweep(&self, ttl: Option<Duration>, now: Instant) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(state) => state
                    .as_ref()
                    .is_some_and(|state| !state.is_expired(ttl, now)),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Number of senders with a live conversation
    pub fn active(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(state) => state.is_some(),
                Err(_) => true,
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_per_sender() {
        let sessions = SessionMap::new();
        let mut first = sessions.lock("6281").await;
        *first = Some(ConversationState::new("6281", "nik", Instant::now()));

        // A different sender is not blocked
        let other = sessions.lock("6282").await;
        assert!(other.is_none());
        drop(other);
        drop(first);

        let again = sessions.lock("6281").await;
        assert_eq!(again.as_ref().unwrap().awaiting_key, "nik");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_and_idle() {
        let sessions = SessionMap::new();
        let ttl = Some(Duration::from_secs(60));

        *sessions.lock("old").await = Some(ConversationState::new("old", "nik", Instant::now()));
        drop(sessions.lock("idle").await);

        tokio::time::advance(Duration::from_secs(30)).await;
        *sessions.lock("fresh").await =
            Some(ConversationState::new("fresh", "nik", Instant::now()));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(sessions.sweep(ttl, Instant::now()), 2);
        assert_eq!(sessions.active(), 1);
        assert!(sessions.lock("fresh").await.is_some());
        assert!(sessions.lock("old").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_held_slots() {
        let sessions = SessionMap::new();
        let held = sessions.lock("busy").await;
        assert_eq!(sessions.sweep(Some(Duration::ZERO), Instant::now()), 0);
        drop(held);
        assert_eq!(sessions.sweep(Some(Duration::ZERO), Instant::now()), 1);
    }
}

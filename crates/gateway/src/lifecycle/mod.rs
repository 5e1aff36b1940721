//! Transport connection lifecycle
//!
//! [`ConnectionLifecycleManager`] is the single writer of the connection
//! status. Every transition runs under one async mutex, is persisted to the
//! record store and then published to live subscribers, so all observers see
//! the same order.
//!
//! Each start command opens a new transport generation. Listeners from older
//! generations are unsubscribed, and any event that still arrives tagged with
//! an older generation is dropped.

mod watchdog;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use antrian_shared::{ConnectionState, StatusDocument, StatusKind};

use crate::store::{RecordStore, StoreError};
use crate::transport::{InboundMessage, Subscription, TransportAdapter, TransportError, TransportEvent};

use self::watchdog::Watchdog;

const DETAIL_STARTING: &str = "Memulai koneksi...";
const DETAIL_SCAN: &str = "Silakan scan QR Code untuk menghubungkan gateway.";
const DETAIL_CONNECTED: &str = "Gateway terhubung dan siap menerima pesan.";
const DETAIL_HEARTBEAT_LOST: &str = "Koneksi terputus (terdeteksi oleh heartbeat).";
const DETAIL_BOOT_RESET: &str = "Status direset karena server restart.";

const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub watchdog_interval: Duration,
    pub liveness_timeout: Duration,
    /// Bound on each status write
    pub store_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Listener bound to one transport generation
struct Binding {
    subscription: Subscription,
    pump: JoinHandle<()>,
}

impl Binding {
    fn release(self) {
        self.subscription.unsubscribe();
        self.pump.abort();
    }
}

struct Inner {
    state: ConnectionState,
    generation: i64,
    binding: Option<Binding>,
    watchdog: Option<Watchdog>,
}

struct Shared {
    transport: Arc<dyn TransportAdapter>,
    store: Arc<dyn RecordStore>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    updates: broadcast::Sender<StatusDocument>,
    config: LifecycleConfig,
    inner: Mutex<Inner>,
    /// Mirror of `Inner::generation` for lock-free message routing
    generation: AtomicI64,
    snapshot: RwLock<StatusDocument>,
}

/// Owns the connection state machine of the chat transport
#[derive(Clone)]
pub struct ConnectionLifecycleManager {
    shared: Arc<Shared>,
}

impl ConnectionLifecycleManager {
    /// Inbound chat messages from the current generation are forwarded to
    /// `inbound`.
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        store: Arc<dyn RecordStore>,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        config: LifecycleConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let initial = StatusDocument::new(
            &ConnectionState::Disconnected,
            None,
            0,
            OffsetDateTime::now_utc(),
        );
        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                inbound,
                updates,
                config,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    binding: None,
                    watchdog: None,
                }),
                generation: AtomicI64::new(0),
                snapshot: RwLock::new(initial),
            }),
        }
    }

    fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Current status document
    pub fn status(&self) -> StatusDocument {
        self.shared
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Credential payload, present only while a scan is awaited
    pub fn credential(&self) -> Option<String> {
        self.status().credential_payload
    }

    /// Current status plus a receiver for every later update.
    ///
    /// Subscribing under the snapshot lock means the receiver yields exactly
    /// the documents published after the returned one.
    pub fn watch(&self) -> (StatusDocument, broadcast::Receiver<StatusDocument>) {
        let snapshot = self
            .shared
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let updates = self.shared.updates.subscribe();
        (snapshot.clone(), updates)
    }

    pub fn generation(&self) -> i64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    pub async fn watchdog_running(&self) -> bool {
        self.shared
            .inner
            .lock()
            .await
            .watchdog
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Load the persisted status at process start.
    ///
    /// Only `Disconnected` and `Error` survive a restart. `Initializing`,
    /// `AwaitingScan` and `Connected` describe a session owned by the previous
    /// process, so they are downgraded to `Disconnected` and any credential
    /// from that session is dropped.
    pub async fn reconcile_on_boot(&self) -> Result<StatusDocument, StoreError> {
        let mut inner = self.shared.inner.lock().await;
        let persisted = self.shared.store.load_status().await?;

        match persisted {
            Some(document) => {
                inner.generation = document.generation;
                self.shared
                    .generation
                    .store(document.generation, Ordering::SeqCst);

                if survives_restart(document.status) {
                    inner.state = document.state();
                    *self
                        .shared
                        .snapshot
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = document;
                } else {
                    info!(
                        generation = document.generation,
                        status = %document.status,
                        "Resetting stale transport status"
                    );
                    self.apply(
                        &mut inner,
                        ConnectionState::Disconnected,
                        Some(DETAIL_BOOT_RESET.to_string()),
                    )
                    .await;
                }
            }
            None => {
                self.apply(&mut inner, ConnectionState::Disconnected, None)
                    .await;
            }
        }

        Ok(self.status())
    }

    /// Tear down any current session and start a new one
    pub async fn start(&self) -> Result<(), TransportError> {
        let generation = {
            let mut inner = self.shared.inner.lock().await;

            if let Some(binding) = inner.binding.take() {
                binding.release();
            }
            if let Some(watchdog) = inner.watchdog.take() {
                watchdog.stop();
            }
            if let Err(e) = self.shared.transport.destroy().await {
                warn!(error = %e, "Failed to tear down previous transport session");
            }

            inner.generation += 1;
            let generation = inner.generation;
            self.shared.generation.store(generation, Ordering::SeqCst);

            self.apply(
                &mut inner,
                ConnectionState::Initializing,
                Some(DETAIL_STARTING.to_string()),
            )
            .await;

            let (tx, rx) = mpsc::unbounded_channel();
            let subscription = self.shared.transport.subscribe(tx);
            let pump = tokio::spawn(pump_events(Arc::downgrade(&self.shared), generation, rx));
            inner.binding = Some(Binding { subscription, pump });

            generation
        };

        info!(
            generation,
            transport = self.shared.transport.name(),
            "Starting transport session"
        );

        if let Err(e) = self.shared.transport.initialize().await {
            error!(generation, error = %e, "Transport failed to initialize");
            self.handle_event(generation, TransportEvent::AuthFailed(e.to_string()))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Release listeners, stop the watchdog and close the transport session
    pub async fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(binding) = inner.binding.take() {
            binding.release();
        }
        if let Some(watchdog) = inner.watchdog.take() {
            watchdog.stop();
        }
        if let Err(e) = self.shared.transport.destroy().await {
            warn!(error = %e, "Failed to close transport session");
        }
    }

    async fn handle_event(&self, generation: i64, event: TransportEvent) {
        if let TransportEvent::Message(message) = event {
            if generation != self.generation() {
                debug!(generation, "Dropping message from stale transport generation");
            } else if self.shared.inbound.send(message).is_err() {
                warn!("Inbound message dropped, intake is not running");
            }
            return;
        }

        let mut inner = self.shared.inner.lock().await;
        if generation != inner.generation {
            debug!(
                generation,
                current = inner.generation,
                event = ?event,
                "Dropping event from stale transport generation"
            );
            return;
        }

        use ConnectionState as S;
        use TransportEvent as E;
        let (next, detail) = match (&inner.state, event) {
            (S::Initializing | S::AwaitingScan { .. }, E::CredentialChallenge(credential)) => {
                (S::AwaitingScan { credential }, Some(DETAIL_SCAN.to_string()))
            }
            (S::Initializing | S::AwaitingScan { .. }, E::Ready) => {
                (S::Connected, Some(DETAIL_CONNECTED.to_string()))
            }
            // Detail defaults to the bare reason
            (S::Initializing | S::AwaitingScan { .. }, E::AuthFailed(reason)) => {
                (S::Error { reason }, None)
            }
            (S::Initializing | S::AwaitingScan { .. } | S::Connected, E::Disconnected(reason)) => {
                (S::Disconnected, Some(format!("Koneksi terputus: {}", reason)))
            }
            (state, event) => {
                debug!(status = %state.kind(), event = ?event, "Ignoring transport event");
                return;
            }
        };

        self.apply(&mut inner, next, detail).await;
    }

    async fn on_liveness_lost(&self, generation: i64) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation || !inner.state.is_connected() {
            debug!(generation, "Ignoring liveness loss for a superseded session");
            return;
        }
        // Called from the watchdog task itself
        if let Some(watchdog) = inner.watchdog.take() {
            watchdog.detach();
        }
        self.apply(
            &mut inner,
            ConnectionState::Disconnected,
            Some(DETAIL_HEARTBEAT_LOST.to_string()),
        )
        .await;
    }

    /// Enter `next`, persist it and publish it
    async fn apply(&self, inner: &mut Inner, next: ConnectionState, detail: Option<String>) {
        if let Some(watchdog) = inner.watchdog.take() {
            watchdog.stop();
        }
        if next.is_connected() {
            inner.watchdog = Some(self.spawn_watchdog(inner.generation));
        }
        inner.state = next;

        let document = StatusDocument::new(
            &inner.state,
            detail,
            inner.generation,
            OffsetDateTime::now_utc(),
        );

        match tokio::time::timeout(
            self.shared.config.store_timeout,
            self.shared.store.save_status(&document),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to persist connection status"),
            Err(_) => error!("Timed out persisting connection status"),
        }

        info!(
            generation = inner.generation,
            status = %document.status,
            detail = document.detail.as_deref().unwrap_or(""),
            "Connection status changed"
        );

        let mut snapshot = self
            .shared
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *snapshot = document.clone();
        // Published under the snapshot lock; no receivers is fine
        let _ = self.shared.updates.send(document);
    }

    fn spawn_watchdog(&self, generation: i64) -> Watchdog {
        let shared = Arc::downgrade(&self.shared);
        Watchdog::spawn(
            Arc::clone(&self.shared.transport),
            self.shared.config.watchdog_interval,
            self.shared.config.liveness_timeout,
            move |_reason| async move {
                if let Some(shared) = shared.upgrade() {
                    ConnectionLifecycleManager::from_shared(shared)
                        .on_liveness_lost(generation)
                        .await;
                }
            },
        )
    }
}

fn survives_restart(status: StatusKind) -> bool {
    matches!(status, StatusKind::Disconnected | StatusKind::Error)
}

async fn pump_events(
    shared: Weak<Shared>,
    generation: i64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        ConnectionLifecycleManager::from_shared(shared)
            .handle_event(generation, event)
            .await;
    }
    debug!(generation, "Transport listener closed");
}

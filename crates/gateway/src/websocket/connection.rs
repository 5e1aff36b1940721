//! WebSocket connection management

use std::sync::Arc;

use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::lifecycle::ConnectionLifecycleManager;

use super::events::ServerEvent;

/// Represents an active operator WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    /// Create a new connection
    pub fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sender,
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Queue the current status, then every later transition, until the
    /// connection closes.
    ///
    /// The snapshot and the update stream come from one `watch` call, so the
    /// socket never sees a status older than one it already received.
    pub fn follow_status(self: &Arc<Self>, lifecycle: ConnectionLifecycleManager) -> JoinHandle<()> {
        let (snapshot, mut updates) = lifecycle.watch();
        let _ = self.send(ServerEvent::from(snapshot));

        let conn = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = match updates.recv().await {
                    Ok(doc) => ServerEvent::from(doc),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            session_id = %conn.session_id,
                            skipped,
                            "Status stream lagged, resending snapshot"
                        );
                        let (doc, fresh) = lifecycle.watch();
                        updates = fresh;
                        ServerEvent::from(doc)
                    }
                    Err(RecvError::Closed) => break,
                };
                if conn.send(event).is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::store::MemoryRecordStore;
    use crate::transport::{LoopbackTransport, TransportEvent};
    use antrian_shared::StatusKind;

    fn lifecycle(transport: Arc<LoopbackTransport>) -> ConnectionLifecycleManager {
        ConnectionLifecycleManager::new(
            transport,
            Arc::new(MemoryRecordStore::new()),
            mpsc::unbounded_channel().0,
            LifecycleConfig::default(),
        )
    }

    fn status_of(event: ServerEvent) -> (StatusKind, i64) {
        match event {
            ServerEvent::Status {
                status, generation, ..
            } => (status, generation),
            other => panic!("expected a status event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx);

        conn.send(ServerEvent::Pong).unwrap();
        assert!(matches!(rx.recv().await, Some(ServerEvent::Pong)));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx);
        drop(rx);

        assert!(conn.send(ServerEvent::Pong).is_err());
    }

    #[tokio::test]
    async fn test_follow_status_sends_snapshot_then_transitions() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = lifecycle(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(tx));

        let feed = conn.follow_status(manager.clone());
        manager.start().await.unwrap();
        transport.emit(TransportEvent::CredentialChallenge("2@abc".to_string()));

        assert_eq!(
            status_of(rx.recv().await.unwrap()),
            (StatusKind::Disconnected, 0)
        );
        assert_eq!(
            status_of(rx.recv().await.unwrap()),
            (StatusKind::Initializing, 1)
        );
        assert_eq!(
            status_of(rx.recv().await.unwrap()),
            (StatusKind::AwaitingScan, 1)
        );

        drop(rx);
        manager.start().await.unwrap();
        // Feed stops once the socket side is gone
        tokio::time::timeout(std::time::Duration::from_secs(5), feed)
            .await
            .unwrap()
            .unwrap();
    }
}

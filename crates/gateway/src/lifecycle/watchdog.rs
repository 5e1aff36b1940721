//! Liveness watchdog for a connected transport session

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::transport::TransportAdapter;

/// Periodic liveness check. Fires its callback once, on the first failed
/// check, then exits.
#[derive(Debug)]
pub(crate) struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn spawn<F, Fut>(
        transport: Arc<dyn TransportAdapter>,
        every: Duration,
        check_timeout: Duration,
        on_lost: F,
    ) -> Self
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            // First check one full interval after the session came up
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let reason = loop {
                ticker.tick().await;
                match timeout(check_timeout, transport.is_alive()).await {
                    Ok(Ok(true)) => tracing::debug!("Transport liveness ok"),
                    Ok(Ok(false)) => break "transport reports session not alive".to_string(),
                    Ok(Err(e)) => break format!("liveness check failed: {}", e),
                    Err(_) => {
                        break format!("liveness check timed out after {:?}", check_timeout)
                    }
                }
            };

            tracing::warn!(reason = %reason, "Transport liveness lost");
            on_lost(reason).await;
        });

        Self { handle }
    }

    /// Cancel the watchdog
    pub(crate) fn stop(self) {
        self.handle.abort();
    }

    /// Let the task run to completion without holding on to it.
    /// Used from inside the watchdog's own callback, where aborting would
    /// cancel the caller.
    pub(crate) fn detach(self) {}

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn test_fires_on_first_failed_check() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.set_alive(true);
        let (tx, rx) = oneshot::channel();

        let started = Instant::now();
        let watchdog = Watchdog::spawn(
            transport.clone(),
            Duration::from_secs(30),
            Duration::from_secs(10),
            move |reason| async move {
                let _ = tx.send((Instant::now(), reason));
            },
        );

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(!watchdog.is_finished());

        transport.set_alive(false);
        let (fired_at, reason) = rx.await.unwrap();
        assert_eq!(fired_at - started, Duration::from_secs(90));
        assert!(reason.contains("not alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_timeout_counts_as_failure() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.stall_liveness(true);
        let (tx, rx) = oneshot::channel();

        let started = Instant::now();
        let _watchdog = Watchdog::spawn(
            transport,
            Duration::from_secs(30),
            Duration::from_secs(10),
            move |reason| async move {
                let _ = tx.send((Instant::now(), reason));
            },
        );

        let (fired_at, reason) = rx.await.unwrap();
        assert_eq!(fired_at - started, Duration::from_secs(40));
        assert!(reason.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_watchdog_never_fires() {
        let transport = Arc::new(LoopbackTransport::new());
        let (tx, mut rx) = oneshot::channel::<String>();

        let watchdog = Watchdog::spawn(
            transport,
            Duration::from_secs(30),
            Duration::from_secs(10),
            move |reason| async move {
                let _ = tx.send(reason);
            },
        );
        watchdog.stop();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }
}

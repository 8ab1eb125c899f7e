//! Background Expiry Janitor
//!
//! Lazy expiry only removes keys that are read again. The janitor covers the
//! rest: a Tokio task that wakes on a fixed interval and purges every expired
//! entry from the store in a single exclusive pass.
//!
//! ```text
//!   tick ──► purge_expired() ──► tick ──► purge_expired() ──► ...
//!                                  ▲
//!          stop() ─── watch ───────┘  (loop exits at the next select)
//! ```
//!
//! A tick that falls behind (a long sweep on a large table) is delayed rather
//! than fired in a burst.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running janitor task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct Janitor {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Janitor {
    /// Spawns the janitor on the current Tokio runtime.
    ///
    /// The first sweep happens one full `interval` after the call. A zero
    /// interval falls back to [`DEFAULT_SWEEP_INTERVAL`].
    pub fn start(store: Arc<Store>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(janitor_loop(store, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Expiry janitor started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Signals the task to exit. Safe to call more than once.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Expiry janitor stopped");
        }
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn janitor_loop(
    store: Arc<Store>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry janitor received shutdown signal");
                    return;
                }
                continue;
            }
        }

        let removed = store.purge_expired();
        if removed > 0 {
            debug!(
                removed = removed,
                keys_remaining = store.count(),
                used_memory = store.memory_usage(),
                "Expired keys purged"
            );
        }
    }
}

impl Store {
    /// Starts a [`Janitor`] sweeping this store every `interval`.
    pub fn start_janitor(self: &Arc<Self>, interval: Duration) -> Janitor {
        Janitor::start(Arc::clone(self), interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_janitor_purges_expired_keys() {
        let store = Arc::new(Store::new());

        for i in 0..10 {
            store.set_ms(Bytes::from(format!("key{}", i)), Bytes::from("value"), 30);
        }
        store.set(Bytes::from("persistent"), Bytes::from("value"), 0);
        assert_eq!(store.count(), 11);

        let _janitor = store.start_janitor(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Purged without any reads
        assert_eq!(store.count(), 1);
        assert!(store.exists(b"persistent"));
        assert_eq!(store.memory_usage(), 5);
        assert_eq!(store.stats().expired_keys, 10);
    }

    #[tokio::test]
    async fn test_janitor_stops_on_drop() {
        let store = Arc::new(Store::new());

        {
            let _janitor = store.start_janitor(Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        store.set_ms(Bytes::from("key"), Bytes::from("value"), 10);
        tokio::time::sleep(Duration::from_millis(80)).await;

        // No sweep happened, the entry is still physically present
        assert!(store.exists(b"key"));
        assert!(store.get(b"key").is_none());
        assert!(!store.exists(b"key"));
    }

    #[tokio::test]
    async fn test_janitor_shutdown_joins_task() {
        let store = Arc::new(Store::new());
        let janitor = store.start_janitor(Duration::from_millis(10));
        assert!(!janitor.is_finished());

        tokio::time::timeout(Duration::from_secs(1), janitor.shutdown())
            .await
            .expect("janitor did not exit");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(Store::new());
        let janitor = store.start_janitor(Duration::from_millis(10));
        janitor.stop();
        janitor.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(janitor.is_finished());
    }

    #[tokio::test]
    async fn test_zero_interval_uses_default() {
        let store = Arc::new(Store::new());
        store.set_ms(Bytes::from("key"), Bytes::from("value"), 1);

        let janitor = store.start_janitor(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Default interval has not elapsed yet
        assert!(store.exists(b"key"));
        janitor.shutdown().await;
    }
}

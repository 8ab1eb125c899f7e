//! TCP Server
//!
//! Owns the listening socket, the shared store and counters, and the
//! admission gate. Each accepted socket either gets a slot and its own
//! [`ConnectionHandler`] task, or an immediate error reply and a close.
//!
//! ```text
//!  accept() ──► slot free? ──yes──► spawn ConnectionHandler (holds the slot)
//!                   │
//!                   no
//!                   ▼
//!   "-ERR max number of clients reached", close
//! ```
//!
//! Shutdown stops accepting and stops the janitor. Connections already
//! running are left to finish on their own.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, ConnectionStats};
use crate::protocol::Reply;
use crate::storage::Store;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

/// Reply sent to clients refused by admission control
pub const MAX_CLIENTS_REPLY: &str = "ERR max number of clients reached";

/// Pause after a failed accept, so fd exhaustion does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A bound server, ready to run.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
    /// Admission slots, None when unlimited
    slots: Option<Arc<Semaphore>>,
    started_at: Instant,
}

impl Server {
    /// Binds the listening socket and creates the store with its memory budget.
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        let store = Arc::new(Store::with_max_memory(config.max_memory));
        let slots = config
            .admission_limit()
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Ok(Self {
            listener,
            config,
            store,
            stats: Arc::new(ConnectionStats::new()),
            slots,
            started_at: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serves until `shutdown` completes.
    ///
    /// The janitor runs for as long as this future does. On return the
    /// listener is closed; admitted connections keep running.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let janitor = self.store.start_janitor(self.config.sweep_interval());

        match self.listener.local_addr() {
            Ok(addr) => info!(
                addr = %addr,
                max_connections = self.config.max_connections,
                timeout_secs = self.config.timeout,
                max_memory = self.config.max_memory,
                "Listening"
            ),
            Err(e) => warn!(error = %e, "Listening on unknown address"),
        }

        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
            }
        }

        janitor.shutdown().await;
    }

    /// Serves forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    async fn accept_loop(&self) {
        let commands =
            CommandHandler::with_start_time(self.store(), self.stats(), self.started_at);

        loop {
            let (stream, addr) = next_connection(|| self.listener.accept()).await;

            let permit = match self.admit() {
                Ok(permit) => permit,
                Err(()) => {
                    self.reject(stream, addr);
                    continue;
                }
            };

            let handler = ConnectionHandler::new(stream, addr, commands.clone(), self.stats())
                .with_timeout(self.config.connection_timeout());

            tokio::spawn(async move {
                // Slot is released when the connection ends
                let _permit = permit;
                let _ = handler.run().await;
            });
        }
    }

    /// Takes an admission slot without waiting.
    ///
    /// `Ok(None)` means admission control is off.
    fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.slots {
            None => Ok(None),
            Some(slots) => Arc::clone(slots)
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| ()),
        }
    }

    fn reject(&self, mut stream: TcpStream, addr: SocketAddr) {
        self.stats.connection_rejected();
        warn!(
            client = %addr,
            max_connections = self.config.max_connections,
            "Rejecting connection: max clients reached"
        );

        tokio::spawn(async move {
            let reply = Reply::error(MAX_CLIENTS_REPLY).encode();
            let _ = stream.write_all(&reply).await;
            let _ = stream.shutdown().await;
        });
    }
}

/// Retries `accept` until it yields a connection, sleeping after each error.
async fn next_connection<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

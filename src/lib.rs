//! # ferrokv - A Minimal In-Memory Key-Value Server
//!
//! ferrokv speaks a Redis-compatible wire protocol over TCP and keeps every
//! key in memory. Keys can carry a time-to-live; an optional memory budget
//! caps how much value data `SET` may store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             ferrokv                              │
//! │                                                                  │
//! │  ┌─────────────┐    ┌──────────────┐    ┌────────────────┐       │
//! │  │   Server    │───>│  Connection  │───>│    Command     │       │
//! │  │ (admission) │    │   Handler    │    │    Handler     │       │
//! │  └─────────────┘    └──────┬───────┘    └───────┬────────┘       │
//! │                            │                    │                │
//! │                            ▼                    ▼                │
//! │                     ┌─────────────┐   ┌───────────────────┐      │
//! │                     │  Protocol   │   │      Store        │      │
//! │                     │  (codec)    │   │  RwLock<Table>    │      │
//! │                     └─────────────┘   └─────────▲─────────┘      │
//! │                                                 │                │
//! │                                       ┌─────────┴─────────┐      │
//! │                                       │      Janitor      │      │
//! │                                       │ (background task) │      │
//! │                                       └───────────────────┘      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrokv::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ServerConfig {
//!         max_connections: 1000,
//!         ..Default::default()
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `QUIT`, `INFO [section]`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`, `MGET key [key ...]`
//! - `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `INCR key`
//! - `EXPIRE key seconds`, `PEXPIRE key milliseconds`
//! - `TTL key`, `PTTL key`, `PERSIST key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoding and reply encoding
//! - [`storage`]: the shared store and its expiry janitor
//! - [`commands`]: command dispatch
//! - [`connection`]: per-connection state machine and counters
//! - [`server`]: listener, admission control, shutdown
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! Keys with a TTL are removed in two ways:
//! 1. **Lazy**: `GET` deletes an expired key it runs into
//! 2. **Active**: the janitor purges all expired keys on a fixed interval

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use config::ServerConfig;
pub use connection::{ConnectionError, ConnectionHandler, ConnectionStats};
pub use protocol::{ParseError, Reply, Request, RequestParser};
pub use server::Server;
pub use storage::{Janitor, Store, StoreError, StoreStats};

/// The default port ferrokv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host ferrokv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ferrokv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

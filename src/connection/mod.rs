//! Connection Module
//!
//! Per-connection state machine and the shared connection counters. The
//! listener and admission gate live in [`crate::server`]; each admitted socket
//! is handed to a [`ConnectionHandler`] running in its own Tokio task.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            Server accept loop                │
//! └──────────────────────┬───────────────────────┘
//!                        │ admitted
//!                        ▼ spawn task
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionHandler               │
//! │                                              │
//! │  read bytes ─> decode ─> dispatch ─> reply   │
//! │       ▲                                │     │
//! │       └────────────────────────────────┘     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several requests per read, answered in order
//! - **Read deadline**: optional timeout per request
//! - **Statistics**: shared atomic counters, surfaced through INFO

pub mod handler;

pub use handler::{ConnectionError, ConnectionHandler, ConnectionStats};

//! Command Dispatch Module
//!
//! Receives decoded requests from the connection layer, executes them against
//! the store, and returns the reply to encode.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ RequestParser   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! `PING`, `QUIT`, `SET`, `GET`, `MGET`, `DEL`, `EXISTS`, `INCR`,
//! `EXPIRE`, `PEXPIRE`, `TTL`, `PTTL`, `PERSIST`, `INFO`

pub mod handler;

pub use handler::CommandHandler;

//! Storage Module
//!
//! The shared key-value table with TTLs and byte accounting, plus the
//! background janitor that purges expired entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                    Store                      │
//! │   RwLock<Table>                               │
//! │     entries:     HashMap<Bytes, Entry>        │
//! │     total_bytes: sum of value lengths         │
//! │     max_memory:  budget for try_set (0 = off) │
//! └───────────────────────────────────────────────┘
//!          ▲                          ▲
//!          │ get/set/incr/...         │ purge_expired()
//!   ┌──────┴───────┐          ┌───────┴────────┐
//!   │ connections  │          │    Janitor     │
//!   │ (many tasks) │          │ (one Tokio task)│
//!   └──────────────┘          └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ferrokv::storage::Store;
//! use bytes::Bytes;
//!
//! let store = Store::with_max_memory(8);
//!
//! store.try_set(Bytes::from("session"), Bytes::from("token"), 3600).unwrap();
//! assert!(store.ttl(b"session") > 0);
//!
//! // Would exceed the 8 byte budget
//! assert!(store.try_set(Bytes::from("other"), Bytes::from("token"), 0).is_err());
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, Store, StoreError, StoreResult, StoreStats};
pub use expiry::{Janitor, DEFAULT_SWEEP_INTERVAL};

//! Command Handler Module
//!
//! Turns a decoded [`Request`] into a [`Reply`] by running it against the
//! shared [`Store`].
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [EX seconds | PX milliseconds]` - Set a key
//! - `GET key` - Get a key's value
//! - `MGET key [key ...]` - Get multiple keys
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count keys present
//! - `INCR key` - Increment integer
//!
//! ### Key Commands
//! - `EXPIRE key seconds` - Set expiry
//! - `PEXPIRE key milliseconds` - Set expiry in ms
//! - `TTL key` - Get remaining TTL
//! - `PTTL key` - Get remaining TTL in ms
//! - `PERSIST key` - Remove expiry
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `INFO [section]` - Server information
//! - `QUIT` - Close the connection (answered by the connection layer)
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                CommandHandler                 │
//! │                                               │
//! │  execute(request) ──> dispatch(NAME) ──> cmd_* │
//! │                                      │        │
//! │                                      ▼        │
//! │                                    Store      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Every error here is answered on the connection and leaves it open.

use crate::connection::ConnectionStats;
use crate::protocol::{Reply, Request};
use crate::storage::{Store, StoreError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const SYNTAX_ERROR: &str = "ERR syntax error";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

/// Dispatches requests to command implementations.
///
/// Cheap to clone; each connection gets its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
    /// Shared connection counters for INFO
    stats: Arc<ConnectionStats>,
    /// Server start time for INFO
    started_at: Instant,
}

impl CommandHandler {
    /// Creates a command handler whose uptime starts now.
    pub fn new(store: Arc<Store>, stats: Arc<ConnectionStats>) -> Self {
        Self::with_start_time(store, stats, Instant::now())
    }

    /// Creates a command handler that reports uptime since `started_at`.
    pub fn with_start_time(
        store: Arc<Store>,
        stats: Arc<ConnectionStats>,
        started_at: Instant,
    ) -> Self {
        Self {
            store,
            stats,
            started_at,
        }
    }

    /// Executes a request and returns the reply.
    pub fn execute(&self, request: Request) -> Reply {
        let name = request.command();
        self.dispatch(&name, &request.args)
    }

    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> Reply {
        match cmd {
            // String commands
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "MGET" => self.cmd_mget(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "INCR" => self.cmd_incr(args),

            // Key commands
            "EXPIRE" => self.cmd_expire(args),
            "PEXPIRE" => self.cmd_pexpire(args),
            "TTL" => self.cmd_ttl(args),
            "PTTL" => self.cmd_pttl(args),
            "PERSIST" => self.cmd_persist(args),

            // Server commands
            "PING" => self.cmd_ping(args),
            "INFO" => self.cmd_info(args),
            "QUIT" => Reply::ok(),

            _ => {
                debug!(command = %cmd, "Unknown command");
                Reply::error("ERR unknown command")
            }
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    fn wrong_args(cmd: &str) -> Reply {
        Reply::error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd
        ))
    }

    fn store_error(err: StoreError) -> Reply {
        Reply::error(format!("ERR {}", err))
    }

    /// Parses a base-10 signed integer argument.
    fn get_integer(value: &[u8]) -> Option<i64> {
        std::str::from_utf8(value).ok()?.parse().ok()
    }

    fn to_uppercase(value: &[u8]) -> String {
        String::from_utf8_lossy(value).to_uppercase()
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> Reply {
        if args.len() < 2 {
            return Self::wrong_args("SET");
        }

        let key = args[0].clone();
        let value = args[1].clone();

        // (amount, is_millis)
        let mut ttl: Option<(u64, bool)> = None;

        let mut i = 2;
        while i < args.len() {
            let millis = match Self::to_uppercase(&args[i]).as_str() {
                "EX" => false,
                "PX" => true,
                _ => return Reply::error(SYNTAX_ERROR),
            };
            if ttl.is_some() {
                return Reply::error(SYNTAX_ERROR);
            }

            i += 1;
            let raw = match args.get(i) {
                Some(raw) => raw,
                None => return Reply::error(SYNTAX_ERROR),
            };
            let amount = match Self::get_integer(raw) {
                Some(n) if n > 0 => n as u64,
                Some(_) => return Reply::error("ERR invalid expire time in 'SET' command"),
                None => return Reply::error(NOT_AN_INTEGER),
            };
            ttl = Some((amount, millis));
            i += 1;
        }

        let result = match ttl {
            None => self.store.try_set(key, value, 0),
            Some((secs, false)) => self.store.try_set(key, value, secs),
            Some((ms, true)) => self.store.try_set_ms(key, value, ms),
        };

        match result {
            Ok(()) => Reply::ok(),
            Err(e) => Self::store_error(e),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> Reply {
        if args.len() != 1 {
            return Self::wrong_args("GET");
        }
        Reply::bulk_or_nil(self.store.get(&args[0]))
    }

    /// MGET key [key ...]
    fn cmd_mget(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return Self::wrong_args("MGET");
        }
        Reply::array(args.iter().map(|key| self.store.get(key)).collect())
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return Self::wrong_args("DEL");
        }
        let removed = args.iter().filter(|key| self.store.delete(key)).count();
        Reply::integer(removed as i64)
    }

    /// EXISTS key [key ...]
    ///
    /// A key named twice is counted twice.
    fn cmd_exists(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return Self::wrong_args("EXISTS");
        }
        let present = args.iter().filter(|key| self.store.exists(key)).count();
        Reply::integer(present as i64)
    }

    /// INCR key
    fn cmd_incr(&self, args: &[Bytes]) -> Reply {
        if args.len() != 1 {
            return Self::wrong_args("INCR");
        }
        match self.store.incr_by(args[0].clone(), 1) {
            Ok(n) => Reply::integer(n),
            Err(e) => Self::store_error(e),
        }
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// EXPIRE key seconds
    fn cmd_expire(&self, args: &[Bytes]) -> Reply {
        if args.len() != 2 {
            return Self::wrong_args("EXPIRE");
        }
        match Self::get_integer(&args[1]) {
            Some(secs) => Reply::integer(self.store.expire(&args[0], secs) as i64),
            None => Reply::error(NOT_AN_INTEGER),
        }
    }

    /// PEXPIRE key milliseconds
    fn cmd_pexpire(&self, args: &[Bytes]) -> Reply {
        if args.len() != 2 {
            return Self::wrong_args("PEXPIRE");
        }
        match Self::get_integer(&args[1]) {
            Some(ms) => Reply::integer(self.store.pexpire(&args[0], ms) as i64),
            None => Reply::error(NOT_AN_INTEGER),
        }
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes]) -> Reply {
        if args.len() != 1 {
            return Self::wrong_args("TTL");
        }
        Reply::integer(self.store.ttl(&args[0]))
    }

    /// PTTL key
    fn cmd_pttl(&self, args: &[Bytes]) -> Reply {
        if args.len() != 1 {
            return Self::wrong_args("PTTL");
        }
        Reply::integer(self.store.pttl(&args[0]))
    }

    /// PERSIST key
    fn cmd_persist(&self, args: &[Bytes]) -> Reply {
        if args.len() != 1 {
            return Self::wrong_args("PERSIST");
        }
        Reply::integer(self.store.persist(&args[0]) as i64)
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> Reply {
        match args {
            [] => Reply::pong(),
            [message] => Reply::bulk(message.clone()),
            _ => Self::wrong_args("PING"),
        }
    }

    /// INFO [section]
    fn cmd_info(&self, args: &[Bytes]) -> Reply {
        let section = match args {
            [] => None,
            [section] => Some(String::from_utf8_lossy(section).to_lowercase()),
            _ => return Self::wrong_args("INFO"),
        };

        let store = self.store.stats();
        let sections = [
            (
                "server",
                format!(
                    "# Server\r\nferrokv_version:{}\r\nuptime_in_seconds:{}\r\n",
                    crate::VERSION,
                    self.started_at.elapsed().as_secs()
                ),
            ),
            (
                "clients",
                format!(
                    "# Clients\r\nconnected_clients:{}\r\n",
                    self.stats.connected_clients()
                ),
            ),
            (
                "memory",
                format!(
                    "# Memory\r\nused_memory:{}\r\nmaxmemory:{}\r\n",
                    store.used_memory, store.max_memory
                ),
            ),
            (
                "keyspace",
                format!(
                    "# Keyspace\r\nkeys:{}\r\nexpired_keys:{}\r\n",
                    store.keys, store.expired_keys
                ),
            ),
        ];

        let wanted = |name: &str| match section.as_deref() {
            None | Some("all") | Some("default") | Some("everything") => true,
            Some(s) => s == name,
        };

        let info = sections
            .iter()
            .filter(|(name, _)| wanted(name))
            .map(|(_, body)| body.as_str())
            .collect::<Vec<_>>()
            .join("\r\n");

        Reply::bulk(Bytes::from(info))
    }
}

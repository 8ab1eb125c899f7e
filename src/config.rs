//! Server configuration, parsed from the command line.

use clap::Parser;
use std::time::Duration;

/// Runtime configuration for the server.
///
/// Every limit uses `0` to mean "off".
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "ferrokv", about = "A minimal in-memory key-value server", version)]
pub struct ServerConfig {
    /// Host to bind to
    #[arg(long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_connections: usize,

    /// Seconds to wait for each request before closing the connection (0 = never)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Memory budget for SET in bytes (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_memory: usize,

    /// Milliseconds between expiry sweeps
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            max_connections: 0,
            timeout: 0,
            max_memory: 0,
            sweep_interval_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-request read deadline, `None` when disabled.
    pub fn connection_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Admission slot count, `None` when unlimited.
    pub fn admission_limit(&self) -> Option<usize> {
        (self.max_connections > 0).then_some(self.max_connections)
    }
}

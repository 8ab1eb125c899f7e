//! Connection Handler Module
//!
//! Drives one admitted client connection from its first byte to close.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            │                                              │
//!            ▼                                              │
//!   ┌─────────────────┐  request   ┌──────────────┐  reply  ┌┴────────────┐
//!   │     READING     │──────────>│ DISPATCHING  │────────>│   WRITING   │
//!   │ (deadline armed)│            └──────────────┘         └─────────────┘
//!   └────────┬────────┘
//!            │
//!            ├── clean EOF ─────────────────────> CLOSED
//!            ├── QUIT ────────> +OK ────────────> CLOSED
//!            ├── deadline ────> -ERR timed out ─> CLOSED
//!            └── bad framing ─> -ERR Protocol ──> CLOSED
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` until the parser can decode a full
//! request. One read may carry several pipelined requests; all of them are
//! answered before the socket is read again. Replies are written into a
//! `BufWriter` and flushed whenever the handler is about to wait for input.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, Reply, Request, RequestParser};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Reply sent when a client sends nothing before its deadline
pub const TIMEOUT_REPLY: &str = "ERR connection timed out";

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections admitted
    pub connections_accepted: AtomicU64,
    /// Connections turned away by admission control
    pub connections_rejected: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Number of connected clients, as reported by INFO.
    pub fn connected_clients(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request bytes
    #[error("Protocol error: {0}")]
    Parse(#[from] ParseError),

    /// No complete request arrived before the deadline
    #[error("connection timed out")]
    Timeout,

    /// Stream closed in the middle of a request
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

impl ConnectionError {
    /// The reply sent to the client before closing, if any.
    fn reply(&self) -> Option<Reply> {
        match self {
            ConnectionError::Io(_) => None,
            ConnectionError::Timeout => Some(Reply::error(TIMEOUT_REPLY)),
            ConnectionError::Parse(e) => Some(Reply::error(format!("ERR Protocol error: {}", e))),
            ConnectionError::UnexpectedEof => {
                Some(Reply::error("ERR Protocol error: unexpected end of stream"))
            }
        }
    }
}

/// Handles a single client connection.
///
/// Generic over the transport so it runs on a `TcpStream` in the server and on
/// an in-memory mock in tests.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    command_handler: CommandHandler,

    parser: RequestParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Deadline for each request, None = wait forever
    timeout: Option<Duration>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a handler for an admitted connection and counts it as active.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RequestParser::new(),
            stats,
            timeout: None,
        }
    }

    /// Sets the per-request read deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the connection until the client leaves or an error closes it.
    ///
    /// The active connection count is decremented on every exit path.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e @ ConnectionError::Io(_)) => {
                debug!(client = %self.addr, error = %e, "Connection closed on I/O error")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Closing connection"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read-dispatch-write loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let request = match self.read_request().await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(e) => {
                    if let Some(reply) = e.reply() {
                        // The peer may already be gone
                        let _ = self.send_reply(&reply).await;
                        let _ = self.stream.flush().await;
                    }
                    return Err(e);
                }
            };

            if request.command() == "QUIT" {
                self.send_reply(&Reply::ok()).await?;
                self.stream.flush().await?;
                return Ok(());
            }

            let reply = self.command_handler.execute(request);
            self.stats.command_processed();
            self.send_reply(&reply).await?;
        }
    }

    /// Returns the next request, or `None` on a clean end of input.
    ///
    /// Pending replies are flushed before waiting on the socket. The deadline
    /// covers the whole wait for one request.
    async fn read_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        if let Some(request) = self.try_parse_request()? {
            return Ok(Some(request));
        }

        self.stream.flush().await?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.fill_until_request())
                .await
                .map_err(|_| ConnectionError::Timeout)?,
            None => self.fill_until_request().await,
        }
    }

    async fn fill_until_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        loop {
            if self.read_more_data().await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ConnectionError::UnexpectedEof)
                };
            }

            if let Some(request) = self.try_parse_request()? {
                return Ok(Some(request));
            }
        }
    }

    /// Attempts to decode one request from the buffer, consuming its bytes.
    fn try_parse_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let buffered = self.buffer.len();
        match self.parser.decode(&mut self.buffer)? {
            Some(request) => {
                let consumed = buffered - self.buffer.len();
                trace!(
                    client = %self.addr,
                    command = %request.name,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = buffered,
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the socket into the buffer. Returns the byte count.
    async fn read_more_data(&mut self) -> Result<usize, ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n > 0 {
            self.stats.bytes_read(n);
            trace!(client = %self.addr, bytes = n, "Read data");
        }
        Ok(n)
    }

    /// Writes an encoded reply into the outgoing buffer.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.encode();
        self.stream.write_all(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Queued reply");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use bytes::Bytes;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn handler_parts() -> (CommandHandler, Arc<Store>, Arc<ConnectionStats>) {
        let store = Arc::new(Store::new());
        let stats = Arc::new(ConnectionStats::new());
        let commands = CommandHandler::new(Arc::clone(&store), Arc::clone(&stats));
        (commands, store, stats)
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (commands, _, stats) = handler_parts();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::clone(&stats))
            .run()
            .await
            .unwrap();

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let (commands, store, _) = handler_parts();
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .write(b"+OK\r\n$2\r\nv1\r\n$-1\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::new(ConnectionStats::new()))
            .run()
            .await
            .unwrap();

        assert!(store.exists(b"k1"));
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let (commands, _, _) = handler_parts();
        let mock = Builder::new()
            .read(b"*2\r\n$4\r\nPI")
            .read(b"NG\r\n$5\r\nhel")
            .read(b"lo\r\n")
            .write(b"$5\r\nhello\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::new(ConnectionStats::new()))
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_large_request_across_many_reads() {
        let (commands, store, _) = handler_parts();
        store.set(Bytes::from("key:0"), Bytes::from("a"), 0);
        store.set(Bytes::from("key:9999"), Bytes::from("b"), 0);

        let keys = 10_000;
        let mut frame = format!("*{}\r\n$3\r\nDEL\r\n", keys + 1).into_bytes();
        for i in 0..keys {
            let key = format!("key:{}", i);
            frame.extend_from_slice(format!("${}\r\n{}\r\n", key.len(), key).as_bytes());
        }

        let mut builder = Builder::new();
        for chunk in frame.chunks(4096) {
            builder.read(chunk);
        }
        let mock = builder.write(b":2\r\n").build();

        ConnectionHandler::new(mock, peer(), commands, Arc::new(ConnectionStats::new()))
            .run()
            .await
            .unwrap();

        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_inline_request() {
        let (commands, _, _) = handler_parts();
        let mock = Builder::new()
            .read(b"SET name ferro\r\nGET name\n")
            .write(b"+OK\r\n$5\r\nferro\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::new(ConnectionStats::new()))
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quit_acknowledges_and_closes() {
        let (commands, store, stats) = handler_parts();
        // Anything after QUIT is never executed
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nquit\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .write(b"+OK\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::clone(&stats))
            .run()
            .await
            .unwrap();

        assert!(!store.exists(b"k"));
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_protocol_error_replies_then_closes() {
        let (commands, _, stats) = handler_parts();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*-1\r\n")
            .write(b"+PONG\r\n-ERR Protocol error: invalid multibulk length: -1\r\n")
            .build();

        let result = ConnectionHandler::new(mock, peer(), commands, Arc::clone(&stats))
            .run()
            .await;

        assert!(matches!(
            result,
            Err(ConnectionError::Parse(ParseError::InvalidMultibulkLength(-1)))
        ));
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_eof_mid_request_is_a_protocol_error() {
        let (commands, _, _) = handler_parts();
        let mock = Builder::new()
            .read(b"*2\r\n$3\r\nGET\r\n")
            .write(b"-ERR Protocol error: unexpected end of stream\r\n")
            .build();

        let result =
            ConnectionHandler::new(mock, peer(), commands, Arc::new(ConnectionStats::new()))
                .run()
                .await;

        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_command_errors_keep_connection_open() {
        let (commands, _, _) = handler_parts();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nNOPE\r\n*1\r\n$3\r\nGET\r\n*1\r\n$4\r\nPING\r\n")
            .write(b"-ERR unknown command\r\n")
            .write(b"-ERR wrong number of arguments for 'GET' command\r\n")
            .write(b"+PONG\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::new(ConnectionStats::new()))
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_byte_counters() {
        let (commands, _, stats) = handler_parts();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        ConnectionHandler::new(mock, peer(), commands, Arc::clone(&stats))
            .run()
            .await
            .unwrap();

        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 14);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);
    }
}

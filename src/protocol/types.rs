//! Reply Values and Wire Encoding
//!
//! Every response the server sends is one of five RESP shapes:
//!
//! - `+` Simple status, e.g. `+OK\r\n`
//! - `-` Error, e.g. `-ERR unknown command\r\n`
//! - `:` Integer, e.g. `:1000\r\n`
//! - `$` Bulk string, e.g. `$5\r\nhello\r\n`, or the nil bulk `$-1\r\n`
//! - `*` Array of bulk-or-nil elements, e.g. `*2\r\n$1\r\na\r\n$-1\r\n`
//!
//! Encoding never fails and performs no I/O; the connection layer writes the
//! produced bytes.

use bytes::Bytes;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply value sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status line such as `OK` or `PONG`. Must not contain CRLF.
    Status(String),

    /// Error line. By convention starts with an upper-case code like `ERR`.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe bulk string.
    Bulk(Bytes),

    /// The nil bulk string, `$-1\r\n`.
    Nil,

    /// Array whose elements are bulk strings or nil.
    Array(Vec<Option<Bytes>>),
}

impl Reply {
    /// Creates a status reply.
    ///
    /// # Example
    /// ```
    /// use ferrokv::protocol::Reply;
    /// assert_eq!(Reply::status("OK").encode(), b"+OK\r\n");
    /// ```
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use ferrokv::protocol::Reply;
    /// assert_eq!(Reply::error("ERR syntax error").encode(), b"-ERR syntax error\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Bulk reply for a present value, nil for an absent one.
    pub fn bulk_or_nil(value: Option<Bytes>) -> Self {
        match value {
            Some(data) => Reply::Bulk(data),
            None => Reply::Nil,
        }
    }

    pub fn array(values: Vec<Option<Bytes>>) -> Self {
        Reply::Array(values)
    }

    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Encodes the reply into a freshly allocated buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the wire form of the reply to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => encode_bulk(buf, Some(data)),
            Reply::Nil => encode_bulk(buf, None),
            Reply::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    encode_bulk(buf, value.as_ref());
                }
            }
        }
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

fn encode_bulk(buf: &mut Vec<u8>, data: Option<&Bytes>) {
    buf.push(prefix::BULK_STRING);
    match data {
        Some(data) => {
            buf.extend_from_slice(data.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(data);
            buf.extend_from_slice(CRLF);
        }
        None => {
            buf.extend_from_slice(b"-1");
            buf.extend_from_slice(CRLF);
        }
    }
}

//! Incremental Request Parser
//!
//! Requests arrive in one of two forms:
//!
//! - **Inline**: a single line of whitespace separated tokens, e.g. `SET k v\r\n`.
//! - **Multibulk**: `*<N>\r\n` followed by `N` bulk strings, each `$<len>\r\n<bytes>\r\n`.
//!
//! The parser works on a buffer owned by the caller and returns either:
//! - `Ok(Some((request, consumed)))` - a full request was decoded from the first `consumed` bytes
//! - `Ok(None)` - the buffer holds only part of a request, read more and retry
//! - `Err(ParseError)` - the bytes can never form a valid request
//!
//! Header and inline lines end at `\n`; a `\r` before it is stripped, so
//! LF-only clients (netcat, telnet) are accepted. Bulk payloads must be
//! followed by exactly `\r\n`.

use crate::protocol::types::{prefix, CRLF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors that make a request undecodable. All of them are connection-fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A blank inline line
    #[error("empty inline command")]
    EmptyInline,

    /// A multibulk header announcing zero arguments
    #[error("empty command")]
    EmptyCommand,

    /// A count or length field that is not a decimal integer
    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    /// A negative multibulk count
    #[error("invalid multibulk length: {0}")]
    InvalidMultibulkLength(i64),

    /// A negative bulk length
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// An argument header that does not start with `$`
    #[error("expected '$', got {0:?}")]
    ExpectedBulkHeader(String),

    /// A bulk payload not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingTerminator,

    /// A header or inline line that never terminates
    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// A bulk string or argument count above the configured limit
    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a header or inline line (64 KB)
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum number of arguments in one multibulk request
pub const MAX_MULTIBULK_ARGS: usize = 1024 * 1024;

/// A decoded request: the command name and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command name exactly as sent (case preserved)
    pub name: String,
    /// Arguments after the command name
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// The command name upper-cased, for case-insensitive dispatch.
    pub fn command(&self) -> String {
        self.name.to_ascii_uppercase()
    }
}

/// Decodes requests from a byte buffer.
///
/// [`parse`](Self::parse) is stateless and looks at a borrowed slice.
/// [`decode`](Self::decode) owns the front of a connection's read buffer and
/// remembers how far into a partially received multibulk frame it got, so a
/// large request arriving over many reads is scanned once overall.
///
/// # Example
///
/// ```
/// use ferrokv::protocol::RequestParser;
///
/// let parser = RequestParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (request, consumed) = parser.parse(buf).unwrap().unwrap();
/// assert_eq!(request.name, "GET");
/// assert_eq!(consumed, buf.len());
/// ```
#[derive(Debug, Clone)]
pub struct RequestParser {
    max_bulk_size: usize,
    max_inline_size: usize,
    /// Multibulk frame at the front of the read buffer, partly scanned
    pending: Option<Progress>,
}

/// How far a multibulk frame has been scanned.
///
/// Only offsets are kept; argument bytes are taken once the frame is complete.
#[derive(Debug, Clone)]
struct Progress {
    /// Arguments still to scan
    remaining: usize,
    /// Offset of the next argument header
    pos: usize,
    /// `(start, end)` of each argument payload scanned so far
    spans: Vec<(usize, usize)>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// Creates a parser with the default size limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_BULK_SIZE, MAX_INLINE_SIZE)
    }

    /// Creates a parser with custom size limits.
    pub fn with_limits(max_bulk_size: usize, max_inline_size: usize) -> Self {
        Self {
            max_bulk_size,
            max_inline_size,
            pending: None,
        }
    }

    /// Attempts to decode one request from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        match buf.first() {
            None => Ok(None),
            Some(&prefix::ARRAY) => {
                let mut progress = None;
                let consumed = match self.scan_multibulk(buf, &mut progress)? {
                    Some(consumed) => consumed,
                    None => return Ok(None),
                };
                let spans = progress.map(|p| p.spans).unwrap_or_default();
                let args = spans
                    .iter()
                    .map(|&(start, end)| Bytes::copy_from_slice(&buf[start..end]));
                Ok(Some((build_request(args)?, consumed)))
            }
            Some(_) => self.parse_inline(buf),
        }
    }

    /// Decodes one request from the front of `buf` and removes its bytes.
    ///
    /// Between calls that return `Ok(None)` the buffer may only grow at the
    /// back; scanning resumes where the previous call stopped. Arguments are
    /// slices of the consumed frame, not copies.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ParseResult<Option<Request>> {
        match buf.first() {
            None => Ok(None),
            Some(&prefix::ARRAY) => {
                let mut progress = self.pending.take();
                let consumed = match self.scan_multibulk(&buf[..], &mut progress)? {
                    Some(consumed) => consumed,
                    None => {
                        self.pending = progress;
                        return Ok(None);
                    }
                };
                let spans = progress.map(|p| p.spans).unwrap_or_default();
                let frame = buf.split_to(consumed).freeze();
                let args = spans.iter().map(|&(start, end)| frame.slice(start..end));
                Ok(Some(build_request(args)?))
            }
            Some(_) => match self.parse_inline(&buf[..])? {
                Some((request, consumed)) => {
                    let _ = buf.split_to(consumed);
                    Ok(Some(request))
                }
                None => Ok(None),
            },
        }
    }

    /// Scans `*<N>\r\n($<len>\r\n<data>\r\n){N}`, resuming from `progress`.
    ///
    /// Returns the frame length once every argument is present.
    fn scan_multibulk(
        &self,
        buf: &[u8],
        progress: &mut Option<Progress>,
    ) -> ParseResult<Option<usize>> {
        if progress.is_none() {
            let (header, pos) = match self.read_line(buf, 0)? {
                Some(line) => line,
                None => return Ok(None),
            };

            let count = parse_length(&header[1..])?;
            if count == 0 {
                return Err(ParseError::EmptyCommand);
            }
            if count < 0 {
                return Err(ParseError::InvalidMultibulkLength(count));
            }
            let count = count as usize;
            if count > MAX_MULTIBULK_ARGS {
                return Err(ParseError::MessageTooLarge {
                    size: count,
                    max: MAX_MULTIBULK_ARGS,
                });
            }

            *progress = Some(Progress {
                remaining: count,
                pos,
                spans: Vec::with_capacity(count.min(64)),
            });
        }

        let state = match progress.as_mut() {
            Some(state) => state,
            None => return Ok(None),
        };

        while state.remaining > 0 {
            let (line, data_start) = match self.read_line(buf, state.pos)? {
                Some(line) => line,
                None => return Ok(None),
            };

            if line.first() != Some(&prefix::BULK_STRING) {
                return Err(ParseError::ExpectedBulkHeader(
                    String::from_utf8_lossy(line).into_owned(),
                ));
            }

            let length = parse_length(&line[1..])?;
            if length < 0 {
                return Err(ParseError::InvalidBulkLength(length));
            }
            let length = length as usize;
            if length > self.max_bulk_size {
                return Err(ParseError::MessageTooLarge {
                    size: length,
                    max: self.max_bulk_size,
                });
            }

            let data_end = data_start + length;
            if buf.len() < data_end + CRLF.len() {
                return Ok(None);
            }
            if &buf[data_end..data_end + CRLF.len()] != CRLF {
                return Err(ParseError::MissingTerminator);
            }

            state.spans.push((data_start, data_end));
            state.pos = data_end + CRLF.len();
            state.remaining -= 1;
        }

        Ok(Some(state.pos))
    }

    /// Parses a whitespace separated line such as `SET key value\r\n`
    fn parse_inline(&self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let (line, consumed) = match self.read_line(buf, 0)? {
            Some(line) => line,
            None => return Ok(None),
        };

        let mut tokens = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|token| !token.is_empty());

        let name = match tokens.next() {
            Some(token) => String::from_utf8_lossy(token).into_owned(),
            None => return Err(ParseError::EmptyInline),
        };
        let args = tokens.map(Bytes::copy_from_slice).collect();

        Ok(Some((Request::new(name, args), consumed)))
    }

    /// Reads the line starting at `start`.
    ///
    /// Returns the line without its terminator and the offset just past the `\n`.
    fn read_line<'a>(&self, buf: &'a [u8], start: usize) -> ParseResult<Option<(&'a [u8], usize)>> {
        let rest = &buf[start..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line = &rest[..pos];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                if line.len() > self.max_inline_size {
                    return Err(ParseError::LineTooLong {
                        max: self.max_inline_size,
                    });
                }
                Ok(Some((line, start + pos + 1)))
            }
            None if rest.len() > self.max_inline_size => Err(ParseError::LineTooLong {
                max: self.max_inline_size,
            }),
            None => Ok(None),
        }
    }
}

/// Parses a count or length field: an optional `-` followed by ASCII digits.
fn parse_length(digits: &[u8]) -> ParseResult<i64> {
    let invalid = || ParseError::InvalidLength(String::from_utf8_lossy(digits).into_owned());

    let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);
    if magnitude.is_empty() || !magnitude.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(invalid)
}

/// Builds a request from its argument list; the first argument is the name.
fn build_request(mut args: impl Iterator<Item = Bytes>) -> ParseResult<Request> {
    let name = args
        .next()
        .map(|n| String::from_utf8_lossy(&n).into_owned())
        .ok_or(ParseError::EmptyCommand)?;
    Ok(Request::new(name, args.collect()))
}

/// Decodes a single request with the default limits.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    RequestParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<Bytes> {
        values.iter().map(|v| Bytes::from(v.to_string())).collect()
    }

    #[test]
    fn test_parse_inline_ping() {
        let (request, consumed) = parse_request(b"PING\r\n").unwrap().unwrap();
        assert_eq!(request, Request::new("PING", vec![]));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_inline_with_args() {
        let (request, consumed) = parse_request(b"set  key   value\r\n").unwrap().unwrap();
        assert_eq!(request.name, "set");
        assert_eq!(request.command(), "SET");
        assert_eq!(request.args, args(&["key", "value"]));
        assert_eq!(consumed, 18);
    }

    #[test]
    fn test_parse_inline_lf_only() {
        let (request, consumed) = parse_request(b"GET k\n").unwrap().unwrap();
        assert_eq!(request, Request::new("GET", args(&["k"])));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_inline_incomplete() {
        assert!(parse_request(b"GET ke").unwrap().is_none());
    }

    #[test]
    fn test_parse_empty_line_is_error() {
        assert_eq!(parse_request(b"\r\n"), Err(ParseError::EmptyInline));
        assert_eq!(parse_request(b"   \r\n"), Err(ParseError::EmptyInline));
    }

    #[test]
    fn test_parse_multibulk() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let (request, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(request, Request::new("SET", args(&["user:101", "Ariz"])));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_multibulk_incomplete_at_every_split() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        for end in 0..input.len() {
            assert!(
                parse_request(&input[..end]).unwrap().is_none(),
                "prefix of {} bytes should be incomplete",
                end
            );
        }
        assert!(parse_request(input).unwrap().is_some());
    }

    #[test]
    fn test_parse_zero_count_is_error() {
        assert_eq!(parse_request(b"*0\r\n"), Err(ParseError::EmptyCommand));
    }

    #[test]
    fn test_parse_negative_count_is_error() {
        assert_eq!(
            parse_request(b"*-1\r\n"),
            Err(ParseError::InvalidMultibulkLength(-1))
        );
    }

    #[test]
    fn test_parse_non_numeric_count() {
        assert!(matches!(
            parse_request(b"*abc\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_parse_non_numeric_bulk_length() {
        assert!(matches!(
            parse_request(b"*1\r\n$x\r\nPING\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_parse_missing_dollar() {
        assert!(matches!(
            parse_request(b"*1\r\n+PING\r\n"),
            Err(ParseError::ExpectedBulkHeader(_))
        ));
    }

    #[test]
    fn test_parse_negative_bulk_length() {
        assert_eq!(
            parse_request(b"*1\r\n$-1\r\n"),
            Err(ParseError::InvalidBulkLength(-1))
        );
    }

    #[test]
    fn test_parse_bad_terminator() {
        assert_eq!(
            parse_request(b"*1\r\n$4\r\nPINGxx"),
            Err(ParseError::MissingTerminator)
        );
    }

    #[test]
    fn test_parse_pipelined_requests() {
        let input = b"*1\r\n$4\r\nPING\r\nGET k\r\n";
        let (first, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(first.name, "PING");
        assert_eq!(consumed, 14);

        let (second, rest) = parse_request(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second, Request::new("GET", args(&["k"])));
        assert_eq!(consumed + rest, input.len());
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhe\r\no\r\n";
        let (request, _) = parse_request(input).unwrap().unwrap();
        assert_eq!(request.args[1], Bytes::from(&b"he\r\no"[..]));
    }

    #[test]
    fn test_line_too_long() {
        let parser = RequestParser::with_limits(MAX_BULK_SIZE, 8);
        assert_eq!(
            parser.parse(b"GET aaaaaaaaaaaa"),
            Err(ParseError::LineTooLong { max: 8 })
        );
    }

    #[test]
    fn test_bulk_too_large() {
        let parser = RequestParser::with_limits(4, MAX_INLINE_SIZE);
        assert_eq!(
            parser.parse(b"*1\r\n$10\r\n"),
            Err(ParseError::MessageTooLarge { size: 10, max: 4 })
        );
    }

    fn del_frame(keys: usize) -> Vec<u8> {
        let mut frame = format!("*{}\r\n$3\r\nDEL\r\n", keys + 1).into_bytes();
        for i in 0..keys {
            let key = format!("key:{}", i);
            frame.extend_from_slice(format!("${}\r\n{}\r\n", key.len(), key).as_bytes());
        }
        frame
    }

    #[test]
    fn test_length_fields_must_be_plain_digits() {
        for input in [
            &b"*+1\r\n$4\r\nPING\r\n"[..],
            b"* 1\r\n$4\r\nPING\r\n",
            b"*1 \r\n$4\r\nPING\r\n",
            b"*\r\n",
            b"*1\r\n$ 4 \r\nPING\r\n",
            b"*1\r\n$+4\r\nPING\r\n",
            b"*1\r\n$-\r\n",
        ] {
            assert!(
                matches!(parse_request(input), Err(ParseError::InvalidLength(_))),
                "{:?} should be rejected",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_decode_consumes_pipelined_requests() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\nPING\r\n*1\r\n$4\r\nPI"[..]);

        let first = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Request::new("GET", args(&["k"])));

        let second = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, Request::new("PING", vec![]));

        assert!(parser.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"NG\r\n");
        let third = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(third.command(), "PING");
        assert!(buf.is_empty());
        assert!(parser.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_large_frame_in_chunks_resumes_scan() {
        let keys = 50_000;
        let frame = del_frame(keys);
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::new();
        let mut last_pos = 0;
        let mut decoded = None;

        for chunk in frame.chunks(4096) {
            assert!(decoded.is_none(), "request decoded before its last byte");
            buf.extend_from_slice(chunk);
            match parser.decode(&mut buf).unwrap() {
                Some(request) => decoded = Some(request),
                None => {
                    // Scanning picks up where the previous read left off
                    let progress = parser.pending.as_ref().unwrap();
                    assert!(progress.pos >= last_pos);
                    assert_eq!(progress.spans.len() + progress.remaining, keys + 1);
                    last_pos = progress.pos;
                }
            }
        }

        let request = decoded.unwrap();
        assert_eq!(request.command(), "DEL");
        assert_eq!(request.args.len(), keys);
        assert_eq!(request.args[0], Bytes::from("key:0"));
        assert_eq!(request.args[keys - 1], Bytes::from(format!("key:{}", keys - 1)));
        assert!(buf.is_empty());
        assert!(parser.pending.is_none());
    }

    #[test]
    fn test_decode_waiting_on_bulk_payload_keeps_progress() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$10\r\n01234"[..]);

        assert!(parser.decode(&mut buf).unwrap().is_none());
        let progress = parser.pending.as_ref().unwrap();
        assert_eq!(progress.spans.len(), 2);
        assert_eq!(progress.remaining, 1);

        buf.extend_from_slice(b"56789\r\n");
        let request = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request, Request::new("SET", args(&["k", "0123456789"])));
    }

    #[test]
    fn test_decode_error_mid_frame() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n"[..]);
        assert!(parser.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"+k\r\n");
        assert!(matches!(
            parser.decode(&mut buf),
            Err(ParseError::ExpectedBulkHeader(_))
        ));
    }
}

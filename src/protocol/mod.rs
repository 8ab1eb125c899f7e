//! Wire Protocol Codec
//!
//! Stateless decoding of client requests and encoding of replies for the
//! Redis Serialization Protocol (RESP).
//!
//! ## Modules
//!
//! - `types`: The `Reply` enum and its wire encoding
//! - `parser`: Incremental decoder for inline and multibulk requests
//!
//! ## Example
//!
//! ```
//! use ferrokv::protocol::{parse_request, Reply};
//!
//! let (request, consumed) = parse_request(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(request.command(), "GET");
//! assert_eq!(consumed, 23);
//!
//! assert_eq!(Reply::Nil.encode(), b"$-1\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_request, ParseError, ParseResult, Request, RequestParser};
pub use types::Reply;

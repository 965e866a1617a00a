//! Metrics Protocol Implementation
//!
//! This module implements the line-oriented text protocol spoken between the
//! metrics server and its clients.
//!
//! ## Overview
//!
//! Requests are newline-terminated command lines; several lines sent together
//! form one batch and get one response. Responses are a status line, body
//! lines and a blank line. Framing is delimiter-based, never length-prefixed,
//! so neither side may assume one read holds one whole message.
//!
//! ## Modules
//!
//! - `types`: Defines `Command`, `Response` and their wire encoding
//! - `parser`: Request batch parsing and incremental response decoding
//!
//! ## Example
//!
//! ```
//! use metricstore::protocol::{parse_request, parse_response, Command, Response, Row};
//!
//! // Parsing an incoming batch
//! let commands = parse_request("put cpu 0.5 100\nget cpu\n").unwrap();
//! assert_eq!(commands[1], Command::get("cpu"));
//!
//! // Creating and decoding responses
//! let bytes = Response::rows(vec![Row::new("cpu", 0.5, 100)]).serialize();
//! let (response, consumed) = parse_response(&bytes).unwrap().unwrap();
//! assert_eq!(consumed, bytes.len());
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    parse_command, parse_request, parse_response, ParseResult, ProtocolError, MALFORMED_REQUEST,
};
pub use types::{format_value, Command, Response, Row};

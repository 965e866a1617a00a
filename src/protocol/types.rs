//! Metrics Protocol Data Types
//!
//! This module defines the commands and responses exchanged between the
//! metrics client and server, and how they are written to the wire.
//!
//! ## Protocol Format
//!
//! A request is one or more command lines, each terminated by `\n`:
//!
//! - `put <key> <value> <timestamp>`
//! - `get <key>` (`get *` selects every key)
//!
//! A response is a status line (`ok` or `error`), zero or more body lines
//! and a blank line, so every response ends with `\n\n`.
//!
//! ## Examples
//!
//! Put: `put cpu 0.5 100\n` -> `ok\n\n`
//! Get: `get cpu\n` -> `ok\ncpu 0.5 100\n\n`
//! Error: `bogus\n` -> `error\nunknown command or malformed request\n\n`

use std::fmt;

/// The line separator used by requests and responses.
pub const LINE_SEP: u8 = b'\n';

/// The sequence that terminates every response.
pub const RESPONSE_TERMINATOR: &[u8] = b"\n\n";

/// Command verbs
pub mod verb {
    pub const PUT: &str = "put";
    pub const GET: &str = "get";
}

/// Response status lines
pub mod status {
    pub const OK: &str = "ok";
    pub const ERROR: &str = "error";
}

/// A parsed command.
///
/// The set of commands is closed: a line that is neither a `put` nor a
/// `get` never becomes a `Command`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Record one sample.
    /// Format: `put <key> <value> <timestamp>`
    Put {
        key: String,
        value: f64,
        timestamp: u64,
    },

    /// Read one key's series, or all of them with `*`.
    /// Format: `get <key>`
    Get { key: String },
}

impl Command {
    /// Creates a put command.
    pub fn put(key: impl Into<String>, value: f64, timestamp: u64) -> Self {
        Command::Put {
            key: key.into(),
            value,
            timestamp,
        }
    }

    /// Creates a get command.
    pub fn get(key: impl Into<String>) -> Self {
        Command::Get { key: key.into() }
    }

    /// Serializes the command as a single request line, including its
    /// trailing newline.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Serializes the command into an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let line = match self {
            Command::Put {
                key,
                value,
                timestamp,
            } => format!("{} {} {} {}", verb::PUT, key, format_value(*value), timestamp),
            Command::Get { key } => format!("{} {}", verb::GET, key),
        };
        buf.extend_from_slice(line.as_bytes());
        buf.push(LINE_SEP);
    }
}

/// One `(key, value, timestamp)` line of a successful response body.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub value: f64,
    pub timestamp: u64,
}

impl Row {
    pub fn new(key: impl Into<String>, value: f64, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.key, format_value(self.value), self.timestamp)
    }
}

/// A complete server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `ok`, followed by one line per row.
    Ok(Vec<Row>),

    /// `error`, followed by a single message line.
    Error(String),
}

impl Response {
    /// An `ok` response with an empty body.
    pub fn ok() -> Self {
        Response::Ok(Vec::new())
    }

    /// An `ok` response carrying rows.
    pub fn rows(rows: Vec<Row>) -> Self {
        Response::Ok(rows)
    }

    /// An `error` response.
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    /// Returns true if this is an error response.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Serializes the response to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the response into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Response::Ok(rows) => {
                buf.extend_from_slice(status::OK.as_bytes());
                buf.push(LINE_SEP);
                for row in rows {
                    buf.extend_from_slice(row.to_string().as_bytes());
                    buf.push(LINE_SEP);
                }
            }
            Response::Error(message) => {
                buf.extend_from_slice(status::ERROR.as_bytes());
                buf.push(LINE_SEP);
                buf.extend_from_slice(message.as_bytes());
                buf.push(LINE_SEP);
            }
        }
        buf.push(LINE_SEP);
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(rows) => write!(f, "ok ({} rows)", rows.len()),
            Response::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Renders a sample value in its shortest form that parses back exactly.
///
/// Whole numbers keep a fractional part (`301.0`, not `301`).
pub fn format_value(value: f64) -> String {
    format!("{:?}", value)
}

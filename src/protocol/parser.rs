//! Request and Response Parser
//!
//! This module turns wire text into [`Command`]s and [`Response`]s.
//!
//! ## Requests
//!
//! The server only parses a request once the connection handler has seen
//! its terminating newline, so [`parse_request`] works on a complete batch:
//! every line is parsed before anything is executed, and the first bad line
//! fails the whole batch.
//!
//! ## Responses
//!
//! Responses arrive on the client in arbitrary chunks. [`parse_response`]
//! follows the incremental convention:
//! - `Ok(Some((response, consumed)))` - A complete response, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the terminating blank line has not arrived
//! - `Err(ProtocolError)` - The bytes cannot be a valid response

use crate::protocol::types::{status, verb, Command, Response, Row, LINE_SEP, RESPONSE_TERMINATOR};
use thiserror::Error;

/// The message sent to the peer for any rejected request.
pub const MALFORMED_REQUEST: &str = "unknown command or malformed request";

/// Errors that can occur while parsing requests or responses.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The verb is neither `put` nor `get`
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// The verb has the wrong number of arguments
    #[error("wrong number of arguments for '{verb}': expected {expected}, got {got}")]
    WrongArity {
        verb: &'static str,
        expected: usize,
        got: usize,
    },

    /// The value is not a floating-point number
    #[error("invalid value: {0:?}")]
    InvalidValue(String),

    /// The timestamp is not a non-negative integer
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Invalid UTF-8 in a response
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// A response that does not follow the status/body/blank-line layout
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ProtocolError>;

impl Command {
    /// Builds a command from the whitespace-separated tokens of one line.
    ///
    /// This is the only place a verb is mapped to a command.
    pub fn from_tokens(tokens: &[&str]) -> ParseResult<Self> {
        let (name, args) = match tokens.split_first() {
            Some(split) => split,
            None => return Err(ProtocolError::UnknownCommand(String::new())),
        };

        match *name {
            verb::PUT => {
                check_arity(verb::PUT, 3, args)?;
                let value = args[1]
                    .parse::<f64>()
                    .map_err(|_| ProtocolError::InvalidValue(args[1].to_string()))?;
                let timestamp = args[2]
                    .parse::<u64>()
                    .map_err(|_| ProtocolError::InvalidTimestamp(args[2].to_string()))?;
                Ok(Command::put(args[0], value, timestamp))
            }
            verb::GET => {
                check_arity(verb::GET, 1, args)?;
                Ok(Command::get(args[0]))
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn check_arity(verb: &'static str, expected: usize, args: &[&str]) -> ParseResult<()> {
    if args.len() != expected {
        return Err(ProtocolError::WrongArity {
            verb,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// Parses one command line.
pub fn parse_command(line: &str) -> ParseResult<Command> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    Command::from_tokens(&tokens)
}

/// Parses a complete request into its batch of commands.
///
/// Blank lines are skipped. Nothing is returned unless every line parses.
pub fn parse_request(request: &str) -> ParseResult<Vec<Command>> {
    request
        .split(LINE_SEP as char)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_command)
        .collect()
}

/// Attempts to parse one response from the buffer.
///
/// # Returns
///
/// - `Ok(Some((response, consumed)))` - Successfully parsed a response
/// - `Ok(None)` - Incomplete data, need more bytes
/// - `Err(e)` - Parse error
pub fn parse_response(buf: &[u8]) -> ParseResult<Option<(Response, usize)>> {
    let end = match find_terminator(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let text = std::str::from_utf8(&buf[..end])
        .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    let consumed = end + RESPONSE_TERMINATOR.len();

    let (status_line, body) = match text.split_once(LINE_SEP as char) {
        Some((status_line, body)) => (status_line, Some(body)),
        None => (text, None),
    };

    let response = match status_line.trim() {
        status::OK => {
            let rows = body
                .into_iter()
                .flat_map(|body| body.split(LINE_SEP as char))
                .map(parse_row)
                .collect::<ParseResult<Vec<Row>>>()?;
            Response::Ok(rows)
        }
        status::ERROR => Response::Error(body.unwrap_or_default().to_string()),
        other => {
            return Err(ProtocolError::MalformedResponse(format!(
                "unknown status line {:?}",
                other
            )))
        }
    };

    Ok(Some((response, consumed)))
}

/// Parses one `<key> <value> <timestamp>` body line.
fn parse_row(line: &str) -> ParseResult<Row> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [key, value, timestamp] => {
            let value = value
                .parse::<f64>()
                .map_err(|_| ProtocolError::InvalidValue(value.to_string()))?;
            let timestamp = timestamp
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidTimestamp(timestamp.to_string()))?;
            Ok(Row::new(*key, value, timestamp))
        }
        _ => Err(ProtocolError::MalformedResponse(format!(
            "expected 3 fields in row {:?}",
            line
        ))),
    }
}

/// Finds the position of the blank-line terminator in the buffer.
#[inline]
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(RESPONSE_TERMINATOR.len())
        .position(|window| window == RESPONSE_TERMINATOR)
}

//! Command Executor
//!
//! Runs parsed commands against the storage engine and shapes their results
//! into a [`Response`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Executor                             │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   parse()   │───>│   apply()   │───>│  format()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                            │                                │
//! │                            ▼                                │
//! │                      StorageEngine                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{parse_request, Command, ProtocolError, Response, Row, MALFORMED_REQUEST};
use crate::storage::{QueryResult, StorageBatch, StorageEngine};
use std::sync::Arc;
use tracing::debug;

/// Dispatches commands to the storage engine.
#[derive(Clone)]
pub struct Executor {
    /// The storage engine
    storage: Arc<StorageEngine>,
}

impl Executor {
    /// Creates a new executor over the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Returns the storage engine this executor writes to.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Runs a single command on its own.
    ///
    /// `put` yields `None`; `get` yields the matching series.
    pub fn run(&self, command: &Command) -> Result<Option<QueryResult>, ProtocolError> {
        dispatch(&mut self.storage.batch(), command)
    }

    /// Runs a batch of commands in order, atomically with respect to other
    /// connections, and builds the combined response.
    pub fn execute(&self, commands: &[Command]) -> Result<Response, ProtocolError> {
        let mut store = self.storage.batch();
        let results = commands
            .iter()
            .map(|command| dispatch(&mut store, command))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(form_response(results))
    }

    /// Parses and executes a complete request.
    ///
    /// Any protocol error turns the whole request into an error response;
    /// in that case no command of the batch has been applied.
    pub fn handle_request(&self, request: &str) -> Response {
        match parse_request(request).and_then(|commands| self.execute(&commands)) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Rejected request");
                Response::error(MALFORMED_REQUEST)
            }
        }
    }
}

/// Routes one command to the storage operation it names.
fn dispatch(
    store: &mut StorageBatch<'_>,
    command: &Command,
) -> Result<Option<QueryResult>, ProtocolError> {
    match command {
        Command::Put {
            key,
            value,
            timestamp,
        } => {
            store.put(key, *value, *timestamp);
            Ok(None)
        }
        Command::Get { key } => Ok(Some(store.get(key))),
    }
}

/// Flattens per-command results into response rows.
///
/// Rows follow command order, then the order keys were first written, then
/// ascending timestamp.
pub fn form_response<I>(results: I) -> Response
where
    I: IntoIterator<Item = Option<QueryResult>>,
{
    let rows = results
        .into_iter()
        .flatten()
        .flat_map(|result| {
            result.into_iter().flat_map(|(key, samples)| {
                samples
                    .into_iter()
                    .map(move |(timestamp, value)| Row::new(key.clone(), value, timestamp))
            })
        })
        .collect();

    Response::rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_response;

    fn create_executor() -> Executor {
        Executor::new(Arc::new(StorageEngine::new()))
    }

    #[test]
    fn test_run_put_then_get() {
        let executor = create_executor();

        let result = executor.run(&Command::put("cpu", 0.5, 100)).unwrap();
        assert!(result.is_none());

        let result = executor.run(&Command::get("cpu")).unwrap().unwrap();
        assert_eq!(result["cpu"], vec![(100, 0.5)]);
    }

    #[test]
    fn test_execute_put_has_no_rows() {
        let executor = create_executor();
        let response = executor.execute(&[Command::put("cpu", 0.5, 100)]).unwrap();
        assert_eq!(response, Response::ok());
    }

    #[test]
    fn test_execute_rows_in_command_order() {
        let executor = create_executor();
        executor.run(&Command::put("mem", 12.0, 101)).unwrap();
        executor.run(&Command::put("cpu", 0.7, 160)).unwrap();
        executor.run(&Command::put("cpu", 0.5, 100)).unwrap();

        let response = executor
            .execute(&[Command::get("mem"), Command::get("cpu")])
            .unwrap();
        assert_eq!(
            response,
            Response::rows(vec![
                Row::new("mem", 12.0, 101),
                Row::new("cpu", 0.5, 100),
                Row::new("cpu", 0.7, 160),
            ])
        );
    }

    #[test]
    fn test_handle_request_scenario() {
        let executor = create_executor();

        for request in ["put test 0.5 1\n", "put test 0.4 2\n", "put load 301 3\n"] {
            assert_eq!(executor.handle_request(request).serialize(), b"ok\n\n");
        }

        assert_eq!(
            executor.handle_request("get test\n").serialize(),
            b"ok\ntest 0.5 1\ntest 0.4 2\n\n"
        );
        assert_eq!(
            executor.handle_request("get *\n").serialize(),
            b"ok\ntest 0.5 1\ntest 0.4 2\nload 301.0 3\n\n"
        );
        assert_eq!(
            executor.handle_request("get key_not_exists\n").serialize(),
            b"ok\n\n"
        );
    }

    #[test]
    fn test_handle_request_batch_sees_earlier_puts() {
        let executor = create_executor();
        let response = executor.handle_request("put a 1 10\nget a\nput a 2 10\nget a\n");
        assert_eq!(response.serialize(), b"ok\na 1.0 10\na 2.0 10\n\n");
    }

    #[test]
    fn test_malformed_request_leaves_storage_unchanged() {
        let executor = create_executor();

        let response = executor.handle_request("put ok_key 1 1\nput only_two_fields\n");
        assert_eq!(
            response.serialize(),
            b"error\nunknown command or malformed request\n\n"
        );
        assert!(executor.storage().is_empty());
    }

    #[test]
    fn test_encoded_batch_survives_the_wire() {
        let executor = create_executor();
        let commands = vec![
            Command::put("sum", 0.1 + 0.2, 1),
            Command::put("big", 1e20, 2),
            Command::put("load", 301.0, 3),
            Command::put("sum", -0.25, 4),
            Command::get("*"),
            Command::get("sum"),
        ];

        let mut request = Vec::new();
        for command in &commands {
            command.encode_into(&mut request);
        }
        let request = String::from_utf8(request).unwrap();

        // Encoding then parsing gives back the exact commands
        let parsed = parse_request(&request).unwrap();
        assert_eq!(parsed, commands);

        let response = executor.execute(&parsed).unwrap();
        let serialized = response.serialize();
        assert_eq!(
            serialized,
            b"ok\n\
              sum 0.30000000000000004 1\nsum -0.25 4\n\
              big 1e20 2\n\
              load 301.0 3\n\
              sum 0.30000000000000004 1\nsum -0.25 4\n\n"
        );

        let (decoded, consumed) = parse_response(&serialized).unwrap().unwrap();
        assert_eq!(consumed, serialized.len());
        assert_eq!(decoded, response);
        assert_eq!(decoded.serialize(), serialized);

        // The same request against the same data answers identically
        assert_eq!(executor.handle_request(&request).serialize(), serialized);
    }

    #[test]
    fn test_unknown_command() {
        let executor = create_executor();
        let response = executor.handle_request("bogus\n");
        assert_eq!(response, Response::error(MALFORMED_REQUEST));
    }
}

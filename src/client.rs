//! Metrics Client
//!
//! An async client for the metrics server. It speaks the same protocol as
//! the server: one command line per call, then one response read until its
//! terminating blank line.
//!
//! ## Example
//!
//! ```ignore
//! use metricstore::client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:10001", None).await?;
//! client.put("cpu", 0.5, Some(100)).await?;
//!
//! let metrics = client.get("cpu").await?;
//! assert_eq!(metrics["cpu"], vec![(100, 0.5)]);
//!
//! client.close().await?;
//! ```
//!
//! Note that decoded samples are `(timestamp, value)` pairs, while rows on
//! the wire read `key value timestamp`.

use crate::protocol::{parse_response, Command, Response};
use crate::storage::QueryResult;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

/// Errors returned by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection could not be established
    #[error("can't initialize the client: {0}")]
    Connect(#[source] io::Error),

    /// The request could not be written
    #[error("can't send the request: {0}")]
    Send(#[source] io::Error),

    /// The response could not be read
    #[error("can't read the server's response: {0}")]
    Receive(#[source] io::Error),

    /// The connection could not be shut down
    #[error("can't close the connection: {0}")]
    Close(#[source] io::Error),

    /// The server answered with an error status
    #[error("server error: {0}")]
    Server(String),

    /// The server's response did not follow the protocol
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The key is empty or contains whitespace, so it cannot go on the wire
    #[error("invalid metric key: {0:?}")]
    InvalidKey(String),
}

/// A connection to the metrics server.
///
/// Generic over the underlying stream so it can run over anything that
/// reads and writes bytes; [`Client::connect`] produces a TCP client.
///
/// The optional timeout bounds connecting and every single write or read,
/// so a server that stops answering fails the call instead of hanging it.
pub struct Client<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
    timeout: Option<Duration>,
}

impl Client<TcpStream> {
    /// Connects to a metrics server.
    ///
    /// With a `timeout`, gives up if the connection is not established in
    /// time, and later requests give up if the server stalls for that long.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let stream = within(timeout, TcpStream::connect(addr))
            .await
            .map_err(ClientError::Connect)?;

        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        Ok(Self::new(stream).with_timeout(timeout))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(1024),
            timeout: None,
        }
    }

    /// Sets the limit for each write and read of a request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Records a sample. A missing `timestamp` means the current time.
    pub async fn put(
        &mut self,
        key: &str,
        value: f64,
        timestamp: Option<u64>,
    ) -> Result<(), ClientError> {
        check_key(key)?;
        let timestamp = timestamp.unwrap_or_else(unix_now);
        match self.request(&Command::put(key, value, timestamp)).await? {
            Response::Ok(_) => Ok(()),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    /// Fetches the series of `key`, or of every key with `"*"`.
    ///
    /// Keys the server has no samples for are absent from the result.
    pub async fn get(&mut self, key: &str) -> Result<QueryResult, ClientError> {
        check_key(key)?;
        let rows = match self.request(&Command::get(key)).await? {
            Response::Ok(rows) => rows,
            Response::Error(message) => return Err(ClientError::Server(message)),
        };

        let mut result = QueryResult::new();
        for row in rows {
            result
                .entry(row.key)
                .or_default()
                .push((row.timestamp, row.value));
        }
        Ok(result)
    }

    /// Shuts the connection down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await.map_err(ClientError::Close)
    }

    /// Sends one command and waits for its response.
    async fn request(&mut self, command: &Command) -> Result<Response, ClientError> {
        let bytes = command.encode();
        let stream = &mut self.stream;
        within(self.timeout, async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(ClientError::Send)?;
        trace!(bytes = bytes.len(), "Sent request");

        let response = self.read_response().await?;
        debug!(command = ?command, response = %response, "Request complete");
        Ok(response)
    }

    /// Reads until one complete response is buffered.
    async fn read_response(&mut self) -> Result<Response, ClientError> {
        loop {
            match parse_response(&self.buffer) {
                Ok(Some((response, consumed))) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(response);
                }
                Ok(None) => {}
                Err(e) => return Err(ClientError::Protocol(e.to_string())),
            }

            let n = within(self.timeout, self.stream.read_buf(&mut self.buffer))
                .await
                .map_err(ClientError::Receive)?;
            if n == 0 {
                return Err(ClientError::Receive(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before the response was complete",
                )));
            }
        }
    }
}

/// Runs an I/O future, failing with `TimedOut` once `limit` has elapsed.
async fn within<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress within {:?}", limit),
            ))
        }),
        None => fut.await,
    }
}

/// A key must be a single non-empty token to fit in a command line.
fn check_key(key: &str) -> Result<(), ClientError> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(ClientError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Current Unix time in whole seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

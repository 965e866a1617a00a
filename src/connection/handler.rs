//! Connection Handler Module
//!
//! This module handles individual client connections to the metrics server.
//! Each client gets its own handler task that runs in a loop, accumulating
//! request bytes and answering each complete request.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Accumulating            │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Valid UTF-8 ending in   │ │──── no ──> [read more]
//!    │  │ a newline?              │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │ yes           │
//!    │              ▼               │
//!    │      Dispatching             │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Parse + execute batch   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send one response       │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / transport error
//!        │
//!        ▼
//! 5. Handler task ends (Closed)
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol: a request may arrive split over many reads, and
//! a read may end in the middle of a multi-byte character. Bytes accumulate
//! in a `BytesMut` until they decode as text and end with a newline; the
//! whole buffer is then one batch.

use crate::commands::Executor;
use crate::protocol::types::LINE_SEP;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum size of a buffered request (1 MB)
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests answered
    pub requests_processed: AtomicU64,
    /// Requests answered with an error response
    pub protocol_errors: AtomicU64,
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

    pub fn request_processed(&self, failed: bool) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// What the buffered bytes amount to so far.
#[derive(Debug, PartialEq)]
enum Frame<'a> {
    /// A complete request ready for dispatch
    Complete(&'a str),
    /// More bytes are needed
    Partial,
}

/// Checks whether `buf` holds a complete request.
///
/// A trailing incomplete UTF-8 sequence means more bytes may still complete
/// the character. A sequence that can never decode is a transport failure.
fn frame_request(buf: &[u8]) -> Result<Frame<'_>, ConnectionError> {
    match std::str::from_utf8(buf) {
        Ok(text) if text.as_bytes().last() == Some(&LINE_SEP) => Ok(Frame::Complete(text)),
        Ok(_) => Ok(Frame::Partial),
        Err(e) if e.error_len().is_none() => Ok(Frame::Partial),
        Err(_) => Err(ConnectionError::InvalidUtf8),
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, dispatching, and response sending
/// for one connected client.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command executor (shares the storage engine)
    executor: Executor,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `executor` - The executor for running commands
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        executor: Executor,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            executor,
            stats,
        }
    }

    /// Runs the main connection loop.
    ///
    /// Answers requests until the client disconnects or a transport error
    /// occurs. Malformed requests are answered and never end the loop.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The accumulate-dispatch loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if let Some(request) = self.try_take_request()? {
                let response = self.executor.handle_request(&request);
                self.stats.request_processed(response.is_error());
                self.send_response(&response.serialize()).await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Takes the buffered request if it is complete, clearing the buffer.
    fn try_take_request(&mut self) -> Result<Option<String>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match frame_request(&self.buffer)? {
            Frame::Complete(text) => {
                let request = text.to_string();
                self.buffer.clear();
                trace!(client = %self.addr, bytes = request.len(), "Dispatching request");
                Ok(Some(request))
            }
            Frame::Partial => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Check buffer size limit
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial request in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Transport-level errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Request bytes that can never decode as UTF-8
    #[error("request is not valid UTF-8")]
    InvalidUtf8,

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
///
/// # Arguments
///
/// * `stream` - The TCP stream for this connection
/// * `addr` - The client's socket address
/// * `executor` - The executor for running commands
/// * `stats` - Shared connection statistics
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    executor: Executor,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, executor, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let executor = Executor::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, executor, stats));
            }
        });

        (addr, storage, stats)
    }

    /// Reads until a complete response (ending in a blank line) arrives.
    async fn read_response(client: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        while !buf.ends_with(b"\n\n") {
            let n = tokio::time::timeout(
                tokio::time::Duration::from_secs(2),
                client.read(&mut chunk),
            )
            .await
            .expect("timed out waiting for response")
            .unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_frame_request() {
        assert_eq!(frame_request(b"get cpu\n").unwrap(), Frame::Complete("get cpu\n"));
        assert_eq!(frame_request(b"get cpu").unwrap(), Frame::Partial);
        // First byte of a two-byte character
        assert_eq!(frame_request(b"get caf\xc3").unwrap(), Frame::Partial);
        assert!(matches!(
            frame_request(b"get \xff\n"),
            Err(ConnectionError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn test_put_get() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"put cpu 0.5 100\n").await.unwrap();
        assert_eq!(read_response(&mut client).await, "ok\n\n");

        client.write_all(b"get cpu\n").await.unwrap();
        assert_eq!(read_response(&mut client).await, "ok\ncpu 0.5 100\n\n");

        client.write_all(b"put mem 12 101\n").await.unwrap();
        assert_eq!(read_response(&mut client).await, "ok\n\n");

        client.write_all(b"get *\n").await.unwrap();
        assert_eq!(
            read_response(&mut client).await,
            "ok\ncpu 0.5 100\nmem 12.0 101\n\n"
        );
    }

    #[tokio::test]
    async fn test_error_keeps_connection_open() {
        let (addr, storage, stats) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"bogus\n").await.unwrap();
        assert_eq!(
            read_response(&mut client).await,
            "error\nunknown command or malformed request\n\n"
        );

        client.write_all(b"put only_two_fields\n").await.unwrap();
        assert_eq!(
            read_response(&mut client).await,
            "error\nunknown command or malformed request\n\n"
        );
        assert!(storage.is_empty());

        // Same connection still serves requests
        client.write_all(b"put cpu 1 1\n").await.unwrap();
        assert_eq!(read_response(&mut client).await, "ok\n\n");
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // "é" is split between two writes
        let request = "put caf\u{e9} 0.5 1\n".as_bytes();
        let split = request.iter().position(|b| *b == 0xc3).unwrap() + 1;

        client.write_all(&request[..split]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        client.write_all(&request[split..]).await.unwrap();
        assert_eq!(read_response(&mut client).await, "ok\n\n");

        client.write_all(b"get caf\xc3\xa9\n").await.unwrap();
        assert_eq!(read_response(&mut client).await, "ok\ncaf\u{e9} 0.5 1\n\n");
    }

    #[tokio::test]
    async fn test_batch_gets_single_response() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"put test 0.5 1\nput test 0.4 2\nput load 301 3\nget test\nget load\n")
            .await
            .unwrap();

        assert_eq!(
            read_response(&mut client).await,
            "ok\ntest 0.5 1\ntest 0.4 2\nload 301.0 3\n\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_closes_only_that_connection() {
        let (addr, _, _) = create_test_server().await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        let mut good = TcpStream::connect(addr).await.unwrap();

        bad.write_all(b"get \xff\xfe\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(tokio::time::Duration::from_secs(2), bad.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        good.write_all(b"put cpu 1 1\n").await.unwrap();
        assert_eq!(read_response(&mut good).await, "ok\n\n");
    }

    #[tokio::test]
    async fn test_concurrent_connections() {
        let (addr, storage, _) = create_test_server().await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                for ts in 0..25u64 {
                    let request = format!("put key-{} {} {}\n", i, ts, ts);
                    client.write_all(request.as_bytes()).await.unwrap();
                    assert_eq!(read_response(&mut client).await, "ok\n\n");
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let all = storage.get("*");
        assert_eq!(all.len(), 8);
        assert!(all.values().all(|series| series.len() == 25));
    }

    /// Polls `check` until it holds, failing after two seconds.
    async fn wait_for(check: impl Fn() -> bool) {
        tokio::time::timeout(tokio::time::Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        wait_for(|| stats.active_connections.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);

        client.write_all(b"get cpu\n").await.unwrap();
        let _ = read_response(&mut client).await;

        wait_for(|| stats.requests_processed.load(Ordering::Relaxed) == 1).await;
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        wait_for(|| stats.bytes_written.load(Ordering::Relaxed) > 0).await;

        // Close connection
        drop(client);

        wait_for(|| stats.active_connections.load(Ordering::Relaxed) == 0).await;
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
    }
}

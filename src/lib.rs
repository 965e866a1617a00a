//! # metricstore - A Minimal Time-Series Metrics Store
//!
//! metricstore keeps numeric samples per metric key in memory and serves them
//! over a line-oriented text protocol. Clients `put` a `(key, value, timestamp)`
//! sample and `get` the series of one key, or of every key with `*`.
//!
//! ## Features
//!
//! - **Text Protocol**: Human-readable, newline-delimited requests and responses
//! - **Batching**: Several commands in one request get one combined response
//! - **Last-Write-Wins**: One value per timestamp per key
//! - **Async I/O**: Built on Tokio, one task per client connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             metricstore                                 │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Executor   │                  │
//! │  │ (Listener)  │    │  Handler    │    │             │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────┐     │
//! │                     │  Protocol   │    │      StorageEngine       │     │
//! │                     │   Codec     │    │  RwLock<key -> series>   │     │
//! │                     └─────────────┘    └──────────────────────────┘     │
//! │                                                                         │
//! │  ┌─────────────┐                                                        │
//! │  │   Client    │  (same codec, opposite direction)                      │
//! │  └─────────────┘                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use metricstore::connection::ConnectionStats;
//! use metricstore::server::serve;
//! use metricstore::storage::StorageEngine;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new());
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:10001").await.unwrap();
//!     serve(listener, storage, stats).await;
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! ```text
//! request:  "put cpu 0.5 100\n"
//! response: "ok\n\n"
//!
//! request:  "get *\n"
//! response: "ok\ncpu 0.5 100\nmem 12.0 101\n\n"
//!
//! request:  "bogus\n"
//! response: "error\nunknown command or malformed request\n\n"
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Command/response types, request parsing and response decoding
//! - [`storage`]: Thread-safe time-series storage engine
//! - [`commands`]: Executor dispatching commands to storage
//! - [`connection`]: Per-client framing loop
//! - [`server`]: Accept loop
//! - [`client`]: Async client

pub mod client;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::Executor;
pub use connection::{handle_connection, ConnectionError, ConnectionStats};
pub use protocol::{Command, ProtocolError, Response, Row};
pub use server::serve;
pub use storage::{QueryResult, StorageEngine};

/// The default port the server listens on
pub const DEFAULT_PORT: u16 = 10001;

/// The default host the server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of metricstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Storage Engine Module
//!
//! This module provides the in-memory time-series store shared by every
//! client connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │                                                             │
//! │   RwLock ── key ──> Series (timestamp -> value, ordered)    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **Last-Write-Wins**: One value per timestamp per key
//! - **Sorted Reads**: Series come back in ascending timestamp order
//! - **Wildcard Reads**: `get("*")` returns every key
//!
//! ## Example
//!
//! ```
//! use metricstore::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(StorageEngine::new());
//!
//! engine.put("load", 301.0, 3);
//! let result = engine.get("*");
//! assert_eq!(result["load"], vec![(3, 301.0)]);
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::{QueryResult, Series, StorageBatch, StorageEngine, StorageStats, WILDCARD_KEY};

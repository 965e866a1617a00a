//! Command Execution Module
//!
//! This module is the layer between the protocol codec and the storage
//! engine. It receives parsed command batches, applies them to storage and
//! returns the response to send back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Request Parser  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Executor     │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Execute      │
//! │  - Format       │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `put <key> <value> <timestamp>` - Record a sample
//! - `get <key>` - Read one key's series
//! - `get *` - Read every series

pub mod executor;

// Re-export the executor
pub use executor::{form_response, Executor};

//! TCP Accept Loop
//!
//! Accepts connections on an already-bound listener and spawns one
//! [`ConnectionHandler`](crate::connection::ConnectionHandler) task per client.
//! Every task shares the same storage engine and statistics.

use crate::commands::Executor;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::StorageEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;

/// Main loop that accepts incoming connections.
///
/// Runs until the surrounding task is dropped. A failed `accept` is logged
/// and does not stop the loop.
pub async fn serve(listener: TcpListener, storage: Arc<StorageEngine>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                // Create an executor for this connection
                let executor = Executor::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    handle_connection(stream, addr, executor, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

//! Registry of open Build HAT connections.
//!
//! Several motors configured against the same device path must share one
//! physical link. The registry maps each path to a single live
//! [`HatConnection`] and hands out clones of its `Arc`.
//!
//! The registry is an ordinary object: construct one per process (or per
//! test) and pass it to whatever builds motors.

use crate::connection::{ConnectionOptions, HatConnection};
use hat_core::error::HatResult;
use hat_core::serial::SerialOpener;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Device path used when none is configured.
pub const DEFAULT_PATH: &str = "/dev/serial0";

/// Logical name of the connection on [`DEFAULT_PATH`]. Connections on any
/// other path are named after the path.
pub const DEFAULT_CONNECTION_NAME: &str = "hat";

fn connection_name(path: &str) -> &str {
    if path == DEFAULT_PATH {
        DEFAULT_CONNECTION_NAME
    } else {
        path
    }
}

/// One shared [`HatConnection`] per device path.
pub struct ConnectionRegistry {
    opener: Arc<dyn SerialOpener>,
    options: ConnectionOptions,
    connections: Mutex<HashMap<String, Arc<HatConnection>>>,
}

impl ConnectionRegistry {
    /// Empty registry opening ports through `opener`.
    pub fn new(opener: Arc<dyn SerialOpener>, options: ConnectionOptions) -> Self {
        Self {
            opener,
            options,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get the connection for `path`, opening and bootstrapping it on first
    /// use. An empty path means [`DEFAULT_PATH`].
    ///
    /// The registry lock is held across construction, so concurrent first
    /// requests for any path wait for the one in progress and never open a
    /// transport twice. A failed construction leaves nothing behind.
    pub async fn get(&self, path: &str) -> HatResult<Arc<HatConnection>> {
        let path = if path.is_empty() { DEFAULT_PATH } else { path };

        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(path) {
            tracing::debug!(port = path, "Reusing Build HAT connection");
            return Ok(conn.clone());
        }

        let port = self.opener.open(path).await?;
        let conn = Arc::new(
            HatConnection::connect(connection_name(path), path, port, self.options.clone())
                .await?,
        );

        connections.insert(path.to_string(), conn.clone());
        tracing::info!(port = path, "Registered new Build HAT connection");
        Ok(conn)
    }

    /// Existing connection for `path`, if any.
    pub async fn get_existing(&self, path: &str) -> Option<Arc<HatConnection>> {
        let path = if path.is_empty() { DEFAULT_PATH } else { path };
        self.connections.lock().await.get(path).cloned()
    }

    /// Live connection with logical name `name`, for the diagnostic surface.
    pub async fn find_by_name(&self, name: &str) -> Option<Arc<HatConnection>> {
        self.connections
            .lock()
            .await
            .values()
            .find(|conn| conn.name() == name)
            .cloned()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// True when no connection is open.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Close and forget every connection (teardown hook for the owner).
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<HatConnection>)> =
            self.connections.lock().await.drain().collect();
        let count = drained.len();
        for (path, conn) in drained {
            if let Err(e) = conn.close().await {
                tracing::warn!(port = %path, error = %e, "Error closing Build HAT connection");
            }
        }
        tracing::info!(count, "Closed all Build HAT connections");
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

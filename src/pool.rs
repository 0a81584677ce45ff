//! Per-device connection pooling with lazy (re)connect.
//!
//! The pool owns at most one live transport per device key. Handles are
//! created on first use and replaced on demand when the retry controller
//! decides the transport has gone stale. The map itself sits behind a single
//! mutex; each handle carries its own mutex so that at most one wire
//! exchange is in flight per device while operations against different
//! devices proceed independently.

use crate::error::ConnectionError;
use crate::transport::{Connect, DeviceKey, Transport};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A shared handle to one device connection. The mutex serializes wire
/// exchanges on the transport.
pub type ConnectionHandle = Arc<Mutex<Box<dyn Transport>>>;

/// Lazily connecting map of device key to live transport.
pub struct ConnectionPool {
    connector: Arc<dyn Connect>,
    connections: Mutex<HashMap<DeviceKey, ConnectionHandle>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connect>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the existing handle for `key`, connecting first if none is
    /// present. A connection failure leaves no entry behind, so a later call
    /// simply tries again.
    pub async fn get_or_create(&self, key: &DeviceKey) -> Result<ConnectionHandle, ConnectionError> {
        let mut connections = self.connections.lock().await;
        if let Some(handle) = connections.get(key) {
            return Ok(Arc::clone(handle));
        }
        debug!("connecting to device '{key}'");
        let transport = self.connector.connect(key).await?;
        debug!("successfully connected to device '{key}'");
        let handle: ConnectionHandle = Arc::new(Mutex::new(transport));
        connections.insert(key.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Unconditionally discards the handle for `key` and connects anew. The
    /// old transport is closed best-effort before the replacement is opened;
    /// close failures are logged and never propagate.
    pub async fn recreate(&self, key: &DeviceKey) -> Result<ConnectionHandle, ConnectionError> {
        let mut connections = self.connections.lock().await;
        if let Some(old) = connections.remove(key) {
            if let Err(err) = old.lock().await.close().await {
                warn!("failed to close stale connection to '{key}': {err}");
            }
        }
        debug!("reconnecting to device '{key}'");
        let transport = self.connector.connect(key).await?;
        debug!("successfully reconnected to device '{key}'");
        let handle: ConnectionHandle = Arc::new(Mutex::new(transport));
        connections.insert(key.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Closes every pooled connection. Invoked once at engine shutdown;
    /// individual close failures are logged and swallowed.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        for (key, handle) in connections.drain() {
            if let Err(err) = handle.lock().await.close().await {
                warn!("failed to close connection to '{key}': {err}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, key: &DeviceKey) -> bool {
        self.connections.lock().await.contains_key(key)
    }
}

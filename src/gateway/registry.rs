//! gateway/registry.rs
//!
//! Directory of live sessions keyed by `(account, node_id)`. The single
//! source of truth for "is this agent online".

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

use crate::analytics;
use crate::errors::GatewayError;
use crate::shared_types::{ConnectionKey, ConnectionStatus};

use super::connection::{CloseReason, Connection};

// -----------------------------------------------------------------------------
// ----- ConnectionRegistry ----------------------------------------------------

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionKey, Arc<Connection>>>,
}

// -----------------------------------------------------------------------------
// ----- ConnectionRegistry: Static --------------------------------------------

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionRegistry: Public --------------------------------------------

impl ConnectionRegistry {
    /// Install `connection` as the live session for its key. A previous
    /// session for the key is closed (its pending requests fail with
    /// `ConnectionLost`) before the new entry becomes visible, and returned.
    pub fn register(
        &self,
        connection: Arc<Connection>,
    ) -> Result<Option<Arc<Connection>>, GatewayError> {
        let key = connection.key().clone();
        let mut entries = self.entries.write();

        // checked under the write lock so a concurrent close either lands
        // before (and is rejected here) or after (and unregisters us)
        let status = connection.status();
        if status != ConnectionStatus::Active {
            return Err(GatewayError::InvalidState { key, status });
        }

        let evicted = entries.insert(key.clone(), connection.clone());

        if let Some(previous) = &evicted {
            if Arc::ptr_eq(previous, &connection) {
                return Ok(None);
            }

            analytics::inc_connections_evicted();
            info!("{} replaced by {}", previous, connection);
            previous.close(CloseReason::Replaced);
        } else {
            analytics::inc_connections_opened();
        }

        debug!("{} registered ({} live)", connection, entries.len());
        Ok(evicted)
    }

    /// Remove the entry for `key` only if it still points at `connection`.
    pub fn unregister(&self, key: &ConnectionKey, connection: &Connection) -> bool {
        let mut entries = self.entries.write();

        let is_current = entries
            .get(key)
            .is_some_and(|current| current.id() == connection.id());

        if is_current {
            entries.remove(key);
            debug!("{} unregistered ({} live)", connection, entries.len());
        }

        is_current
    }

    pub fn lookup(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Sorted snapshot of registered keys.
    pub fn list(&self) -> Vec<ConnectionKey> {
        let mut keys: Vec<ConnectionKey> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<Arc<Connection>> =
            self.entries.read().values().cloned().collect();
        connections.sort_by(|a, b| a.key().cmp(b.key()));
        connections
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Empty the directory and close every session it held.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut entries = self.entries.write();
            entries.drain().map(|(_, connection)| connection).collect()
        };

        let count = drained.len();
        for connection in drained {
            connection.close(reason);
        }

        count
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

//! Cross-worker connection registry.
//!
//! The connection-population throttling engine (component I) and
//! `/ADMIN/connections_status` (introspection) both need a view of every
//! open connection across every worker, not just the worker that owns it.
//! A single `parking_lot::Mutex`-guarded map is the simplest thing that
//! works: inserts/removes happen once per connection lifetime, and reads
//! (`snapshot`) happen once per 1Hz maintenance tick or admin request, so
//! contention is negligible.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::conn::{ConnectionId, ConnectionSlot};

/// Registry of every connection slot currently open, across all workers.
#[derive(Default)]
pub struct ConnectionRegistry {
    slots: Mutex<HashMap<ConnectionId, Arc<ConnectionSlot>>>,
}

impl ConnectionRegistry {
    /// An empty registry.
    pub fn new() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::default())
    }

    /// Register a newly accepted connection.
    pub fn insert(&self, slot: Arc<ConnectionSlot>) {
        self.slots.lock().insert(slot.id(), slot);
    }

    /// Drop a closed connection.
    pub fn remove(&self, id: ConnectionId) {
        self.slots.lock().remove(&id);
    }

    /// Number of connections currently open, across all workers. Used for
    /// the accept-time connection-population limit checks (§4.6).
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time snapshot of every open connection slot.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionSlot>> {
        self.slots.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_round_trip() {
        let registry = ConnectionRegistry::new();
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        registry.insert(slot.clone());
        assert_eq!(registry.len(), 1);
        registry.remove(slot.id());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_reflects_current_membership() {
        let registry = ConnectionRegistry::new();
        registry.insert(ConnectionSlot::open("10.0.0.1".parse().unwrap(), 1));
        registry.insert(ConnectionSlot::open("10.0.0.2".parse().unwrap(), 2));
        assert_eq!(registry.snapshot().len(), 2);
    }
}

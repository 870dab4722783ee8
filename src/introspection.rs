//! `/ADMIN/connections_status` (spec §6).
//!
//! Lists every open connection's run-time properties, gated behind the
//! admin client allow-list. Connections younger than 10ms are omitted —
//! they cannot yet have meaningful state, and including them only adds
//! noise to an operator's snapshot (the same self-skip the original
//! applies before walking its connection list).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::conn::ConnectionSlot;

/// Minimum connection age before it is included in a snapshot.
pub const SELF_SKIP_AGE: Duration = Duration::from_millis(10);

/// One connection's reported state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Connection id.
    pub id: u64,
    /// Peer IP address.
    pub peer_ip: String,
    /// Worker-wide connection count observed at accept time.
    pub conn_count_at_open: u64,
    /// Requests currently running on this connection.
    pub running: u64,
    /// Requests currently queued on this connection.
    pub backlog: u64,
    /// Total requests ever dispatched on this connection.
    pub total_requests: u64,
    /// Milliseconds since the connection was accepted.
    pub age_ms: u128,
    /// Peer-declared process id, if known.
    pub peer_id: Option<String>,
    /// Peer `User-Agent`, if known.
    pub user_agent: Option<String>,
    /// Whether this connection has ever crossed the soft connection limit.
    pub exceeded_soft_limit: bool,
    /// Whether a later request reported a different `X-Peer-Id` than the
    /// first one observed on this connection.
    pub peer_id_mutated: bool,
}

impl From<&Arc<ConnectionSlot>> for ConnectionStatus {
    fn from(slot: &Arc<ConnectionSlot>) -> Self {
        ConnectionStatus {
            id: slot.id().value(),
            peer_ip: slot.peer_ip().to_string(),
            conn_count_at_open: slot.conn_count_at_open(),
            running: slot.running_count(),
            backlog: slot.backlog_count(),
            total_requests: slot.total_requests(),
            age_ms: slot.age().as_millis(),
            peer_id: slot.peer_id(),
            user_agent: slot.user_agent(),
            exceeded_soft_limit: slot.exceeded_soft_limit(),
            peer_id_mutated: slot.peer_id_mutated(),
        }
    }
}

/// Whether `client_name` is allowed to hit `/ADMIN/*` routes.
pub fn is_admin_client(allowed: &HashSet<String>, client_name: &str) -> bool {
    allowed.contains(client_name)
}

/// Build the connections-status snapshot, skipping connections younger
/// than [`SELF_SKIP_AGE`].
pub fn snapshot(slots: &[Arc<ConnectionSlot>]) -> Vec<ConnectionStatus> {
    slots
        .iter()
        .filter(|slot| slot.age() >= SELF_SKIP_AGE)
        .map(ConnectionStatus::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newborn_connections_are_skipped() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        let snap = snapshot(&[slot]);
        assert!(snap.is_empty());
    }

    #[test]
    fn aged_connections_are_included() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        std::thread::sleep(SELF_SKIP_AGE + Duration::from_millis(2));
        let snap = snapshot(&[slot]);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn admin_allow_list_gate() {
        let allowed: HashSet<String> = ["alice".to_string()].into_iter().collect();
        assert!(is_admin_client(&allowed, "alice"));
        assert!(!is_admin_client(&allowed, "mallory"));
    }
}

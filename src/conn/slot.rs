//! Connection slot data model (spec §3 "ConnectionSlot", component D).
//!
//! Grounded in `SConnectionRunTimeProperties` (`http_connection.hpp`): the
//! per-connection bookkeeping a worker keeps to support admission control,
//! throttling and `/ADMIN/connections_status` introspection.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Process-wide monotonically increasing connection id generator.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id in sequence.
    pub fn next() -> ConnectionId {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, exposed for the introspection endpoint.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Mutable peer identity fields, populated lazily from request headers
/// once the first request on a connection arrives (`peer_id`/`peer_user_agent`
/// start empty and are filled in on first use, per `http_connection.hpp`).
#[derive(Debug, Default, Clone)]
struct PeerIdentity {
    peer_id: Option<String>,
    user_agent: Option<String>,
    mutated: bool,
}

/// Per-connection run-time state tracked by a worker.
///
/// `running`/`backlog` counters and the peer identity fields are behind a
/// `parking_lot::Mutex` because they can be written from the throttling
/// engine running on a different worker (closing another worker's idlest
/// offending connection) as well as from the owning worker's own accept
/// loop.
pub struct ConnectionSlot {
    id: ConnectionId,
    peer_ip: IpAddr,
    opened_at: Instant,
    conn_count_at_open: u64,
    last_request_at: Mutex<Instant>,
    running: AtomicU64,
    backlog: AtomicU64,
    total_requests: AtomicU64,
    exceed_soft_limit: AtomicBool,
    identity: Mutex<PeerIdentity>,
    /// Set by the throttling engine's `CloseThis` decision (§4.7) to tell
    /// this connection's own task to stop serving after its current
    /// request, since the task otherwise has no external handle.
    close_requested: AtomicBool,
    close_notify: Notify,
}

impl ConnectionSlot {
    /// Open a new slot. `conn_count_at_open` is the total connection count
    /// observed by the worker's accept loop at the moment this one opened,
    /// exposed verbatim to `/ADMIN/connections_status` as `GetConnCntAtOpen`.
    pub fn open(peer_ip: IpAddr, conn_count_at_open: u64) -> Arc<ConnectionSlot> {
        let now = Instant::now();
        Arc::new(ConnectionSlot {
            id: ConnectionId::next(),
            peer_ip,
            opened_at: now,
            conn_count_at_open,
            last_request_at: Mutex::new(now),
            running: AtomicU64::new(0),
            backlog: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            exceed_soft_limit: AtomicBool::new(false),
            identity: Mutex::new(PeerIdentity::default()),
            close_requested: AtomicBool::new(false),
            close_notify: Notify::new(),
        })
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer IP captured at accept time.
    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    /// When the connection was accepted.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Worker-wide connection count observed when this slot opened.
    pub fn conn_count_at_open(&self) -> u64 {
        self.conn_count_at_open
    }

    /// Age since accept, used by the self-skip rule on
    /// `/ADMIN/connections_status` (connections younger than 10ms are
    /// omitted because they cannot yet have meaningful state).
    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }

    /// Time since the last request was dispatched on this connection.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_request_at.lock().elapsed()
    }

    /// Record that a request just started on this connection.
    pub fn touch(&self) {
        *self.last_request_at.lock() = Instant::now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of requests currently executing on this connection.
    pub fn running_count(&self) -> u64 {
        self.running.load(Ordering::Relaxed)
    }

    /// Number of requests currently queued in this connection's backlog.
    pub fn backlog_count(&self) -> u64 {
        self.backlog.load(Ordering::Relaxed)
    }

    /// Total requests ever dispatched on this connection.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Increment the running-request counter; returns the new value.
    pub fn inc_running(&self) -> u64 {
        self.running.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the running-request counter; returns the new value.
    pub fn dec_running(&self) -> u64 {
        self.running.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Increment the backlog counter; returns the new value.
    pub fn inc_backlog(&self) -> u64 {
        self.backlog.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the backlog counter; returns the new value.
    pub fn dec_backlog(&self) -> u64 {
        self.backlog.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Mark that this connection has crossed the soft connection-population
    /// limit at least once (`exceed_soft_limit_flag`); sticky until close.
    pub fn mark_exceeded_soft_limit(&self) {
        self.exceed_soft_limit.store(true, Ordering::Relaxed);
    }

    /// Whether this connection has ever exceeded the soft limit.
    pub fn exceeded_soft_limit(&self) -> bool {
        self.exceed_soft_limit.load(Ordering::Relaxed)
    }

    /// Learn the peer-declared process id from a request's `X-Peer-Id`
    /// header. The first value observed is adopted as-is; a later,
    /// *different* value conflicts with it, so the id is cleared and the
    /// connection is flagged `mutated` rather than silently keeping the
    /// first value, matching `UpdatePeerId`'s conflict handling.
    pub fn set_peer_id_if_unset(&self, peer_id: Option<String>) {
        let Some(peer_id) = peer_id else { return };
        let mut identity = self.identity.lock();
        match &identity.peer_id {
            None => identity.peer_id = Some(peer_id),
            Some(existing) if *existing != peer_id => {
                identity.peer_id = None;
                identity.mutated = true;
            }
            Some(_) => {}
        }
    }

    /// The peer-declared process id, if one was ever observed and it has
    /// not since conflicted with a different value.
    pub fn peer_id(&self) -> Option<String> {
        self.identity.lock().peer_id.clone()
    }

    /// Whether a later request reported a different `X-Peer-Id` than the
    /// first one this connection observed.
    pub fn peer_id_mutated(&self) -> bool {
        self.identity.lock().mutated
    }

    /// Learn the peer's `User-Agent` from the first request.
    pub fn set_user_agent_if_unset(&self, user_agent: Option<String>) {
        let mut identity = self.identity.lock();
        if identity.user_agent.is_none() {
            identity.user_agent = user_agent;
        }
    }

    /// The peer's declared `User-Agent`, if one was ever observed.
    pub fn user_agent(&self) -> Option<String> {
        self.identity.lock().user_agent.clone()
    }

    /// Peer /16 "site" key used by the throttling engine's by-site bucket
    /// (only meaningful for IPv4 peers; IPv6 peers are bucketed by full
    /// address since the source only ever throttled IPv4 NetStorage/PSG
    /// clients by /16).
    pub fn peer_site_key(&self) -> IpAddr {
        match self.peer_ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                IpAddr::V4(std::net::Ipv4Addr::new(octets[0], octets[1], 0, 0))
            }
            IpAddr::V6(_) => self.peer_ip,
        }
    }

    /// Ask this connection's task to stop serving after its current
    /// request. Called by the throttling engine's `CloseThis` decision.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    /// Whether [`Self::request_close`] has been called.
    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Resolve once [`Self::request_close`] has been called.
    pub async fn wait_close_requested(&self) {
        if self.is_close_requested() {
            return;
        }
        self.close_notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_increasing() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b.value() > a.value());
    }

    #[test]
    fn peer_id_sticks_when_every_request_agrees() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        slot.set_peer_id_if_unset(Some("pid-1".into()));
        slot.set_peer_id_if_unset(Some("pid-1".into()));
        assert_eq!(slot.peer_id().as_deref(), Some("pid-1"));
        assert!(!slot.peer_id_mutated());
    }

    #[test]
    fn conflicting_peer_id_clears_it_and_marks_mutated() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        slot.set_peer_id_if_unset(Some("pid-1".into()));
        slot.set_peer_id_if_unset(Some("pid-2".into()));
        assert_eq!(slot.peer_id(), None);
        assert!(slot.peer_id_mutated());
    }

    #[tokio::test]
    async fn wait_close_requested_resolves_after_request_close() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        assert!(!slot.is_close_requested());
        slot.request_close();
        slot.wait_close_requested().await;
    }

    #[test]
    fn running_and_backlog_counters_round_trip() {
        let slot = ConnectionSlot::open("10.0.0.1".parse().unwrap(), 0);
        assert_eq!(slot.inc_running(), 1);
        assert_eq!(slot.inc_running(), 2);
        assert_eq!(slot.dec_running(), 1);
        assert_eq!(slot.inc_backlog(), 1);
        assert_eq!(slot.dec_backlog(), 0);
    }

    #[test]
    fn site_key_masks_to_slash_16() {
        let slot = ConnectionSlot::open("203.0.113.42".parse().unwrap(), 0);
        assert_eq!(slot.peer_site_key(), "203.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn soft_limit_flag_is_sticky() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 0);
        assert!(!slot.exceeded_soft_limit());
        slot.mark_exceeded_soft_limit();
        assert!(slot.exceeded_soft_limit());
    }
}

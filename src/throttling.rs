//! Connection-population throttling engine (component I, spec §4.7).
//!
//! Grounded in `throttling.cpp`/`throttling.hpp`: periodically snapshot
//! every worker's connections, bucket them by peer IP / peer `/16` site /
//! peer-declared process id / peer user-agent, and when the total
//! connection count crosses `conn_throttle_threshold`, close the idlest
//! connection in whichever bucket is over its per-attribute limit.
//!
//! The snapshot/timestamp/in-progress triple is guarded by a single
//! `parking_lot::Mutex`, the same spinlock-style critical section
//! `x_RebuildThrottlingData` uses so that concurrent callers either reuse a
//! fresh-enough snapshot or wait for the one rebuild in flight instead of
//! racing to rebuild it themselves.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::conn::ConnectionSlot;

/// Decision returned by [`Engine::check`] for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No attribute is over limit; proceed normally.
    Continue,
    /// A different, idler connection in the same over-limit bucket was
    /// closed instead of this one.
    OtherClosed,
    /// This connection is the idlest in its over-limit bucket and must be
    /// closed now (with a synchronous PSG 503 `Throttled` reply if a
    /// request is in flight).
    CloseThis,
}

/// One attribute bucket's over-limit connections, idlest first.
#[derive(Debug, Default, Clone)]
struct Bucket {
    connections: Vec<(crate::conn::ConnectionId, Duration)>,
}

impl Bucket {
    fn over_limit(&self, limit: usize) -> bool {
        self.connections.len() > limit
    }

    fn idlest(&self) -> Option<crate::conn::ConnectionId> {
        self.connections.iter().max_by_key(|(_, idle)| *idle).map(|(id, _)| *id)
    }
}

/// A point-in-time view of all connections across all workers, bucketed by
/// throttling attribute.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    by_host: HashMap<IpAddr, Bucket>,
    by_site: HashMap<IpAddr, Bucket>,
    by_process: HashMap<String, Bucket>,
    by_user_agent: HashMap<String, Bucket>,
    total_connections: usize,
}

impl Snapshot {
    /// Build a snapshot from the connection slots open across all workers.
    pub fn build(slots: &[Arc<ConnectionSlot>]) -> Snapshot {
        let mut snapshot = Snapshot {
            total_connections: slots.len(),
            ..Snapshot::default()
        };
        for slot in slots {
            let idle = slot.idle_for();
            let entry = (slot.id(), idle);
            snapshot.by_host.entry(slot.peer_ip()).or_default().connections.push(entry);
            snapshot.by_site.entry(slot.peer_site_key()).or_default().connections.push(entry);
            if let Some(pid) = slot.peer_id() {
                snapshot.by_process.entry(pid).or_default().connections.push(entry);
            }
            if let Some(ua) = slot.user_agent() {
                snapshot.by_user_agent.entry(ua).or_default().connections.push(entry);
            }
        }
        snapshot
    }
}

/// Throttling limits, one copy held by the engine.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Total connection count above which throttling activates at all.
    pub threshold: usize,
    /// Max connections sharing one peer IP.
    pub by_host: usize,
    /// Max connections sharing one peer `/16`.
    pub by_site: usize,
    /// Max connections sharing one peer-declared process id.
    pub by_process: usize,
    /// Max connections sharing one `User-Agent`.
    pub by_user_agent: usize,
}

struct State {
    snapshot: Snapshot,
    taken_at: Instant,
    in_progress: bool,
}

/// The throttling engine: owns the snapshot/timestamp/in-progress triple
/// and the decision logic.
pub struct Engine {
    limits: Limits,
    valid_for: Duration,
    state: Mutex<State>,
}

impl Engine {
    /// Build an engine with the given limits and snapshot validity window.
    pub fn new(limits: Limits, valid_for: Duration) -> Engine {
        Engine {
            limits,
            valid_for,
            state: Mutex::new(State {
                snapshot: Snapshot::default(),
                taken_at: Instant::now() - valid_for - Duration::from_secs(1),
                in_progress: false,
            }),
        }
    }

    /// Return a snapshot no older than `valid_for`, rebuilding it via
    /// `rebuild` if the cached one has expired. If a rebuild is already in
    /// progress on another task, reuse the stale snapshot rather than
    /// blocking — the next check a moment later will see the fresh one.
    fn snapshot_for_check(&self, rebuild: impl FnOnce() -> Vec<Arc<ConnectionSlot>>) -> Snapshot {
        let mut state = self.state.lock();
        if state.taken_at.elapsed() < self.valid_for || state.in_progress {
            return state.snapshot.clone();
        }
        state.in_progress = true;
        drop(state);

        let slots = rebuild();
        let snapshot = Snapshot::build(&slots);

        let mut state = self.state.lock();
        state.snapshot = snapshot.clone();
        state.taken_at = Instant::now();
        state.in_progress = false;
        snapshot
    }

    /// Decide what to do about `slot`, rebuilding the snapshot via
    /// `rebuild` if needed.
    pub fn check(
        &self,
        slot: &ConnectionSlot,
        rebuild: impl FnOnce() -> Vec<Arc<ConnectionSlot>>,
    ) -> Decision {
        let snapshot = self.snapshot_for_check(rebuild);
        if snapshot.total_connections <= self.limits.threshold {
            return Decision::Continue;
        }

        let checks: [(Option<&Bucket>, usize); 4] = [
            (snapshot.by_host.get(&slot.peer_ip()), self.limits.by_host),
            (snapshot.by_site.get(&slot.peer_site_key()), self.limits.by_site),
            (
                slot.peer_id().and_then(|pid| snapshot.by_process.get(&pid)),
                self.limits.by_process,
            ),
            (
                slot.user_agent().and_then(|ua| snapshot.by_user_agent.get(&ua)),
                self.limits.by_user_agent,
            ),
        ];

        for (bucket, limit) in checks {
            let Some(bucket) = bucket else { continue };
            if !bucket.over_limit(limit) {
                continue;
            }
            return match bucket.idlest() {
                Some(idlest) if idlest == slot.id() => Decision::CloseThis,
                Some(_) => Decision::OtherClosed,
                None => Decision::Continue,
            };
        }
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits { threshold: 1, by_host: 1, by_site: 10, by_process: 10, by_user_agent: 10 }
    }

    #[test]
    fn continues_below_threshold() {
        let engine = Engine::new(limits(), Duration::from_secs(3));
        let slot = ConnectionSlot::open("10.0.0.1".parse().unwrap(), 0);
        let decision = engine.check(&slot, || vec![slot.clone()]);
        assert_eq!(decision, Decision::Continue);
    }

    #[test]
    fn closes_idlest_connection_when_host_bucket_over_limit() {
        let engine = Engine::new(limits(), Duration::from_secs(3));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let a = ConnectionSlot::open(ip, 0);
        let b = ConnectionSlot::open(ip, 0);
        std::thread::sleep(Duration::from_millis(2));
        b.touch();
        let all = vec![a.clone(), b.clone()];
        let decision_a = engine.check(&a, || all.clone());
        assert_eq!(decision_a, Decision::CloseThis);
    }

    #[test]
    fn non_idlest_connection_sees_other_closed() {
        let engine = Engine::new(limits(), Duration::from_secs(3));
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let a = ConnectionSlot::open(ip, 0);
        let b = ConnectionSlot::open(ip, 0);
        std::thread::sleep(Duration::from_millis(2));
        b.touch();
        let all = vec![a.clone(), b.clone()];
        let decision_b = engine.check(&b, || all.clone());
        assert_eq!(decision_b, Decision::OtherClosed);
    }
}

//! Admission and backlog policy (component H).
//!
//! Each connection admits up to `http_max_running` concurrently executing
//! requests; anything beyond that waits in a FIFO backlog capped at
//! `http_max_backlog`. Once both are full the connection answers PSG 503
//! `TooManyRequests` immediately, mirroring `CHttpConnection`'s admission
//! check in `http_connection.hpp`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::conn::ConnectionSlot;
use crate::error::PsgErrorCode;
use crate::http::Reply;

/// Outcome of attempting to admit a request on a connection.
pub enum Admitted {
    /// The request may run immediately.
    Run,
    /// The request was queued; the returned receiver resolves once a
    /// running slot frees up, or is dropped (never resolves) if the
    /// request is cancelled while still queued.
    Queued(oneshot::Receiver<()>),
    /// Both the running and backlog capacity are exhausted.
    Rejected,
}

struct Waiter {
    notify: oneshot::Sender<()>,
}

/// Per-connection admission gate.
pub struct Admission {
    max_running: usize,
    max_backlog: usize,
    slot: Arc<ConnectionSlot>,
    backlog: Mutex<VecDeque<Waiter>>,
}

impl Admission {
    /// Build a gate bound to one connection's running/backlog limits.
    pub fn new(slot: Arc<ConnectionSlot>, max_running: usize, max_backlog: usize) -> Admission {
        Admission {
            max_running,
            max_backlog,
            slot,
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Attempt to admit one request.
    pub fn admit(&self) -> Admitted {
        if (self.slot.running_count() as usize) < self.max_running {
            self.slot.inc_running();
            return Admitted::Run;
        }
        let mut backlog = self.backlog.lock();
        if backlog.len() >= self.max_backlog {
            return Admitted::Rejected;
        }
        self.slot.inc_backlog();
        let (tx, rx) = oneshot::channel();
        backlog.push_back(Waiter { notify: tx });
        Admitted::Queued(rx)
    }

    /// Called when a running request finishes; promotes the oldest backlog
    /// waiter to running, if any (FIFO draining).
    pub fn release(&self) {
        self.slot.dec_running();
        let mut backlog = self.backlog.lock();
        while let Some(waiter) = backlog.pop_front() {
            self.slot.dec_backlog();
            self.slot.inc_running();
            if waiter.notify.send(()).is_ok() {
                return;
            }
            // the waiter was dropped (request cancelled while queued); undo
            // the running-slot we just granted it and keep draining.
            self.slot.dec_running();
        }
    }

    /// Number of requests currently queued.
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Cancel every queued waiter, e.g. on connection close, and return how
    /// many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut backlog = self.backlog.lock();
        let n = backlog.len();
        backlog.clear();
        n
    }
}

/// Apply admission policy to `reply`, sending the PSG 503 rejection chunk
/// itself when capacity is exhausted. Returns `true` if the caller should
/// proceed to actually run the request (either immediately or after the
/// queued wait resolves).
pub async fn admit_or_reject(admission: &Admission, reply: &Reply) -> bool {
    match admission.admit() {
        Admitted::Run => true,
        Admitted::Queued(rx) => rx.await.is_ok(),
        Admitted::Rejected => {
            reply.send_503(PsgErrorCode::TooManyRequests, "too many running and queued requests");
            reply.finish();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Arc<ConnectionSlot> {
        ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1)
    }

    #[test]
    fn admits_up_to_max_running_then_queues() {
        let gate = Admission::new(slot(), 2, 4);
        assert!(matches!(gate.admit(), Admitted::Run));
        assert!(matches!(gate.admit(), Admitted::Run));
        assert!(matches!(gate.admit(), Admitted::Queued(_)));
    }

    #[test]
    fn rejects_once_backlog_is_also_full() {
        let gate = Admission::new(slot(), 1, 1);
        assert!(matches!(gate.admit(), Admitted::Run));
        assert!(matches!(gate.admit(), Admitted::Queued(_)));
        assert!(matches!(gate.admit(), Admitted::Rejected));
    }

    #[tokio::test]
    async fn release_promotes_oldest_queued_waiter() {
        let gate = Admission::new(slot(), 1, 4);
        assert!(matches!(gate.admit(), Admitted::Run));
        let rx = match gate.admit() {
            Admitted::Queued(rx) => rx,
            _ => panic!("expected queued"),
        };
        gate.release();
        assert!(rx.await.is_ok());
    }

    #[test]
    fn cancel_all_drains_backlog() {
        let gate = Admission::new(slot(), 1, 4);
        let _ = gate.admit();
        let _ = gate.admit();
        let _ = gate.admit();
        assert_eq!(gate.backlog_len(), 2);
        assert_eq!(gate.cancel_all(), 2);
        assert_eq!(gate.backlog_len(), 0);
    }
}

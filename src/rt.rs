//! Thin event-loop facade (component A).
//!
//! `tokio`'s runtime already gives handle-closed-on-drop semantics, so
//! there is no bespoke loop/handle wrapper to build; this module only adds
//! the per-worker 1Hz maintain ticker and the stop/work notification
//! primitives that stand in for the source's `async_stop`/`async_work`
//! uv-handles.

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Interval;

/// Per-worker runtime handle: a maintain ticker plus a stop signal.
pub struct WorkerRuntime {
    maintain_period: Duration,
    stop: Notify,
}

impl WorkerRuntime {
    /// Build a runtime facade with the given maintain-tick period (1s in
    /// production; tests can use a shorter period).
    pub fn new(maintain_period: Duration) -> WorkerRuntime {
        WorkerRuntime { maintain_period, stop: Notify::new() }
    }

    /// A ticker firing every `maintain_period`, used for the per-worker
    /// housekeeping pass (idle connection sweep, throttling check).
    pub fn maintain_ticker(&self) -> Interval {
        tokio::time::interval(self.maintain_period)
    }

    /// Request that this worker's accept loop stop (the `async_stop`
    /// analogue).
    pub fn request_stop(&self) {
        self.stop.notify_waiters();
    }

    /// Resolves once [`Self::request_stop`] has been called.
    pub async fn stopped(&self) {
        self.stop.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_resolves_after_request_stop() {
        let rt = WorkerRuntime::new(Duration::from_secs(1));
        rt.request_stop();
        rt.stopped().await;
    }
}

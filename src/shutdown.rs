//! Graceful shutdown and FD-pressure watchdog (component J, spec §4.8).
//!
//! SIGINT ([`ShutdownData::begin_fast`]) triggers an immediate drain with no
//! grace period; SIGTERM ([`ShutdownData::begin`]) grants `term_grace_period`
//! (24h by default) before a hard exit. A 1Hz watchdog checks elapsed grace
//! time and the process's open-FD count, extending the deadline by two
//! seconds once to let in-flight replies flush before the process exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Why the watchdog decided to terminate the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT: fast shutdown, no grace period.
    Interrupt,
    /// SIGTERM: grace period elapsed.
    GracePeriodExpired,
    /// Open file descriptor count exceeded `shutdown_if_too_many_open_fd`.
    TooManyOpenFds,
}

/// Shared shutdown state, the Rust analogue of `CShutdownData`.
pub struct ShutdownData {
    requested: AtomicBool,
    fast: AtomicBool,
    deadline_extended: AtomicBool,
    requested_at: parking_lot::Mutex<Option<Instant>>,
    grace_period: Duration,
    fd_cap: u64,
    open_fds_hint: AtomicU64,
    notify: Notify,
}

impl ShutdownData {
    /// Build shutdown state with the configured grace period and FD cap
    /// (`0` disables the FD-pressure check).
    pub fn new(grace_period: Duration, fd_cap: u64) -> Arc<ShutdownData> {
        Arc::new(ShutdownData {
            requested: AtomicBool::new(false),
            fast: AtomicBool::new(false),
            deadline_extended: AtomicBool::new(false),
            requested_at: parking_lot::Mutex::new(None),
            grace_period,
            fd_cap,
            open_fds_hint: AtomicU64::new(0),
            notify: Notify::new(),
        })
    }

    /// Whether a shutdown has been requested (SIGINT, SIGTERM, or FD
    /// pressure).
    pub fn is_shutting_down(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Record an incoming request's observed open-FD count; the watchdog
    /// reads this on its next tick rather than calling `/proc` itself on
    /// every request.
    pub fn record_open_fds(&self, count: u64) {
        self.open_fds_hint.store(count, Ordering::Relaxed);
    }

    /// Whether a new request should be admitted at all; requests are
    /// refused once a shutdown has been requested, matching the original's
    /// FD-cap pre-check ahead of request admission.
    pub fn admits_new_requests(&self) -> bool {
        !self.is_shutting_down()
    }

    /// Begin a graceful shutdown (SIGTERM), remembering when it started so
    /// the watchdog can measure the configured grace period from here.
    pub fn begin(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            *self.requested_at.lock() = Some(Instant::now());
        }
        self.notify.notify_waiters();
    }

    /// Begin a fast shutdown (SIGINT): stop admitting new requests
    /// immediately and skip the grace period entirely on the next watchdog
    /// tick, rather than waiting out `term_grace_period`.
    pub fn begin_fast(&self) {
        self.fast.store(true, Ordering::Release);
        self.begin();
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.notify.notified().await;
    }

    /// Run one watchdog tick: check FD pressure and grace-period elapse.
    /// Returns `Some(reason)` once the process should hard-exit.
    pub fn tick(&self) -> Option<ShutdownReason> {
        if self.fd_cap > 0 && self.open_fds_hint.load(Ordering::Relaxed) > self.fd_cap {
            self.begin();
            return Some(ShutdownReason::TooManyOpenFds);
        }
        if self.fast.load(Ordering::Acquire) && self.is_shutting_down() {
            return Some(ShutdownReason::Interrupt);
        }
        let requested_at = *self.requested_at.lock();
        let Some(requested_at) = requested_at else { return None };
        let elapsed = requested_at.elapsed();
        if elapsed < self.grace_period {
            return None;
        }
        if !self.deadline_extended.swap(true, Ordering::AcqRel) {
            // grant the documented two-second extension once, to let
            // in-flight replies flush.
            return None;
        }
        if elapsed < self.grace_period + Duration::from_secs(2) {
            return None;
        }
        Some(ShutdownReason::GracePeriodExpired)
    }
}

/// Count this process's currently open file descriptors via `/proc/self/fd`,
/// the cheapest portable-on-Linux way to self-check FD pressure without a
/// `getrlimit`/`libc` dependency.
fn count_open_fds() -> Option<u64> {
    std::fs::read_dir("/proc/self/fd").ok().map(|entries| entries.count() as u64)
}

/// Drive the 1Hz watchdog loop until it decides to terminate, then invoke
/// `on_exit` with the reason. Split out from `tick` so tests can drive the
/// decision logic without sleeping.
pub async fn run_watchdog(data: Arc<ShutdownData>, on_exit: impl Fn(ShutdownReason)) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if let Some(count) = count_open_fds() {
            data.record_open_fds(count);
        }
        if let Some(reason) = data.tick() {
            on_exit(reason);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_shutting_down_initially() {
        let data = ShutdownData::new(Duration::from_secs(3600), 0);
        assert!(!data.is_shutting_down());
        assert!(data.admits_new_requests());
    }

    #[test]
    fn fd_pressure_triggers_immediately() {
        let data = ShutdownData::new(Duration::from_secs(3600), 10);
        data.record_open_fds(11);
        assert_eq!(data.tick(), Some(ShutdownReason::TooManyOpenFds));
        assert!(data.is_shutting_down());
    }

    #[test]
    fn grace_period_requires_extension_tick_before_expiring() {
        let data = ShutdownData::new(Duration::from_millis(0), 0);
        data.begin();
        // first tick after grace elapses only grants the extension
        assert_eq!(data.tick(), None);
    }

    #[tokio::test]
    async fn wait_for_shutdown_resolves_after_begin() {
        let data = ShutdownData::new(Duration::from_secs(3600), 0);
        data.begin();
        data.wait_for_shutdown().await;
    }

    #[test]
    fn fast_shutdown_skips_the_grace_period() {
        let data = ShutdownData::new(Duration::from_secs(3600), 0);
        data.begin_fast();
        assert_eq!(data.tick(), Some(ShutdownReason::Interrupt));
    }

    #[test]
    fn graceful_shutdown_does_not_trigger_fast_path() {
        let data = ShutdownData::new(Duration::from_secs(3600), 0);
        data.begin();
        assert_eq!(data.tick(), None);
    }
}

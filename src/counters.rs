//! Named process-wide counters (spec §5), exposed for diagnostics and
//! logging rather than as a metrics-export surface (metrics scraping is a
//! Non-goal; these are plain atomics read by `/ADMIN` and log lines).

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        /// Process-wide counters, one atomic per named counter.
        #[derive(Default)]
        pub struct $name {
            $(#[allow(missing_docs)] pub $field: AtomicU64,)+
        }

        impl $name {
            /// A fresh, zeroed counter set.
            pub fn new() -> Self {
                Self::default()
            }
        }
    };
}

counters!(Counters {
    accepted_connections,
    closed_connections,
    conn_hard_limit_exceeded,
    conn_soft_limit_exceeded,
    conn_alert_limit_exceeded,
    requests_admitted,
    requests_backlogged,
    requests_rejected_too_many,
    requests_throttled,
    requests_cancelled,
});

/// Convenience accessors so call sites read like `counters.inc(...)`
/// rather than reaching into a specific `AtomicU64` by name.
impl Counters {
    /// Increment a counter by one and return the new value.
    pub fn inc(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current value of a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let counters = Counters::new();
        assert_eq!(Counters::get(&counters.accepted_connections), 0);
        Counters::inc(&counters.accepted_connections);
        Counters::inc(&counters.accepted_connections);
        assert_eq!(Counters::get(&counters.accepted_connections), 2);
    }
}

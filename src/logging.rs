//! Logging setup (spec §1.1).
//!
//! `log_timing`/`log_timing_nst_api`/`log_timing_client_socket` are not a
//! bespoke logger mode: they are `tracing` spans/fields a processor or the
//! connection engine can record when the corresponding config flag is on.

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber. Call once, early in `main`.
pub fn init(config: &LoggingConfig) {
    if !config.log {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_does_not_panic() {
        init(&LoggingConfig { log: false, ..LoggingConfig::default() });
    }
}

//! Cross-worker shared state (component G/I/K glue).
//!
//! A single connection only needs its own [`crate::conn::ConnectionSlot`]
//! and [`crate::admission::Admission`] gate to answer a request, but a few
//! things genuinely span every worker: the processor route table, the
//! connection registry the throttling engine and `/ADMIN/connections_status`
//! both read, the throttling engine itself, the configured limits, health
//! checks and admin allow-list, process-wide counters, the alert registry
//! and shutdown state. `GatewayShared` bundles all of it behind one `Arc` so
//! `Worker` and `ConnectionContext` each carry one field instead of eight.

use std::collections::HashSet;
use std::sync::Arc;

use crate::alerts::Alerts;
use crate::config::{Config, HealthConfig, LimitsConfig};
use crate::conn::ConnectionRegistry;
use crate::counters::Counters;
use crate::dispatch::ProcessorDispatch;
use crate::shutdown::ShutdownData;
use crate::throttling::{Engine as ThrottlingEngine, Limits as ThrottlingLimits};

/// Everything beyond a connection's own slot that answering a request or
/// running the throttling/introspection passes needs.
pub struct GatewayShared {
    /// Registered request processors.
    pub dispatch: Arc<ProcessorDispatch>,
    /// Every open connection, across every worker.
    pub registry: Arc<ConnectionRegistry>,
    /// Connection-population throttling engine.
    pub throttling: Arc<ThrottlingEngine>,
    /// Connection-population limits (§4.6).
    pub limits: LimitsConfig,
    /// Health-check configuration for the z-endpoints.
    pub health: HealthConfig,
    /// Client names allowed to hit `/ADMIN/*`.
    pub admin_allowed: HashSet<String>,
    /// Process-wide named counters.
    pub counters: Arc<Counters>,
    /// Operational alert registry.
    pub alerts: Arc<Alerts>,
    /// Graceful-shutdown state.
    pub shutdown: Arc<ShutdownData>,
}

impl GatewayShared {
    /// Build the shared state from a loaded configuration document.
    pub fn new(
        config: &Config,
        dispatch: Arc<ProcessorDispatch>,
        counters: Arc<Counters>,
        shutdown: Arc<ShutdownData>,
    ) -> Arc<GatewayShared> {
        let throttling = Arc::new(ThrottlingEngine::new(
            ThrottlingLimits {
                threshold: config.limits.conn_throttle_threshold as usize,
                by_host: config.limits.conn_throttle_by_host,
                by_site: config.limits.conn_throttle_by_site,
                by_process: config.limits.conn_throttle_by_process,
                by_user_agent: config.limits.conn_throttle_by_user_agent,
            },
            config.limits.throttling_data_valid,
        ));
        Arc::new(GatewayShared {
            dispatch,
            registry: ConnectionRegistry::new(),
            throttling,
            limits: config.limits.clone(),
            health: config.health.clone(),
            admin_allowed: config.admin.allowed_clients(),
            counters,
            alerts: Alerts::new(),
            shutdown,
        })
    }
}

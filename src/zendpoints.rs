//! `/readyz`, `/healthz`, `/livez` and `/readyz/<source>` (component K).
//!
//! Grounded in `z_end_points.cpp`'s aggregation rule: run every configured
//! self-probe, then report the maximum status across critical sources if
//! any critical check ran; otherwise the maximum across non-critical
//! checks; otherwise 200 (nothing configured means nothing can fail).

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::HealthConfig;

/// Result of probing one data source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// Data source id, e.g. `"cassandra"`.
    pub source: String,
    /// HTTP-style status this probe contributes to the aggregate.
    pub status: u16,
    /// Free-form detail (error message, or `"OK"`).
    pub message: String,
    /// Whether this source's failure fails the whole aggregate.
    pub critical: bool,
}

/// Full verbose response body for `/readyz?verbose`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyzReport {
    /// Aggregate status per the critical/non-critical rule.
    pub status: u16,
    /// Per-source detail.
    pub sources: Vec<SourceStatus>,
}

/// A single self-probe's outcome, supplied by whatever actually talks to
/// the data source (out of scope here; the gateway core only aggregates).
pub type ProbeFn<'a> = dyn Fn(&str, Duration) -> Result<(), String> + Send + Sync + 'a;

/// Run every configured health check and aggregate per the critical rule.
pub fn check_all(config: &HealthConfig, probe: &ProbeFn<'_>) -> ReadyzReport {
    let mut sources = Vec::new();
    for (id, check) in &config.checks {
        let critical = config.critical_data_sources.contains(id);
        let (status, message) = match probe(id, check.timeout) {
            Ok(()) => (200, "OK".to_string()),
            Err(message) => (503, message),
        };
        sources.push(SourceStatus { source: id.clone(), status, message, critical });
    }
    ReadyzReport { status: aggregate(&sources), sources }
}

/// Check a single named source (`/readyz/<source>`); `404` if unknown.
pub fn check_one(config: &HealthConfig, source: &str, probe: &ProbeFn<'_>) -> SourceStatus {
    let Some(check) = config.checks.get(source) else {
        return SourceStatus {
            source: source.to_string(),
            status: 404,
            message: format!("unknown data source {source}"),
            critical: false,
        };
    };
    let critical = config.critical_data_sources.contains(source);
    match probe(source, check.timeout) {
        Ok(()) => SourceStatus { source: source.to_string(), status: 200, message: "OK".into(), critical },
        Err(message) => SourceStatus { source: source.to_string(), status: 503, message, critical },
    }
}

fn aggregate(sources: &[SourceStatus]) -> u16 {
    let critical_max = sources
        .iter()
        .filter(|s| s.critical)
        .map(|s| s.status)
        .max();
    if let Some(max) = critical_max {
        return max;
    }
    sources.iter().map(|s| s.status).max().unwrap_or(200)
}

/// `/livez` never probes anything: it only answers whether the process is
/// alive at all, always `200` while the process is running.
pub fn livez() -> u16 {
    200
}

/// Counters recorded per z-endpoint hit, purely diagnostic.
#[derive(Debug, Default)]
pub struct ZEndpointCounters {
    hits: HashMap<&'static str, u64>,
}

impl ZEndpointCounters {
    /// Record one hit on the named endpoint.
    pub fn record(&mut self, endpoint: &'static str) {
        *self.hits.entry(endpoint).or_insert(0) += 1;
    }

    /// Hits recorded so far on the named endpoint.
    pub fn count(&self, endpoint: &str) -> u64 {
        self.hits.get(endpoint).copied().unwrap_or(0)
    }
}

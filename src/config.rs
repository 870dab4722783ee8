//! On-disk configuration (spec §6 "Configuration").
//!
//! Parsed with `serde` + `toml`; durations are written in human form
//! (`"2s"`, `"24h"`) and decoded via `humantime_serde`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Network / worker settings.
    pub network: NetworkConfig,
    /// Connection-population limits and throttling knobs.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// TLS settings.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Shutdown / FD-pressure settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Health-check settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Logging toggles.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Admin access control.
    #[serde(default)]
    pub admin: AdminConfig,
}

/// `{port, address, workers, backlog, http_max_backlog, http_max_running}`
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// TCP port the gateway listens on.
    pub port: u16,
    /// Address to bind; defaults to all interfaces.
    #[serde(default = "default_address")]
    pub address: IpAddr,
    /// Number of worker threads, each with its own accept loop.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// `listen()` backlog passed to the kernel.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Per-connection running-request cap (`http_max_running`).
    #[serde(default = "default_max_running")]
    pub http_max_running: usize,
    /// Per-connection backlog cap (`http_max_backlog`).
    #[serde(default = "default_max_backlog")]
    pub http_max_backlog: usize,
}

fn default_address() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}
fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_backlog() -> u32 {
    256
}
fn default_max_running() -> usize {
    16
}
fn default_max_backlog() -> usize {
    64
}

/// Connection limits (§4.6) and throttling knobs (§4.7).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// `conn_alert_limit`
    pub conn_alert_limit: u64,
    /// `conn_soft_limit`
    pub conn_soft_limit: u64,
    /// `conn_hard_limit`
    pub conn_hard_limit: u64,
    /// `conn_throttle_threshold`
    pub conn_throttle_threshold: u64,
    /// `conn_throttle_by_host` — max connections sharing one peer IP.
    pub conn_throttle_by_host: usize,
    /// `conn_throttle_by_site` — max connections sharing one peer /16.
    pub conn_throttle_by_site: usize,
    /// `conn_throttle_by_process` — max connections sharing one peer id.
    pub conn_throttle_by_process: usize,
    /// `conn_throttle_by_user_agent`
    pub conn_throttle_by_user_agent: usize,
    /// `conn_throttle_idle_timeout_ms`
    #[serde(with = "humantime_serde")]
    pub conn_throttle_idle_timeout: Duration,
    /// `conn_throttle_close_idle_sec`
    #[serde(with = "humantime_serde")]
    pub conn_throttle_close_idle: Duration,
    /// `throttling_data_valid_sec`
    #[serde(with = "humantime_serde")]
    pub throttling_data_valid: Duration,
    /// `conn_force_close_wait_sec`
    #[serde(with = "humantime_serde")]
    pub conn_force_close_wait: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            conn_alert_limit: 2000,
            conn_soft_limit: 2500,
            conn_hard_limit: 3000,
            conn_throttle_threshold: 2400,
            conn_throttle_by_host: 32,
            conn_throttle_by_site: 128,
            conn_throttle_by_process: 32,
            conn_throttle_by_user_agent: 32,
            conn_throttle_idle_timeout: Duration::from_secs(60),
            conn_throttle_close_idle: Duration::from_secs(5),
            throttling_data_valid: Duration::from_secs(3),
            conn_force_close_wait: Duration::from_secs(2),
        }
    }
}

/// `{ssl_enable, ssl_cert_file, ssl_key_file, ssl_ciphers}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether to terminate TLS on accepted connections.
    pub ssl_enable: bool,
    /// PEM certificate chain path.
    pub ssl_cert_file: Option<String>,
    /// PEM private key path.
    pub ssl_key_file: Option<String>,
    /// Colon-separated cipher list (rustls picks a safe default set when
    /// empty; kept for parity with the spec's knob).
    pub ssl_ciphers: Option<String>,
}

/// `{shutdown_if_too_many_open_fd, immediate_conn_close_timeout_ms}`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Open-FD cap; exceeding it triggers §4.8 FD-pressure handling.
    pub shutdown_if_too_many_open_fd: u64,
    /// `immediate_conn_close_timeout_ms`
    #[serde(with = "humantime_serde")]
    pub immediate_conn_close_timeout: Duration,
    /// Grace period granted to SIGTERM before a hard exit (24h default).
    #[serde(with = "humantime_serde")]
    pub term_grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            shutdown_if_too_many_open_fd: 0,
            immediate_conn_close_timeout: Duration::from_millis(2000),
            term_grace_period: Duration::from_secs(24 * 3600),
        }
    }
}

/// Per-data-source health-check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Shell-level command/token executed against the data source.
    pub health_command: String,
    /// Timeout applied to the self-probe request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Health-check settings (§4.9, §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// One entry per known data source id (`cassandra`, `lmdb`, `wgs`,
    /// `cdd`, `snp`).
    pub checks: std::collections::HashMap<String, HealthCheckConfig>,
    /// Data sources whose failure makes the whole server "not ready".
    pub critical_data_sources: HashSet<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            checks: std::collections::HashMap::new(),
            critical_data_sources: HashSet::new(),
        }
    }
}

/// `{log, log_timing, log_timing_nst_api, log_timing_client_socket}`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Master log enable switch.
    pub log: bool,
    /// Log per-request timing.
    pub log_timing: bool,
    /// Log NetStorage-API-specific timing.
    pub log_timing_nst_api: bool,
    /// Log per-client-socket timing.
    pub log_timing_client_socket: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log: true,
            log_timing: false,
            log_timing_nst_api: false,
            log_timing_client_socket: false,
        }
    }
}

/// `{admin_client_names}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Semicolon/comma-separated list of client names allowed to hit
    /// `/ADMIN/*`. Parsed once at load time into a set.
    pub admin_client_names: String,
}

impl AdminConfig {
    /// The parsed set of allowed admin client names.
    pub fn allowed_clients(&self) -> HashSet<String> {
        self.admin_client_names
            .split(|c| c == ';' || c == ',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|source| GatewayError::Config {
            code: "ConfigUnreadable",
            message: format!("cannot read {}: {source}", path.display()),
        })?;
        let cfg: Config = toml::from_str(&text).map_err(|source| GatewayError::Config {
            code: "ConfigParse",
            message: source.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.network.port == 0 {
            return Err(GatewayError::Config {
                code: "BadPort",
                message: "network.port must be nonzero".into(),
            });
        }
        if self.network.workers == 0 {
            return Err(GatewayError::Config {
                code: "BadWorkerCount",
                message: "network.workers must be at least 1".into(),
            });
        }
        if self.limits.conn_alert_limit > self.limits.conn_soft_limit
            || self.limits.conn_soft_limit > self.limits.conn_hard_limit
        {
            return Err(GatewayError::Config {
                code: "BadLimitOrdering",
                message: "expected conn_alert_limit <= conn_soft_limit <= conn_hard_limit".into(),
            });
        }
        if self.tls.ssl_enable
            && (self.tls.ssl_cert_file.is_none() || self.tls.ssl_key_file.is_none())
        {
            return Err(GatewayError::Config {
                code: "MissingTlsMaterial",
                message: "ssl_enable requires ssl_cert_file and ssl_key_file".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_limits() {
        let toml = r#"
            [network]
            port = 8080

            [limits]
            conn_alert_limit = 100
            conn_soft_limit = 50
            conn_hard_limit = 200
            conn_throttle_threshold = 10
            conn_throttle_by_host = 1
            conn_throttle_by_site = 1
            conn_throttle_by_process = 1
            conn_throttle_by_user_agent = 1
            conn_throttle_idle_timeout = "1s"
            conn_throttle_close_idle = "1s"
            throttling_data_valid = "1s"
            conn_force_close_wait = "1s"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn admin_client_names_parses_mixed_separators() {
        let admin = AdminConfig {
            admin_client_names: "alice; bob,carol".to_string(),
        };
        let set = admin.allowed_clients();
        assert_eq!(set.len(), 3);
        assert!(set.contains("bob"));
    }
}

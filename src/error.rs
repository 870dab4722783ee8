//! Error and result types shared across the gateway core.
//!
//! Mirrors the error-kind taxonomy of the gateway's error handling design:
//! malformed/insufficient request arguments, capacity exceeded, throttled,
//! shutting down, socket-write failures and unexpected processor panics.
//! Each variant's `Display` is the stable symbolic name a configuration
//! exception would report via `GetErrCodeString()` in the original.

use thiserror::Error;

/// Result alias used throughout the gateway core.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by the gateway core.
///
/// Per-request errors are localized to the `Reply` state machine and never
/// escape as a `GatewayError` — this enum is for connection-, worker- and
/// process-level failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Failed to bind the shared listening socket.
    #[error("failed to bind listener on {addr}: {source}")]
    Listen {
        /// Address the gateway attempted to bind.
        addr: std::net::SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A worker's accept loop failed in a way that cannot be recovered.
    #[error("worker {worker_id} accept loop failed: {source}")]
    WorkerAccept {
        /// Index of the failing worker.
        worker_id: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TLS context construction failed (bad cert/key/cipher configuration).
    #[error("failed to build TLS acceptor: {0}")]
    Tls(String),

    /// Configuration file could not be parsed or failed validation.
    #[error("configuration error ({code}): {message}")]
    Config {
        /// Stable symbolic error code (the Rust analogue of
        /// `GetErrCodeString()`), e.g. `"BadPort"`, `"MissingHealthCommand"`.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// PID file could not be written.
    #[error("failed to write pidfile {path}: {source}")]
    PidFile {
        /// Path the gateway tried to write.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Stable symbolic error code, analogous to the original's
    /// `GetErrCodeString()`.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Listen { .. } => "Listen",
            GatewayError::WorkerAccept { .. } => "WorkerAccept",
            GatewayError::Tls(_) => "Tls",
            GatewayError::Config { code, .. } => code,
            GatewayError::PidFile { .. } => "PidFile",
        }
    }
}

/// Abstract per-request error kind (spec §7), attached to a PSG
/// `reply-message` chunk. Distinct from [`GatewayError`]: these never
/// propagate past the `Reply` that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsgErrorCode {
    /// Bad parameter name/type/value or out-of-range.
    MalformedParameter,
    /// A mandatory field was missing.
    InsufficientArguments,
    /// Running + backlog are both full.
    TooManyRequests,
    /// Admission policy refused the request due to throttling.
    Throttled,
    /// The server is shutting down.
    ShuttingDown,
    /// A processor raised an exception the dispatcher did not translate.
    UnknownError,
    /// The request was canceled before it could finish.
    RequestCancelled,
}

impl PsgErrorCode {
    /// The wire string used in the `code` field of a PSG `reply-message`
    /// chunk.
    pub fn as_str(self) -> &'static str {
        match self {
            PsgErrorCode::MalformedParameter => "MalformedParameter",
            PsgErrorCode::InsufficientArguments => "InsufficientArguments",
            PsgErrorCode::TooManyRequests => "TooManyRequests",
            PsgErrorCode::Throttled => "Throttled",
            PsgErrorCode::ShuttingDown => "ShuttingDown",
            PsgErrorCode::UnknownError => "UnknownError",
            PsgErrorCode::RequestCancelled => "RequestCancelled",
        }
    }
}

impl std::fmt::Display for PsgErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_is_stable() {
        let err = GatewayError::Config {
            code: "BadPort",
            message: "port must be in 1..65535".into(),
        };
        assert_eq!(err.code(), "BadPort");
    }

    #[test]
    fn psg_error_code_wire_strings() {
        assert_eq!(PsgErrorCode::TooManyRequests.as_str(), "TooManyRequests");
        assert_eq!(PsgErrorCode::ShuttingDown.to_string(), "ShuttingDown");
    }
}

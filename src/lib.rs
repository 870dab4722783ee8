//! `pubseqd` — a multi-worker async HTTP gateway front-end.
//!
//! The crate is organized around the pieces a network front-end actually
//! needs once HTTP parsing itself is delegated to `hyper`: a shared
//! listener fanned out to per-worker accept loops ([`worker`]), a
//! connection data model and admission policy ([`conn`], [`admission`]),
//! a request/reply pair with PSG wire framing ([`http`]), a processor
//! dispatch table ([`dispatch`]), a connection-population throttling
//! engine ([`throttling`]), and the graceful-shutdown and health-probe
//! surfaces operators drive the process with ([`shutdown`],
//! [`zendpoints`], [`introspection`], [`alerts`]).

pub mod admission;
pub mod alerts;
pub mod cli;
pub mod config;
pub mod conn;
pub mod counters;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod http;
pub mod introspection;
pub mod logging;
pub mod rt;
pub mod shutdown;
pub mod throttling;
pub mod worker;
pub mod zendpoints;

pub use error::{GatewayError, Result};

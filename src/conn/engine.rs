//! HTTP engine adapter (component E).
//!
//! Bridges one accepted TCP connection to `hyper`'s connection driver:
//! builds a `hyper::service::Service` closure that converts each inbound
//! `hyper::Request` into the gateway's own [`Request`]/[`Reply`] pair, runs
//! it through admission control and the processor dispatcher (or answers a
//! handful of core routes directly), and converts the finished [`Reply`]
//! back into a `hyper::Response`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hyper::{Body, Request as HyperRequest, Response};

use crate::admission::{admit_or_reject, Admission};
use crate::conn::ConnectionSlot;
use crate::error::PsgErrorCode;
use crate::gateway::GatewayShared;
use crate::http::psg::Chunk;
use crate::http::{Reply, Request, Severity};
use crate::introspection;
use crate::zendpoints;

/// Everything one accepted connection needs to answer requests.
pub struct ConnectionContext {
    /// The connection's own slot (counters, peer identity, throttling key).
    pub slot: Arc<ConnectionSlot>,
    /// The connection's admission gate.
    pub admission: Arc<Admission>,
    /// State shared across every worker (route table, registry, limits...).
    pub shared: Arc<GatewayShared>,
    /// Set at accept time when this connection was admitted only to be
    /// told `conn_hard_limit` was already exceeded; every request on it
    /// short-circuits to a PSG 503 without reaching admission or dispatch.
    pub over_hard_limit: bool,
}

/// Answer one request, converting admission/processor/status bookkeeping
/// into a single infallible HTTP response. The worker loop wraps this in a
/// `hyper::service::service_fn` per connection.
pub async fn handle_one(ctx: Arc<ConnectionContext>, req: HyperRequest<Body>) -> Result<Response<Body>, Infallible> {
    Ok(handle_one_inner(ctx, req).await)
}

async fn handle_one_inner(ctx: Arc<ConnectionContext>, req: HyperRequest<Body>) -> Response<Body> {
    ctx.slot.touch();
    let peer_ip = ctx.slot.peer_ip();
    let request = Request::new(req.uri(), req.headers(), peer_ip);
    ctx.slot.set_peer_id_if_unset(request.peer_id());
    ctx.slot.set_user_agent_if_unset(request.user_agent());

    let reply = Reply::new();

    if ctx.over_hard_limit {
        reply.send_503(PsgErrorCode::Throttled, "connection population hard limit exceeded");
        reply.finish();
        return reply_to_response(&reply);
    }

    if handle_builtin_route(&ctx, &request, &reply) {
        return reply_to_response(&reply);
    }

    if !admit_or_reject(&ctx.admission, &reply).await {
        return reply_to_response(&reply);
    }

    ctx.shared.dispatch.dispatch(request, reply.clone()).await;
    ctx.admission.release();
    reply_to_response(&reply)
}

/// Every health check/data source probe in this codebase is a stub: the
/// actual upstream call is out of scope (spec §4.9 leaves it to whatever
/// talks to the data source), so every probe reports success.
fn probe_stub(_source: &str, _timeout: Duration) -> Result<(), String> {
    Ok(())
}

/// Core routes answered directly by the engine rather than through the
/// processor dispatch table: health probes and admin introspection aren't
/// request-handling business logic a [`crate::dispatch::Processor`] would
/// register. Returns `true` if `path` was one of these and `reply` now
/// holds the answer.
fn handle_builtin_route(ctx: &ConnectionContext, request: &Request, reply: &Reply) -> bool {
    match request.path() {
        "/livez" => {
            reply.raise_status(zendpoints::livez());
            reply.send_message(Severity::Info, "alive");
            reply.finish();
            true
        }
        "/healthz" | "/readyz" => {
            let report = zendpoints::check_all(&ctx.shared.health, &probe_stub);
            reply.raise_status(report.status);
            let body = serde_json::to_string(&report).unwrap_or_default();
            reply.send_message(Severity::Info, body);
            reply.finish();
            true
        }
        path if path.starts_with("/readyz/") => {
            let source = &path["/readyz/".len()..];
            let status = zendpoints::check_one(&ctx.shared.health, source, &probe_stub);
            reply.raise_status(status.status);
            let body = serde_json::to_string(&status).unwrap_or_default();
            reply.send_message(Severity::Info, body);
            reply.finish();
            true
        }
        "/ADMIN/connections_status" => {
            let client_name = request.admin_auth_token().unwrap_or_default();
            if !introspection::is_admin_client(&ctx.shared.admin_allowed, &client_name) {
                reply.send_401("admin client not recognized");
                reply.finish();
                return true;
            }
            let connections = ctx.shared.registry.snapshot();
            let statuses = introspection::snapshot(&connections);
            let body = serde_json::to_string(&statuses).unwrap_or_default();
            reply.send_message(Severity::Info, body);
            reply.finish();
            true
        }
        _ => false,
    }
}

/// Flatten a finished [`Reply`]'s chunks into one PSG-framed HTTP body:
/// each chunk's JSON envelope followed immediately by its binary payload,
/// if any, matching the wire layout `spec.md`'s framing section describes.
fn reply_to_response(reply: &Reply) -> Response<Body> {
    let status = reply.status();
    let mime = reply.mime_type().as_header_value().unwrap_or("application/x-ncbi-psg");
    let mut body = BytesMut::new();
    for chunk in reply.drain_chunks() {
        match &chunk {
            Chunk::Message(_) | Chunk::Completion(_) => {
                if let Some(json) = chunk.envelope_json() {
                    body.extend_from_slice(json.as_bytes());
                    body.extend_from_slice(b"\n");
                }
            }
            Chunk::Data(data) => body.extend_from_slice(data),
        }
    }
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, mime)
        .body(Body::from(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::counters::Counters;
    use crate::dispatch::{Processor, ProcessorDispatch};
    use crate::shutdown::ShutdownData;
    use async_trait::async_trait;

    struct Ok200;

    #[async_trait]
    impl Processor for Ok200 {
        fn route(&self) -> &str {
            "/ok"
        }

        async fn run(&self, _request: Request, reply: Reply) {
            reply.send_message(crate::http::Severity::Info, "fine");
            reply.finish();
        }
    }

    fn shared_with(dispatch: ProcessorDispatch) -> Arc<GatewayShared> {
        let toml_src = "[network]\nport = 8080\n";
        let config: Config = toml::from_str(toml_src).unwrap();
        GatewayShared::new(
            &config,
            Arc::new(dispatch),
            Arc::new(Counters::new()),
            ShutdownData::new(Duration::from_secs(3600), 0),
        )
    }

    fn context() -> Arc<ConnectionContext> {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        let admission = Arc::new(Admission::new(slot.clone(), 4, 4));
        let mut dispatch = ProcessorDispatch::new();
        dispatch.register(Arc::new(Ok200));
        Arc::new(ConnectionContext { slot, admission, shared: shared_with(dispatch), over_hard_limit: false })
    }

    #[tokio::test]
    async fn known_route_answers_200() {
        let ctx = context();
        let req = HyperRequest::builder().uri("/ok").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn unknown_route_answers_404() {
        let ctx = context();
        let req = HyperRequest::builder().uri("/nope").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn full_admission_answers_503() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        let admission = Arc::new(Admission::new(slot.clone(), 0, 0));
        let mut dispatch = ProcessorDispatch::new();
        dispatch.register(Arc::new(Ok200));
        let ctx = Arc::new(ConnectionContext {
            slot,
            admission,
            shared: shared_with(dispatch),
            over_hard_limit: false,
        });
        let req = HyperRequest::builder().uri("/ok").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn livez_is_answered_without_hitting_dispatch() {
        let ctx = context();
        let req = HyperRequest::builder().uri("/livez").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn readyz_is_200_with_no_health_checks_configured() {
        let ctx = context();
        let req = HyperRequest::builder().uri("/readyz").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn admin_route_rejects_unrecognized_client() {
        let ctx = context();
        let req = HyperRequest::builder().uri("/ADMIN/connections_status").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn over_hard_limit_connection_always_answers_503() {
        let slot = ConnectionSlot::open("127.0.0.1".parse().unwrap(), 1);
        let admission = Arc::new(Admission::new(slot.clone(), 4, 4));
        let mut dispatch = ProcessorDispatch::new();
        dispatch.register(Arc::new(Ok200));
        let ctx = Arc::new(ConnectionContext {
            slot,
            admission,
            shared: shared_with(dispatch),
            over_hard_limit: true,
        });
        let req = HyperRequest::builder().uri("/ok").body(Body::empty()).unwrap();
        let response = handle_one(ctx, req).await.unwrap();
        assert_eq!(response.status(), 503);
    }
}

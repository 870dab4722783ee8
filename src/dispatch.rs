//! Processor dispatcher (component G, spec §4.3/§4.4).
//!
//! The gateway core never knows what a request *means*; it only knows how
//! to route it to every registered [`Processor`] that wants it and plumb
//! the resulting [`Reply`] back onto the wire. A request can match more
//! than one processor (e.g. a logging/audit processor alongside the one
//! that actually answers it); every matched processor is told the request
//! started before any of them begins real work, and the request is only
//! considered finished once every matched processor's task has completed —
//! grounded in the original dispatcher's per-processor `StartRequestTimer`
//! / `NotifyRequestFinished` pairing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;

use crate::http::{Reply, Request};

/// A registered request handler. Implementations own the actual business
/// logic (data source lookups, NetStorage object resolution, ...) that is
/// explicitly out of scope here; the core only needs the trait boundary.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Route this processor answers for by default.
    fn route(&self) -> &str;

    /// Whether this processor should run for `path`. The default is an
    /// exact match against [`Processor::route`]; a processor that answers a
    /// family of paths overrides this instead.
    fn accepts(&self, path: &str) -> bool {
        path == self.route()
    }

    /// Called once for every matched processor, before any of them begins
    /// real work. Most processors have nothing to do here; it exists for
    /// processors that need to record "this request started" (a timer, an
    /// audit log entry) regardless of which matched processor finishes
    /// first.
    async fn start(&self, _request: &Request, _reply: &Reply) {}

    /// Do the actual work, writing chunks to `reply` and calling
    /// [`Reply::finish`] when done. Processors that need to wait on
    /// upstream I/O should periodically await [`Reply::wait_for_data`]
    /// rather than blocking the worker thread.
    async fn run(&self, request: Request, reply: Reply);
}

/// Table of registered processors, matched by [`Processor::accepts`].
pub struct ProcessorDispatch {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorDispatch {
    /// An empty dispatch table.
    pub fn new() -> Self {
        ProcessorDispatch { processors: Vec::new() }
    }

    /// Register a processor.
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
    }

    /// Every processor that accepts `path`, in registration order.
    pub fn find(&self, path: &str) -> Vec<Arc<dyn Processor>> {
        self.processors.iter().filter(|p| p.accepts(path)).cloned().collect()
    }

    /// Dispatch a request to every processor that matches its path,
    /// recording how long the request ran for diagnostic logging
    /// (`StartRequestTimer` / `NotifyRequestFinished` in the original
    /// dispatcher).
    pub async fn dispatch(&self, request: Request, reply: Reply) {
        let request_id = uuid::Uuid::new_v4();
        let path = request.path().to_string();
        let span = tracing::info_span!("request", request_id = %request_id, path = %path);
        self.dispatch_inner(request, reply, path).instrument(span).await
    }

    async fn dispatch_inner(&self, request: Request, reply: Reply, path: String) {
        let matched = self.find(&path);
        if matched.is_empty() {
            reply.send_404(format!("no processor registered for {path}"));
            reply.finish();
            return;
        }

        // Every matched processor is notified the request started before
        // any of them begins real work.
        for processor in &matched {
            processor.start(&request, &reply).await;
        }

        let started = Instant::now();
        let pending = Arc::new(AtomicUsize::new(matched.len()));
        let mut tasks = Vec::with_capacity(matched.len());
        for processor in matched {
            let request = request.clone();
            let reply = reply.clone();
            let pending = pending.clone();
            tasks.push(tokio::spawn(async move {
                processor.run(request, reply.clone()).await;
                // The task that drives `pending` to zero is the single
                // point where the disposal fallback and finish logging
                // fire, however many processors were matched.
                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if reply.state() != crate::http::ReplyState::Finished {
                        // a well-behaved processor always finishes its own
                        // reply; this is the disposal hook the original
                        // calls `OnLibh2oFinished` for a generator that
                        // never reached completion on its own.
                        reply.send_500("processor returned without finishing reply");
                        reply.finish();
                    }
                    tracing::debug!(elapsed = ?started.elapsed(), "request finished");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Default for ProcessorDispatch {
    fn default() -> Self {
        ProcessorDispatch::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Uri;
    use std::net::IpAddr;
    use std::sync::atomic::AtomicU32;

    struct Echo;

    #[async_trait]
    impl Processor for Echo {
        fn route(&self) -> &str {
            "/echo"
        }

        async fn run(&self, _request: Request, reply: Reply) {
            reply.send_message(crate::http::Severity::Info, "ok");
            reply.finish();
        }
    }

    /// Two processors matched on the same path: each bumps its own counter
    /// in `start`, only one actually finishes the reply.
    struct CountingStart {
        route: &'static str,
        starts: Arc<AtomicU32>,
        finishes: bool,
    }

    #[async_trait]
    impl Processor for CountingStart {
        fn route(&self) -> &str {
            self.route
        }

        async fn start(&self, _request: &Request, _reply: &Reply) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        async fn run(&self, _request: Request, reply: Reply) {
            if self.finishes {
                reply.send_message(crate::http::Severity::Info, "done");
                reply.finish();
            }
        }
    }

    fn sample_request(path: &str) -> Request {
        let uri: Uri = path.parse().unwrap();
        Request::new(&uri, &hyper::HeaderMap::new(), "127.0.0.1".parse::<IpAddr>().unwrap())
    }

    #[tokio::test]
    async fn dispatches_to_registered_route() {
        let mut table = ProcessorDispatch::new();
        table.register(Arc::new(Echo));
        let reply = Reply::new();
        table.dispatch(sample_request("/echo"), reply.clone()).await;
        assert_eq!(reply.state(), crate::http::ReplyState::Finished);
        assert_eq!(reply.status(), 200);
    }

    #[tokio::test]
    async fn unknown_route_yields_404() {
        let table = ProcessorDispatch::new();
        let reply = Reply::new();
        table.dispatch(sample_request("/nope"), reply.clone()).await;
        assert_eq!(reply.status(), 404);
    }

    #[tokio::test]
    async fn every_matched_processor_starts_before_either_runs() {
        let starts = Arc::new(AtomicU32::new(0));
        let mut table = ProcessorDispatch::new();
        table.register(Arc::new(CountingStart { route: "/multi", starts: starts.clone(), finishes: false }));
        table.register(Arc::new(CountingStart { route: "/multi", starts: starts.clone(), finishes: true }));
        let reply = Reply::new();
        table.dispatch(sample_request("/multi"), reply.clone()).await;
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(reply.state(), crate::http::ReplyState::Finished);
    }

    #[tokio::test]
    async fn unfinished_reply_gets_disposal_fallback() {
        let mut table = ProcessorDispatch::new();
        table.register(Arc::new(CountingStart {
            route: "/silent",
            starts: Arc::new(AtomicU32::new(0)),
            finishes: false,
        }));
        let reply = Reply::new();
        table.dispatch(sample_request("/silent"), reply.clone()).await;
        assert_eq!(reply.state(), crate::http::ReplyState::Finished);
        assert_eq!(reply.status(), 500);
    }
}

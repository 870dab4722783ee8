//! Reply finite state machine (spec §3 "Reply", §4.3).
//!
//! Mirrors `CHttpReply`'s state machine and send helpers from
//! `http_reply.hpp`, minus the libh2o generator callbacks: here the
//! "postponed" state is a plain Tokio task suspended on
//! [`tokio::sync::Notify`] rather than a C generator object waiting on a
//! `StopCB`/`ProceedCB` pair.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::PsgErrorCode;
use crate::http::psg::{Chunk, ReplyCompletion, ReplyMessage, ReplyMimeType, Severity};

/// Lifecycle states of a [`Reply`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Created, no chunk emitted yet.
    Initialized,
    /// At least one chunk has been written to the wire.
    Started,
    /// `reply-completion` has been emitted; no further writes are valid.
    Finished,
}

struct Inner {
    state: ReplyState,
    mime_type: ReplyMimeType,
    status: u16,
    chunks: Vec<Chunk>,
    /// Set once the reply generator has suspended waiting on more data,
    /// the `CDataTrigger` analogue.
    postponed: bool,
    started_at: Instant,
}

/// An in-flight HTTP reply being assembled by a processor and flushed to
/// the connection's write side by the engine.
///
/// Cloning a `Reply` shares the same underlying state (`Arc`); this is how
/// the dispatcher and the connection engine both hold a handle to the same
/// in-flight reply without unsafe aliasing.
#[derive(Clone)]
pub struct Reply {
    inner: Arc<Mutex<Inner>>,
    /// Signalled whenever a new chunk becomes available to a suspended
    /// generator, the Rust analogue of `CDataTrigger::Trigger()`.
    data_ready: Arc<Notify>,
}

impl Reply {
    /// Create a new reply in the `Initialized` state.
    pub fn new() -> Reply {
        Reply {
            inner: Arc::new(Mutex::new(Inner {
                state: ReplyState::Initialized,
                mime_type: ReplyMimeType::NotSet,
                status: 200,
                chunks: Vec::new(),
                postponed: false,
                started_at: Instant::now(),
            })),
            data_ready: Arc::new(Notify::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReplyState {
        self.inner.lock().state
    }

    /// Highest HTTP status emitted so far (the value `reply-completion`
    /// will eventually carry).
    pub fn status(&self) -> u16 {
        self.inner.lock().status
    }

    /// Select the `Content-Type` for the first chunk. A no-op once the
    /// reply has already started (matches `x_SetContentType`'s guard).
    pub fn set_mime_type(&self, mime: ReplyMimeType) {
        let mut inner = self.inner.lock();
        if inner.state == ReplyState::Initialized {
            inner.mime_type = mime;
        }
    }

    /// The selected content type, if any.
    pub fn mime_type(&self) -> ReplyMimeType {
        self.inner.lock().mime_type
    }

    /// Append a chunk, transitioning `Initialized -> Started` on the first
    /// call, and wake any task suspended on [`Self::wait_for_data`].
    pub fn push(&self, chunk: Chunk) {
        {
            let mut inner = self.inner.lock();
            assert_ne!(inner.state, ReplyState::Finished, "push after Finished");
            if inner.state == ReplyState::Initialized {
                inner.state = ReplyState::Started;
            }
            if let Chunk::Message(ReplyMessage { status: "ERROR", .. }) = &chunk {
                if inner.status < 500 {
                    inner.status = 500;
                }
            }
            inner.chunks.push(chunk);
            inner.postponed = false;
        }
        self.data_ready.notify_waiters();
    }

    /// Raise the aggregate status this reply will complete with. The
    /// maximum ever raised wins, matching `x_DoSend`'s status monotonicity.
    pub fn raise_status(&self, status: u16) {
        let mut inner = self.inner.lock();
        if status > inner.status {
            inner.status = status;
        }
    }

    /// Emit a `reply-message` chunk without changing the terminal status.
    pub fn send_message(&self, severity: Severity, message: impl Into<String>) {
        self.push(Chunk::Message(ReplyMessage {
            status: if severity == Severity::Error { "ERROR" } else { "OK" },
            code: None,
            severity,
            message: message.into(),
        }));
    }

    /// Emit an error `reply-message` with a stable PSG error code and raise
    /// the aggregate status accordingly.
    pub fn send_error(&self, status: u16, code: PsgErrorCode, message: impl Into<String>) {
        self.raise_status(status);
        self.push(Chunk::Message(ReplyMessage::error(code, message)));
    }

    /// `Send400` — malformed parameter.
    pub fn send_400(&self, message: impl Into<String>) {
        self.send_error(400, PsgErrorCode::MalformedParameter, message);
    }

    /// `Send401` — missing admin credentials.
    pub fn send_401(&self, message: impl Into<String>) {
        self.send_error(401, PsgErrorCode::InsufficientArguments, message);
    }

    /// `Send404` — unknown route.
    pub fn send_404(&self, message: impl Into<String>) {
        self.send_error(404, PsgErrorCode::UnknownError, message);
    }

    /// `Send409` — conflicting pending request state.
    pub fn send_409(&self, message: impl Into<String>) {
        self.send_error(409, PsgErrorCode::UnknownError, message);
    }

    /// `Send500` — processor raised an untranslated exception.
    pub fn send_500(&self, message: impl Into<String>) {
        self.send_error(500, PsgErrorCode::UnknownError, message);
    }

    /// `Send502` — an upstream data source failed.
    pub fn send_502(&self, message: impl Into<String>) {
        self.send_error(502, PsgErrorCode::UnknownError, message);
    }

    /// `Send503` — admission or throttling rejection.
    pub fn send_503(&self, code: PsgErrorCode, message: impl Into<String>) {
        self.send_error(503, code, message);
    }

    /// Append raw, processor-owned payload bytes.
    pub fn send_data(&self, data: bytes::Bytes) {
        self.push(Chunk::Data(data));
    }

    /// Emit `reply-completion` and transition to `Finished`. Idempotent:
    /// calling it twice is a programmer error and panics, mirroring the
    /// original's `NCBI_THROW` on a double-finish.
    pub fn finish(&self) {
        let elapsed_us;
        {
            let inner = self.inner.lock();
            assert_ne!(inner.state, ReplyState::Finished, "double finish");
            elapsed_us = inner.started_at.elapsed().as_micros() as u64;
        }
        let status = self.status();
        self.push(Chunk::Completion(ReplyCompletion { status, elapsed_us }));
        let mut inner = self.inner.lock();
        inner.state = ReplyState::Finished;
    }

    /// Mark the reply as postponed (the generator has no more data right
    /// now) and return a future that resolves once new data is pushed or
    /// the reply finishes.
    pub async fn wait_for_data(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == ReplyState::Finished {
                return;
            }
            inner.postponed = true;
        }
        self.data_ready.notified().await;
    }

    /// Drain all chunks accumulated so far, leaving the reply's own buffer
    /// empty. The connection engine calls this to flush pending data onto
    /// the wire.
    pub fn drain_chunks(&self) -> Vec<Chunk> {
        std::mem::take(&mut self.inner.lock().chunks)
    }

    /// Whether the generator is currently suspended waiting for more data.
    pub fn is_postponed(&self) -> bool {
        self.inner.lock().postponed
    }
}

impl Default for Reply {
    fn default() -> Self {
        Reply::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_initialized_and_transitions_on_first_chunk() {
        let reply = Reply::new();
        assert_eq!(reply.state(), ReplyState::Initialized);
        reply.send_message(Severity::Info, "hello");
        assert_eq!(reply.state(), ReplyState::Started);
    }

    #[test]
    fn finish_transitions_to_finished_and_emits_completion() {
        let reply = Reply::new();
        reply.send_message(Severity::Info, "hello");
        reply.finish();
        assert_eq!(reply.state(), ReplyState::Finished);
        let chunks = reply.drain_chunks();
        assert!(matches!(chunks.last(), Some(Chunk::Completion(_))));
    }

    #[test]
    #[should_panic(expected = "double finish")]
    fn finishing_twice_panics() {
        let reply = Reply::new();
        reply.finish();
        reply.finish();
    }

    #[test]
    fn status_is_monotonic_maximum() {
        let reply = Reply::new();
        reply.raise_status(404);
        reply.raise_status(200);
        assert_eq!(reply.status(), 404);
    }

    #[test]
    fn error_severity_plain_message_raises_status() {
        let reply = Reply::new();
        reply.send_message(Severity::Info, "still fine");
        assert_eq!(reply.status(), 200);
        reply.send_message(Severity::Error, "malformed parameter");
        assert_eq!(reply.status(), 500);
    }

    #[test]
    fn send_503_sets_status_and_code() {
        let reply = Reply::new();
        reply.send_503(PsgErrorCode::TooManyRequests, "backlog full");
        assert_eq!(reply.status(), 503);
    }

    #[tokio::test]
    async fn wait_for_data_resolves_once_chunk_is_pushed() {
        let reply = Reply::new();
        let waiter = reply.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_data().await;
        });
        // give the waiter a chance to register interest
        tokio::task::yield_now().await;
        reply.send_message(Severity::Info, "ready");
        handle.await.unwrap();
    }

    #[test]
    fn mime_type_is_locked_in_after_first_chunk() {
        let reply = Reply::new();
        reply.set_mime_type(ReplyMimeType::Json);
        reply.send_message(Severity::Info, "hi");
        reply.set_mime_type(ReplyMimeType::Html);
        assert_eq!(reply.mime_type(), ReplyMimeType::Json);
    }
}

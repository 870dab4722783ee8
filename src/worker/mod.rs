//! Worker accept loop (component C).

pub mod listener;

use std::pin::Pin;
use std::sync::Arc;

use hyper::server::conn::Http;
use hyper::service::service_fn;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::admission::Admission;
use crate::alerts::AlertId;
use crate::conn::engine::{handle_one, ConnectionContext};
use crate::conn::ConnectionSlot;
use crate::config::{NetworkConfig, TlsConfig};
use crate::counters::Counters;
use crate::error::{GatewayError, Result};
use crate::gateway::GatewayShared;
use crate::rt::WorkerRuntime;

/// Any transport `hyper::server::conn::Http` can drive a connection over,
/// whether plain TCP or a TLS stream wrapping it.
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Everything a worker thread needs to run its own accept loop.
pub struct Worker {
    id: usize,
    listener: TcpListener,
    network: NetworkConfig,
    shared: Arc<GatewayShared>,
    tls_acceptor: Option<Arc<TlsAcceptor>>,
    runtime: WorkerRuntime,
}

impl Worker {
    /// Build a worker bound to its own cloned listener.
    pub fn new(
        id: usize,
        listener: std::net::TcpListener,
        network: NetworkConfig,
        shared: Arc<GatewayShared>,
        tls_acceptor: Option<Arc<TlsAcceptor>>,
    ) -> std::io::Result<Worker> {
        listener.set_nonblocking(true)?;
        Ok(Worker {
            id,
            listener: TcpListener::from_std(listener)?,
            network,
            shared,
            tls_acceptor,
            runtime: WorkerRuntime::new(std::time::Duration::from_secs(1)),
        })
    }

    /// Run the accept loop until shutdown is requested.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shared.shutdown.wait_for_shutdown() => {
                    tracing::info!(worker = self.id, "worker stopping accept loop");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => self.clone().spawn_connection(stream, peer_addr.ip()),
                        Err(source) => {
                            tracing::warn!(worker = self.id, error = %source, "accept failed");
                        }
                    }
                }
            }
        }
    }

    fn spawn_connection(self: Arc<Self>, stream: tokio::net::TcpStream, peer_ip: std::net::IpAddr) {
        Counters::inc(&self.shared.counters.accepted_connections);

        // The accept-time connection-population check (§4.6): every new
        // connection is counted against the global population *before* it
        // is admitted, so `conn_count_at_open` also doubles as the reading
        // the limit checks below act on.
        let conn_count_at_open = self.shared.registry.len() as u64 + 1;
        let slot = ConnectionSlot::open(peer_ip, conn_count_at_open);
        let limits = &self.shared.limits;

        let over_hard_limit = if conn_count_at_open >= limits.conn_hard_limit {
            Counters::inc(&self.shared.counters.conn_hard_limit_exceeded);
            self.shared.alerts.raise(AlertId::ConnHardLimit);
            true
        } else {
            if conn_count_at_open >= limits.conn_soft_limit {
                slot.mark_exceeded_soft_limit();
                Counters::inc(&self.shared.counters.conn_soft_limit_exceeded);
                self.shared.alerts.raise(AlertId::ConnSoftLimit);
            } else if conn_count_at_open >= limits.conn_alert_limit {
                Counters::inc(&self.shared.counters.conn_alert_limit_exceeded);
                self.shared.alerts.raise(AlertId::ConnAlertLimit);
            }
            false
        };

        self.shared.registry.insert(slot.clone());

        let admission = Arc::new(Admission::new(
            slot.clone(),
            self.network.http_max_running,
            self.network.http_max_backlog,
        ));
        let ctx = Arc::new(ConnectionContext {
            slot: slot.clone(),
            admission,
            shared: self.shared.clone(),
            over_hard_limit,
        });

        let worker = self.clone();
        let tls_acceptor = self.tls_acceptor.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let ctx = ctx.clone();
                async move { handle_one(ctx, req).await }
            });

            let transport: Option<Pin<Box<dyn Transport>>> = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => Some(Box::pin(tls_stream)),
                    Err(source) => {
                        tracing::debug!(worker = worker.id, error = %source, "TLS handshake failed");
                        None
                    }
                },
                None => Some(Box::pin(stream)),
            };

            if let Some(transport) = transport {
                let conn = Http::new().serve_connection(transport, service).with_upgrades();
                tokio::pin!(conn);
                let result = tokio::select! {
                    r = &mut conn => r,
                    _ = slot.wait_close_requested() => {
                        tracing::info!(
                            worker = worker.id,
                            connection = slot.id().value(),
                            "throttling engine closed connection",
                        );
                        Ok(())
                    }
                };
                if let Err(err) = result {
                    tracing::debug!(worker = worker.id, error = %err, "connection ended with error");
                }
            }

            worker.shared.registry.remove(slot.id());
            Counters::inc(&worker.shared.counters.closed_connections);
        });
    }

    /// Run the 1Hz maintenance ticker until shutdown (idle sweep hook; the
    /// throttling pass itself runs as its own top-level task since it needs
    /// visibility across every worker's connections).
    pub async fn run_maintenance(self: Arc<Self>, on_tick: impl Fn(usize) + Send + 'static) {
        let mut ticker = self.runtime.maintain_ticker();
        loop {
            tokio::select! {
                _ = self.shared.shutdown.wait_for_shutdown() => return,
                _ = ticker.tick() => on_tick(self.id),
            }
        }
    }
}

/// Build a TLS acceptor from configuration, or `None` if TLS is disabled.
/// ALPN is offered in HTTP/2-first order so a negotiating client can upgrade
/// to `h2` over the same listener that otherwise speaks HTTP/1.1.
pub fn build_tls_acceptor(tls: &TlsConfig) -> Result<Option<Arc<TlsAcceptor>>> {
    if !tls.ssl_enable {
        return Ok(None);
    }
    // `Config::validate` already guarantees both paths are set when
    // `ssl_enable` is true.
    let cert_path = tls.ssl_cert_file.as_deref().unwrap_or_default();
    let key_path = tls.ssl_key_file.as_deref().unwrap_or_default();

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|source| GatewayError::Tls(source.to_string()))?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Some(Arc::new(TlsAcceptor::from(Arc::new(server_config)))))
}

fn load_certs(path: &str) -> Result<Vec<rustls::Certificate>> {
    let file = std::fs::File::open(path)
        .map_err(|source| GatewayError::Tls(format!("cannot open {path}: {source}")))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .map_err(|source| GatewayError::Tls(format!("cannot parse {path}: {source}")))
        .map(|raw| raw.into_iter().map(rustls::Certificate).collect())
}

fn load_private_key(path: &str) -> Result<rustls::PrivateKey> {
    let file = std::fs::File::open(path)
        .map_err(|source| GatewayError::Tls(format!("cannot open {path}: {source}")))?;
    let mut reader = std::io::BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|source| GatewayError::Tls(format!("cannot parse {path}: {source}")))?;
    let key = keys.pop().ok_or_else(|| GatewayError::Tls(format!("no private key found in {path}")))?;
    Ok(rustls::PrivateKey(key))
}

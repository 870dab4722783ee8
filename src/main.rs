//! Binary entry point: parses the CLI, loads configuration, starts the
//! worker pool and blocks until shutdown.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pubseqd::cli::Cli;
use pubseqd::config::Config;
use pubseqd::counters::Counters;
use pubseqd::dispatch::ProcessorDispatch;
use pubseqd::gateway::GatewayShared;
use pubseqd::shutdown::{run_watchdog, ShutdownData, ShutdownReason};
use pubseqd::throttling::Decision;
use pubseqd::worker::{build_tls_acceptor, listener, Worker};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    pubseqd::logging::init(&config.logging);

    if let Some(pidfile) = &cli.pidfile {
        if let Err(source) = std::fs::write(pidfile, std::process::id().to_string()) {
            tracing::error!(path = %pidfile.display(), error = %source, "failed to write pidfile");
            return ExitCode::from(1);
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.network.workers)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(source) => {
            eprintln!("failed to start async runtime: {source}");
            return ExitCode::from(1);
        }
    };

    let exit = runtime.block_on(run(config));
    ExitCode::from(exit)
}

async fn run(config: Config) -> u8 {
    let addr = std::net::SocketAddr::new(config.network.address, config.network.port);
    let shared_socket = match listener::bind(addr, config.network.backlog) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind listener");
            return 1;
        }
    };

    let tls_acceptor = match build_tls_acceptor(&config.tls) {
        Ok(acceptor) => acceptor,
        Err(err) => {
            tracing::error!(error = %err, "failed to build TLS acceptor");
            return 1;
        }
    };

    let dispatch = Arc::new(ProcessorDispatch::new());
    let counters = Arc::new(Counters::new());
    let shutdown = ShutdownData::new(config.shutdown.term_grace_period, config.shutdown.shutdown_if_too_many_open_fd);
    let shared = GatewayShared::new(&config, dispatch, counters, shutdown.clone());

    let mut workers = Vec::with_capacity(config.network.workers);
    for id in 0..config.network.workers {
        let std_listener = match listener::clone_for_worker(&shared_socket) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(worker = id, error = %err, "failed to clone listener");
                return 1;
            }
        };
        let worker = match Worker::new(id, std_listener, config.network.clone(), shared.clone(), tls_acceptor.clone()) {
            Ok(worker) => Arc::new(worker),
            Err(source) => {
                tracing::error!(worker = id, error = %source, "failed to start worker");
                return 1;
            }
        };
        workers.push(tokio::spawn(worker.run()));
    }

    let throttling = tokio::spawn(run_throttling_loop(shared.clone()));

    let watchdog_shutdown = shutdown.clone();
    let watchdog = tokio::spawn(run_watchdog(watchdog_shutdown, |reason| {
        tracing::warn!(?reason, "shutdown watchdog firing, terminating process");
        std::process::exit(exit_code_for(reason));
    }));

    tokio::select! {
        _ = signal_wait(&shutdown) => {}
        _ = shutdown.wait_for_shutdown() => {}
    }

    for worker in workers {
        let _ = worker.await;
    }
    throttling.abort();
    watchdog.abort();
    0
}

/// Exit code the watchdog's hard-exit terminates the process with: a clean
/// operator-requested interrupt is `0`, everything else (grace-period
/// expiry, FD pressure) is `1`.
fn exit_code_for(reason: ShutdownReason) -> i32 {
    match reason {
        ShutdownReason::Interrupt => 0,
        ShutdownReason::GracePeriodExpired | ShutdownReason::TooManyOpenFds => 1,
    }
}

/// Periodically walk every open connection and apply the throttling
/// engine's decision (component I, §4.7), requesting that the idlest
/// over-limit connection close itself.
async fn run_throttling_loop(shared: Arc<GatewayShared>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shared.shutdown.wait_for_shutdown() => return,
            _ = ticker.tick() => {}
        }
        let connections = shared.registry.snapshot();
        for slot in &connections {
            let registry = shared.registry.clone();
            let decision = shared.throttling.check(slot, || registry.snapshot());
            if decision == Decision::CloseThis {
                tracing::info!(connection = slot.id().value(), "throttling engine requesting connection close");
                slot.request_close();
            }
        }
    }
}

/// Wait for a termination signal, applying the documented SIGINT/SIGTERM
/// distinction: SIGINT drains immediately with no grace period, SIGTERM
/// grants `term_grace_period` before the watchdog hard-exits.
async fn signal_wait(shutdown: &ShutdownData) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = int.recv() => {
            tracing::info!("received SIGINT, starting fast shutdown");
            shutdown.begin_fast();
        }
        _ = term.recv() => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
            shutdown.begin();
        }
    }
}

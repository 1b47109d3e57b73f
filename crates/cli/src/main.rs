//! The `wiretap` binary: loads configuration, builds the I/O runtime and
//! runs the proxy with a logging event subscriber attached.
//!
//! Usage: `wiretap [config.json]`

use std::process::ExitCode;

use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use wiretap_proxy::{Proxy, ProxyConfig, ProxyEvent};

fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
        return ExitCode::FAILURE;
    }

    let config = match std::env::args().nth(1) {
        Some(path) => match ProxyConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path, cause = %e, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };

    let workers = config.resolved_worker_threads();
    info!(listen_port = config.listen_port, workers, "starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(cause = %e, "cannot build runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let proxy = match Proxy::bind(&config) {
            Ok(proxy) => proxy,
            Err(e) => {
                error!(port = config.listen_port, cause = %e, "cannot bind listener");
                return ExitCode::FAILURE;
            }
        };

        tokio::spawn(log_events(proxy.subscribe()));
        proxy.run().await;
        ExitCode::SUCCESS
    })
}

/// Stand-in for an external sink: logs each transaction lifecycle event.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<ProxyEvent>) {
    loop {
        match events.recv().await {
            Ok(ProxyEvent::TransactionStarted { id }) => info!(id, "transaction started"),
            Ok(ProxyEvent::RequestRead { id, request }) => {
                info!(id, method = request.method(), uri = request.uri(), "request");
            }
            Ok(ProxyEvent::ResponseHeadersRead { id, response }) => {
                info!(id, status = response.status_code(), "response headers");
            }
            Ok(ProxyEvent::ResponseRead { id, response }) => {
                info!(id, status = response.status_code(), body_len = response.body().len(), "response");
            }
            Ok(ProxyEvent::TransactionComplete { id }) => info!(id, "transaction complete"),
            Ok(ProxyEvent::TransactionFailed { id, error }) => {
                info!(id, cause = %error, "transaction failed");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                info!(skipped, "event subscriber lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

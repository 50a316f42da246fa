// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod analysis_endpoint;
mod config;
mod http_utils;

use std::io;
use std::sync::Arc;

use hyper::service::service_fn;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use streamstats::analyzer::Analyzer;
use streamstats::collector::Collector;
use streamstats::pruner::Pruner;
use streamstats::store::Store;
use streamstats::worker::{IngestionWorker, ReconnectPolicy};

use crate::analysis_endpoint::{endpoint_handler, AnalysisService};
use crate::config::{ServerConfig, DEFAULT_LOG_LEVEL};

#[tokio::main]
pub async fn main() {
    let config = ServerConfig::from_env();

    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |config| config.log_level.as_str());
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return;
        }
    };

    let collector = match Collector::new(config.stream_url.as_str()) {
        Ok(collector) => collector,
        Err(e) => {
            error!("Error creating stream client: {e}");
            return;
        }
    };

    let store = Arc::new(Store::new());
    let root_token = CancellationToken::new();

    let worker = IngestionWorker::new(
        collector,
        Arc::clone(&store),
        ReconnectPolicy::FixedDelay(config.reconnect_delay),
        root_token.clone(),
    );
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.spin().await {
            debug!("Worker stopped: {e}");
        }
    });

    let pruner = Pruner::new(Arc::clone(&store), config.prune_interval, root_token.clone());
    let pruner_handle = tokio::spawn(pruner.spin());

    let analyzer: Arc<dyn AnalysisService + Send + Sync> =
        Arc::new(Analyzer::new(Arc::clone(&store), config.stream_url.as_str()));

    let listener = match TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Error binding {}: {e}", config.addr);
            root_token.cancel();
            return;
        }
    };
    info!("Server listening on {}", config.addr);

    if let Err(e) = serve(
        listener,
        analyzer,
        &config,
        root_token,
        worker_handle,
        pruner_handle,
    )
    .await
    {
        error!("Server error: {e}");
    }
}

/// Accepts connections until a shutdown signal arrives, then drains in-flight
/// connections and background tasks for at most the configured shutdown timeout.
async fn serve(
    listener: TcpListener,
    analyzer: Arc<dyn AnalysisService + Send + Sync>,
    config: &ServerConfig,
    root_token: CancellationToken,
    worker_handle: JoinHandle<()>,
    pruner_handle: JoinHandle<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Outlives the root token so that in-flight requests can finish during the grace period.
    let requests_token = CancellationToken::new();

    let service = {
        let requests_token = requests_token.clone();
        service_fn(move |req| {
            let analyzer = Arc::clone(&analyzer);
            let cancel_token = requests_token.child_token();
            async move { endpoint_handler(analyzer, req, cancel_token).await }
        })
    };

    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let conn = tokio::select! {
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    root_token.cancel();
                    return Err(e.into());
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
            () = &mut shutdown => break,
        };
        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        let shutdown_token = root_token.clone();
        joinset.spawn(async move {
            let conn = server.serve_connection(conn, service);
            tokio::pin!(conn);
            let result = tokio::select! {
                result = conn.as_mut() => result,
                () = shutdown_token.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };
            if let Err(e) = result {
                error!("Connection error: {e}");
            }
        });
    }

    info!("Shutting down, waiting up to {:?}", config.shutdown_timeout);
    root_token.cancel();
    drop(listener);

    let drain = async {
        while joinset.join_next().await.is_some() {}
        let _ = worker_handle.await;
        let _ = pruner_handle.await;
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!("Shutdown timed out, aborting remaining connections");
        requests_token.cancel();
        joinset.abort_all();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error listening for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Error listening for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

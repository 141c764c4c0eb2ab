use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use gemini_relay::config::{load_config, AppConfig};
use gemini_relay::observability::init_tracing;
use gemini_relay::routing::dispatch::{dispatch_request, normalize_base_path};
use gemini_relay::state::AppState;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => exit_with(&format!(
            "Failed to load configuration from '{config_path}': {err}\n\
             Copy 'config.example.yaml' to 'config.yaml' or set {} and retry.",
            gemini_relay::config::API_KEY_ENV
        )),
    };

    init_tracing(&config.features.log_level);

    let runtime = match relay_runtime(config.server.runtime_worker_threads) {
        Ok(runtime) => runtime,
        Err(err) => exit_with(&format!("Failed to initialize Tokio runtime: {err}")),
    };
    runtime.block_on(serve(config));
}

fn exit_with(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

/// One worker thread selects the current-thread scheduler.
fn relay_runtime(worker_threads: Option<usize>) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = match worker_threads {
        Some(1) => tokio::runtime::Builder::new_current_thread(),
        Some(threads) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(threads);
            builder
        }
        None => tokio::runtime::Builder::new_multi_thread(),
    };
    builder.enable_io().enable_time().build()
}

async fn serve(config: AppConfig) {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let base_path: Arc<str> = Arc::from(normalize_base_path(&config.server.base_path));

    let state = match AppState::from_config(config) {
        Ok(state) => Arc::new(state),
        Err(err) => exit_with(&format!("Failed to initialize upstream client: {err}")),
    };

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => exit_with(&format!("Failed to bind to {bind_addr}: {err}")),
    };

    tracing::info!(
        addr = %bind_addr,
        base_path = %base_path,
        model = state.endpoint.model(),
        upstream = state.endpoint.upstream_host(),
        "gemini-relay listening"
    );

    tokio::select! {
        () = accept_connections(listener, state, base_path) => {}
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received, no longer accepting connections");
        }
    }
}

async fn accept_connections(listener: TcpListener, state: Arc<AppState>, base_path: Arc<str>) {
    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!("accept error: {err}");
                continue;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let conn_builder = conn_builder.clone();
        let state = Arc::clone(&state);
        let base_path = Arc::clone(&base_path);
        let service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(
                Arc::clone(&state),
                Arc::clone(&base_path),
                request.map(Body::new),
            )
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("connection from {remote_addr} ended with error: {err:#}");
            }
        });
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

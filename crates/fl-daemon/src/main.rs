//! fl-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads configuration,
//! connects and migrates the store, wires the shared state and background
//! tasks, and runs the HTTP server with graceful shutdown. All route
//! handlers live in `routes.rs`; all shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use fl_config::Config;
use fl_daemon::{routes, state};
use tokio::sync::watch;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Ceiling on any request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;
/// How long in-flight handlers get after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
/// Rate-limit bucket eviction cadence.
const EVICTION_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; silent if the file does not exist. Production injects
    // env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = Config::from_env()?;

    let pool = fl_db::connect(&cfg.database_url, 10).await?;
    fl_db::migrate(&pool).await?;

    let shared = Arc::new(state::AppState::new(pool.clone(), &cfg));

    // Pick up DB keys before the first request; later changes arrive via the
    // refresh task and after admin key mutations.
    shared.keys.refresh().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shared
        .keys
        .spawn_refresh(cfg.key_refresh_interval, shutdown_rx.clone());
    shared.limiter.spawn_eviction(EVICTION_TICK, shutdown_rx.clone());
    shared.batcher.spawn(shutdown_rx.clone());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    let addr: SocketAddr = cfg
        .server
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.server.bind_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("fl-daemon listening on http://{}", addr);

    // Serve on a task so the signal handler can cap the drain window.
    let (close_tx, mut close_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = close_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received; closing intake");
    let _ = close_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(res) => res.context("server task failed")?.context("server crashed")?,
        Err(_) => {
            warn!("drain window elapsed; aborting in-flight handlers");
            server.abort();
        }
    }

    // Order matters: final batch flush needs the pool, so the store closes
    // last.
    shared.batcher.shutdown().await;
    let _ = shutdown_tx.send(true);
    pool.close().await;
    info!("fl-daemon stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// CORS for the admin SPA: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

//! Shared runtime state for fl-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Background tasks
//! (key refresh, bucket eviction, the batch flusher) are spawned by
//! `main.rs`, not here, so tests can compose a state without any tasks
//! running.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use fl_auth::KeyCache;
use fl_batcher::{Batcher, LogSink};
use fl_config::Config;
use fl_ratelimit::RateLimiter;
use fl_schemas::LogRecord;

/// Static build metadata included in the health response.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub pool: PgPool,
    pub keys: Arc<KeyCache>,
    pub limiter: Arc<RateLimiter>,
    pub batcher: Arc<Batcher>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, cfg: &Config) -> Self {
        let keys = Arc::new(KeyCache::new(pool.clone(), cfg.api_keys.iter().cloned()));
        let limiter = Arc::new(RateLimiter::new(
            cfg.ratelimit.rps,
            cfg.ratelimit.burst,
            cfg.ratelimit.enabled,
        ));
        let sink = Arc::new(PgSink { pool: pool.clone() });
        let batcher = Arc::new(Batcher::new(cfg.batch.size, cfg.batch.flush_interval, sink));

        Self {
            pool,
            keys,
            limiter,
            batcher,
            build: BuildInfo {
                service: "fl-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// The batcher's store seam, backed by the shared pool.
pub struct PgSink {
    pool: PgPool,
}

#[async_trait]
impl LogSink for PgSink {
    async fn insert_logs(&self, batch: &[LogRecord]) -> anyhow::Result<()> {
        fl_db::insert_logs(&self.pool, batch).await?;
        Ok(())
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

//! API-key resolution for faultline.
//!
//! A `KeyCache` holds one immutable snapshot of every key that currently
//! authenticates: the union of the static `API_KEYS` list and the active rows
//! of the `api_keys` table. Lookups are O(1) set membership against the
//! snapshot; replacement is atomic via `ArcSwap`, so handlers never observe a
//! half-built set. A background task re-reads the DB on an interval and after
//! admin key mutations.
//!
//! Key material is never logged.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The subject an accepted API key identifies.
#[derive(Debug, Clone)]
pub struct Principal {
    /// The presented key, verbatim. Used as the rate-limiter bucket key;
    /// never logged.
    pub key: String,
}

pub struct KeyCache {
    /// Always-valid ingestion keys from configuration. DB action cannot
    /// revoke these.
    static_keys: HashSet<String>,
    /// Current union of static and active DB keys.
    snapshot: ArcSwap<HashSet<String>>,
    pool: PgPool,
}

impl KeyCache {
    /// Build a cache seeded with the static keys only; call `refresh` (or
    /// start the refresh task) to pick up DB keys.
    pub fn new(pool: PgPool, static_keys: impl IntoIterator<Item = String>) -> Self {
        let static_keys: HashSet<String> =
            static_keys.into_iter().filter(|k| !k.is_empty()).collect();
        let snapshot = ArcSwap::from_pointee(static_keys.clone());
        Self {
            static_keys,
            snapshot,
            pool,
        }
    }

    /// Resolve a presented key. Unknown and inactive keys are
    /// indistinguishable to the caller.
    pub fn resolve(&self, presented: &str) -> Option<Principal> {
        if presented.is_empty() {
            return None;
        }
        if self.snapshot.load().contains(presented) {
            Some(Principal {
                key: presented.to_string(),
            })
        } else {
            None
        }
    }

    /// Number of keys in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Re-read active DB keys and swap in a fresh union snapshot.
    ///
    /// A failed read keeps the last good snapshot: previously known keys are
    /// never evicted by an outage, and the next tick retries.
    pub async fn refresh(&self) {
        match fl_db::list_active_key_secrets(&self.pool).await {
            Ok(db_keys) => {
                self.install(db_keys);
                debug!(keys = self.len(), "key cache refreshed");
            }
            Err(err) => {
                warn!(error = %err, "key cache refresh failed; keeping last snapshot");
            }
        }
    }

    fn install(&self, db_keys: Vec<String>) {
        let mut union = self.static_keys.clone();
        union.extend(db_keys.into_iter().filter(|k| !k.is_empty()));
        self.snapshot.store(Arc::new(union));
    }

    /// Periodic refresh until the shutdown channel flips.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would repeat the startup refresh.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.refresh().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

/// Mint a new high-entropy API key secret.
pub fn generate_api_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    format!("flk_{suffix}")
}

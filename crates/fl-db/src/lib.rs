//! Postgres store for faultline.
//!
//! Raw-SQL access functions over a shared `PgPool`: bulk log inserts, the
//! fingerprint-unique fault upsert, transactional occurrence recording,
//! merges, history/comments, and api-key CRUD. Callers that need an HTTP
//! status distinction get `Option` for not-found; everything else surfaces as
//! `anyhow::Error` with context.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_TEST_DB_URL: &str = "TEST_DATABASE_URL";

pub mod faults;
pub mod keys;
pub mod logs;
pub mod users;

pub use faults::{
    add_comment, add_tags, assign_fault, count_notices, delete_fault, get_fault, list_comments,
    list_faults, list_history, list_notices, merge_faults, record_occurrence, replace_tags,
    set_ignored, set_resolved, upsert_fault_by_fingerprint, CommentRow, FaultFilter,
    FaultHistoryRow, FaultRow, NewFault, NewNotice, NoticeRow,
};
pub use keys::{
    create_api_key, deactivate_api_key, get_api_key, list_active_key_secrets, list_api_keys,
    ApiKeyRow,
};
pub use logs::{
    get_log_by_id, get_log_stats, get_recent_logs, get_time_series, insert_logs, LevelCount,
    LogRow, LogStats, TimeBucket,
};
pub use users::{create_user, get_user, UserRow};

/// Connect with a fixed-size pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Health check: trivial round-trip plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'faults'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
}

/// Integration-test helper: connect using TEST_DATABASE_URL and ensure
/// migrations are applied. Returns `None` (caller should skip) when the env
/// var is unset so `cargo test` passes on machines without Postgres.
pub async fn testkit_db_pool() -> Result<Option<PgPool>> {
    let Ok(url) = std::env::var(ENV_TEST_DB_URL) else {
        return Ok(None);
    };
    let pool = connect(&url, 10).await?;
    migrate(&pool).await?;
    Ok(Some(pool))
}

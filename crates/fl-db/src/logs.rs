//! Log row persistence: bulk inserts from the batcher and the read side for
//! the admin surface (recent, by id, stats, time buckets).

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use fl_schemas::LogRecord;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogRow {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: String,
    pub message: String,
    pub metadata: Value,
}

/// One bulk insert for a whole batch. Arrays are unnested server-side so a
/// thousand-record batch is still a single statement.
pub async fn insert_logs(pool: &PgPool, batch: &[LogRecord]) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut ids = Vec::with_capacity(batch.len());
    let mut timestamps = Vec::with_capacity(batch.len());
    let mut services = Vec::with_capacity(batch.len());
    let mut levels = Vec::with_capacity(batch.len());
    let mut messages = Vec::with_capacity(batch.len());
    let mut metadata = Vec::with_capacity(batch.len());

    for rec in batch {
        ids.push(rec.id);
        timestamps.push(rec.timestamp);
        services.push(rec.service.clone());
        levels.push(rec.level.as_str().to_string());
        messages.push(rec.message.clone());
        metadata.push(Value::Object(rec.metadata.clone()));
    }

    let res = sqlx::query(
        r#"
        insert into logs (id, timestamp, service, level, message, metadata)
        select * from unnest(
            $1::uuid[], $2::timestamptz[], $3::varchar[], $4::text[], $5::text[], $6::jsonb[]
        )
        "#,
    )
    .bind(&ids)
    .bind(&timestamps)
    .bind(&services)
    .bind(&levels)
    .bind(&messages)
    .bind(&metadata)
    .execute(pool)
    .await
    .context("insert_logs failed")?;

    Ok(res.rows_affected())
}

pub async fn get_recent_logs(pool: &PgPool, limit: i64) -> Result<Vec<LogRow>> {
    let rows = sqlx::query(
        r#"
        select id, timestamp, service, level, message, metadata
        from logs
        order by timestamp desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("get_recent_logs failed")?;

    rows.iter().map(map_log_row).collect()
}

pub async fn get_log_by_id(pool: &PgPool, id: Uuid) -> Result<Option<LogRow>> {
    let row = sqlx::query(
        r#"
        select id, timestamp, service, level, message, metadata
        from logs
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("get_log_by_id failed")?;

    row.as_ref().map(map_log_row).transpose()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogStats {
    pub window_secs: i64,
    pub total: i64,
    pub errors: i64,
    pub by_level: Vec<LevelCount>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LevelCount {
    pub level: String,
    pub count: i64,
}

/// Totals over `[now - window, now]`, with a per-level breakdown.
pub async fn get_log_stats(pool: &PgPool, window: Duration) -> Result<LogStats> {
    let since = Utc::now() - window;

    let (total, errors): (i64, i64) = sqlx::query_as(
        r#"
        select count(*)::bigint,
               (count(*) filter (where level in ('ERROR', 'FATAL', 'CRITICAL')))::bigint
        from logs
        where timestamp >= $1
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await
    .context("get_log_stats totals failed")?;

    let rows = sqlx::query(
        r#"
        select level, count(*)::bigint as count
        from logs
        where timestamp >= $1
        group by level
        order by level
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("get_log_stats by-level failed")?;

    let mut by_level = Vec::with_capacity(rows.len());
    for row in rows {
        by_level.push(LevelCount {
            level: row.try_get("level")?,
            count: row.try_get("count")?,
        });
    }

    Ok(LogStats {
        window_secs: window.num_seconds(),
        total,
        errors,
        by_level,
    })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimeBucket {
    pub bucket_start: DateTime<Utc>,
    pub count: i64,
}

/// Epoch-floor bucketing over the window. `bucket_secs` is one of
/// {60, 300, 900, 3600}; the caller validates.
pub async fn get_time_series(
    pool: &PgPool,
    window: Duration,
    bucket_secs: i64,
) -> Result<Vec<TimeBucket>> {
    let since = Utc::now() - window;

    let rows = sqlx::query(
        r#"
        select to_timestamp(floor(extract(epoch from timestamp) / $2) * $2) as bucket_start,
               count(*)::bigint as count
        from logs
        where timestamp >= $1
        group by bucket_start
        order by bucket_start asc
        "#,
    )
    .bind(since)
    .bind(bucket_secs)
    .fetch_all(pool)
    .await
    .context("get_time_series failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(TimeBucket {
            bucket_start: row.try_get("bucket_start")?,
            count: row.try_get("count")?,
        });
    }
    Ok(out)
}

fn map_log_row(row: &sqlx::postgres::PgRow) -> Result<LogRow> {
    Ok(LogRow {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        service: row.try_get("service")?,
        level: row.try_get("level")?,
        message: row.try_get("message")?,
        metadata: row.try_get("metadata")?,
    })
}

//! Fault aggregates, their notices, history and comments.
//!
//! The grouper drives two operations here: `upsert_fault_by_fingerprint`
//! (race-safe group-or-create against the fingerprint unique constraint) and
//! `record_occurrence` (counter increment + notice insert + auto-reopen in
//! one transaction). Everything else is the triage surface.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const FAULT_COLS: &str = "id, error_class, message, location, environment, resolved, ignored, \
                          assignee, tags, occurrence_count, first_seen_at, last_seen_at";

const NOTICE_COLS: &str = "id, fault_id, message, backtrace, context, params, session, cookies, \
                           environment, breadcrumbs, hostname, revision, created_at";

#[derive(Debug, Clone, serde::Serialize)]
pub struct FaultRow {
    pub id: Uuid,
    pub error_class: String,
    pub message: String,
    pub location: String,
    pub environment: String,
    pub resolved: bool,
    pub ignored: bool,
    pub assignee: Option<Uuid>,
    pub tags: Vec<String>,
    pub occurrence_count: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NoticeRow {
    pub id: Uuid,
    pub fault_id: Uuid,
    pub message: String,
    pub backtrace: Value,
    pub context: Option<Value>,
    pub params: Option<Value>,
    pub session: Option<Value>,
    pub cookies: Option<Value>,
    pub environment: String,
    pub breadcrumbs: Value,
    pub hostname: Option<String>,
    pub revision: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FaultHistoryRow {
    pub id: i64,
    pub fault_id: Uuid,
    pub action: String,
    pub actor: Option<Uuid>,
    pub revision: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CommentRow {
    pub id: i64,
    pub fault_id: Uuid,
    pub user_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Fingerprint plus the display message for a fault that may need creating.
#[derive(Debug, Clone)]
pub struct NewFault {
    pub error_class: String,
    pub location: String,
    pub environment: String,
    pub message: String,
}

/// One occurrence to persist under an existing fault.
#[derive(Debug, Clone)]
pub struct NewNotice {
    pub message: String,
    pub backtrace: Value,
    pub context: Option<Value>,
    pub params: Option<Value>,
    pub session: Option<Value>,
    pub cookies: Option<Value>,
    pub environment: String,
    pub breadcrumbs: Value,
    pub hostname: Option<String>,
    pub revision: Option<String>,
}

// ---------------------------------------------------------------------------
// Group-or-create
// ---------------------------------------------------------------------------

/// Find or create the fault for a fingerprint.
///
/// Insert races on `uq_faults_fingerprint`; the loser's `on conflict do
/// nothing` returns no row and reads back the winner's. At most one fault
/// row can exist per fingerprint.
pub async fn upsert_fault_by_fingerprint(
    pool: &PgPool,
    fault: &NewFault,
    now: DateTime<Utc>,
) -> Result<FaultRow> {
    let inserted = sqlx::query(&format!(
        r#"
        insert into faults (id, error_class, message, location, environment, occurrence_count,
                            first_seen_at, last_seen_at)
        values ($1, $2, $3, $4, $5, 0, $6, $6)
        on conflict (error_class, location, environment) do nothing
        returning {FAULT_COLS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(&fault.error_class)
    .bind(&fault.message)
    .bind(&fault.location)
    .bind(&fault.environment)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("upsert_fault insert failed")?;

    if let Some(row) = inserted {
        return map_fault_row(&row);
    }

    let row = sqlx::query(&format!(
        r#"
        select {FAULT_COLS}
        from faults
        where error_class = $1 and location = $2 and environment = $3
        "#
    ))
    .bind(&fault.error_class)
    .bind(&fault.location)
    .bind(&fault.environment)
    .fetch_one(pool)
    .await
    .context("upsert_fault read-back failed")?;

    map_fault_row(&row)
}

/// Record one occurrence against a known fault, all in one transaction:
/// increment the counter, bump `last_seen_at`, refresh the display message,
/// insert the notice, and auto-reopen a resolved fault with a synthetic
/// `unresolved` history entry (actor null).
pub async fn record_occurrence(
    pool: &PgPool,
    fault_id: Uuid,
    seen_at: DateTime<Utc>,
    notice: &NewNotice,
) -> Result<(FaultRow, NoticeRow)> {
    let mut tx = pool.begin().await.context("record_occurrence begin failed")?;

    let (was_resolved,): (bool,) =
        sqlx::query_as("select resolved from faults where id = $1 for update")
            .bind(fault_id)
            .fetch_one(&mut *tx)
            .await
            .context("record_occurrence lock failed")?;

    let fault_row = sqlx::query(&format!(
        r#"
        update faults
           set occurrence_count = occurrence_count + 1,
               last_seen_at = greatest(last_seen_at, $2),
               message = $3,
               resolved = false
         where id = $1
        returning {FAULT_COLS}
        "#
    ))
    .bind(fault_id)
    .bind(seen_at)
    .bind(&notice.message)
    .fetch_one(&mut *tx)
    .await
    .context("record_occurrence update failed")?;

    if was_resolved {
        sqlx::query(
            r#"
            insert into fault_history (fault_id, action, actor, revision, created_at)
            values ($1, 'unresolved', null, $2, $3)
            "#,
        )
        .bind(fault_id)
        .bind(&notice.revision)
        .bind(seen_at)
        .execute(&mut *tx)
        .await
        .context("record_occurrence auto-reopen history failed")?;
    }

    // UUIDv7: time-ordered, lexicographically sortable notice ids.
    let notice_id = Uuid::now_v7();
    let notice_row = sqlx::query(&format!(
        r#"
        insert into notices (id, fault_id, message, backtrace, context, params, session, cookies,
                             environment, breadcrumbs, hostname, revision, created_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        returning {NOTICE_COLS}
        "#
    ))
    .bind(notice_id)
    .bind(fault_id)
    .bind(&notice.message)
    .bind(&notice.backtrace)
    .bind(&notice.context)
    .bind(&notice.params)
    .bind(&notice.session)
    .bind(&notice.cookies)
    .bind(&notice.environment)
    .bind(&notice.breadcrumbs)
    .bind(&notice.hostname)
    .bind(&notice.revision)
    .bind(seen_at)
    .fetch_one(&mut *tx)
    .await
    .context("record_occurrence notice insert failed")?;

    tx.commit().await.context("record_occurrence commit failed")?;

    Ok((map_fault_row(&fault_row)?, map_notice_row(&notice_row)?))
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `source` into `target`: reparent notices, fold the counter and the
/// seen-time span, delete the source (its history and comments cascade).
/// Returns `None` when either fault does not exist.
pub async fn merge_faults(
    pool: &PgPool,
    source_id: Uuid,
    target_id: Uuid,
) -> Result<Option<FaultRow>> {
    let mut tx = pool.begin().await.context("merge_faults begin failed")?;

    // Lock both rows in id order so concurrent merges cannot deadlock.
    let locked = sqlx::query(&format!(
        r#"
        select {FAULT_COLS}
        from faults
        where id = any($1::uuid[])
        order by id
        for update
        "#
    ))
    .bind(vec![source_id, target_id])
    .fetch_all(&mut *tx)
    .await
    .context("merge_faults lock failed")?;

    if locked.len() != 2 {
        return Ok(None);
    }

    let mut source = None;
    for row in &locked {
        let fault = map_fault_row(row)?;
        if fault.id == source_id {
            source = Some(fault);
        }
    }
    let Some(source) = source else { return Ok(None) };

    sqlx::query("update notices set fault_id = $2 where fault_id = $1")
        .bind(source_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await
        .context("merge_faults reparent failed")?;

    let merged = sqlx::query(&format!(
        r#"
        update faults
           set occurrence_count = occurrence_count + $2,
               first_seen_at = least(first_seen_at, $3),
               last_seen_at = greatest(last_seen_at, $4)
         where id = $1
        returning {FAULT_COLS}
        "#
    ))
    .bind(target_id)
    .bind(source.occurrence_count)
    .bind(source.first_seen_at)
    .bind(source.last_seen_at)
    .fetch_one(&mut *tx)
    .await
    .context("merge_faults fold failed")?;

    sqlx::query("delete from faults where id = $1")
        .bind(source_id)
        .execute(&mut *tx)
        .await
        .context("merge_faults delete source failed")?;

    tx.commit().await.context("merge_faults commit failed")?;

    map_fault_row(&merged).map(Some)
}

// ---------------------------------------------------------------------------
// Reads and listing
// ---------------------------------------------------------------------------

pub async fn get_fault(pool: &PgPool, id: Uuid) -> Result<Option<FaultRow>> {
    let row = sqlx::query(&format!("select {FAULT_COLS} from faults where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("get_fault failed")?;

    row.as_ref().map(map_fault_row).transpose()
}

/// Search filter, produced by the daemon's query-language parser.
#[derive(Debug, Clone, Default)]
pub struct FaultFilter {
    pub resolved: Option<bool>,
    /// `None` hides ignored faults (the default listing); `Some` filters
    /// explicitly.
    pub ignored: Option<bool>,
    pub environment: Option<String>,
    pub assignee: Option<String>,
    /// Matches faults carrying any of these tags.
    pub tags: Vec<String>,
    /// Case-insensitive substring terms against class, message and location.
    pub terms: Vec<String>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_faults(pool: &PgPool, filter: &FaultFilter) -> Result<Vec<FaultRow>> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("select {FAULT_COLS} from faults where "));

    match filter.ignored {
        Some(b) => {
            qb.push("ignored = ");
            qb.push_bind(b);
        }
        None => {
            qb.push("ignored = false");
        }
    }

    if let Some(resolved) = filter.resolved {
        qb.push(" and resolved = ");
        qb.push_bind(resolved);
    }
    if let Some(env) = &filter.environment {
        qb.push(" and environment = ");
        qb.push_bind(env.clone());
    }
    if let Some(assignee) = &filter.assignee {
        qb.push(" and assignee::text = ");
        qb.push_bind(assignee.clone());
    }
    if !filter.tags.is_empty() {
        qb.push(" and tags && ");
        qb.push_bind(filter.tags.clone());
        qb.push("::text[]");
    }
    for term in &filter.terms {
        let pattern = like_pattern(term);
        qb.push(" and (error_class ilike ");
        qb.push_bind(pattern.clone());
        qb.push(" or message ilike ");
        qb.push_bind(pattern.clone());
        qb.push(" or location ilike ");
        qb.push_bind(pattern);
        qb.push(")");
    }

    qb.push(" order by last_seen_at desc limit ");
    qb.push_bind(filter.limit.max(1));
    qb.push(" offset ");
    qb.push_bind(filter.offset.max(0));

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("list_faults failed")?;

    rows.iter().map(map_fault_row).collect()
}

/// Escape LIKE wildcards in a user term and wrap it for substring match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub async fn delete_fault(pool: &PgPool, id: Uuid) -> Result<bool> {
    let res = sqlx::query("delete from faults where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("delete_fault failed")?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Lifecycle writes (each appends history)
// ---------------------------------------------------------------------------

pub async fn set_resolved(
    pool: &PgPool,
    id: Uuid,
    resolved: bool,
    actor: Option<Uuid>,
) -> Result<Option<FaultRow>> {
    let action = if resolved { "resolved" } else { "unresolved" };
    lifecycle_update(pool, id, "resolved", resolved, action, actor).await
}

pub async fn set_ignored(
    pool: &PgPool,
    id: Uuid,
    ignored: bool,
    actor: Option<Uuid>,
) -> Result<Option<FaultRow>> {
    let action = if ignored { "ignored" } else { "unignored" };
    lifecycle_update(pool, id, "ignored", ignored, action, actor).await
}

async fn lifecycle_update(
    pool: &PgPool,
    id: Uuid,
    column: &str,
    value: bool,
    action: &str,
    actor: Option<Uuid>,
) -> Result<Option<FaultRow>> {
    let mut tx = pool.begin().await.context("lifecycle begin failed")?;

    let row = sqlx::query(&format!(
        "update faults set {column} = $2 where id = $1 returning {FAULT_COLS}"
    ))
    .bind(id)
    .bind(value)
    .fetch_optional(&mut *tx)
    .await
    .with_context(|| format!("fault {action} update failed"))?;

    let Some(row) = row else { return Ok(None) };

    sqlx::query(
        r#"
        insert into fault_history (fault_id, action, actor)
        values ($1, $2, $3)
        "#,
    )
    .bind(id)
    .bind(action)
    .bind(actor)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("fault {action} history failed"))?;

    tx.commit().await.context("lifecycle commit failed")?;
    map_fault_row(&row).map(Some)
}

pub async fn assign_fault(
    pool: &PgPool,
    id: Uuid,
    assignee: Option<Uuid>,
    actor: Option<Uuid>,
) -> Result<Option<FaultRow>> {
    let mut tx = pool.begin().await.context("assign begin failed")?;

    let row = sqlx::query(&format!(
        "update faults set assignee = $2 where id = $1 returning {FAULT_COLS}"
    ))
    .bind(id)
    .bind(assignee)
    .fetch_optional(&mut *tx)
    .await
    .context("assign_fault update failed")?;

    let Some(row) = row else { return Ok(None) };

    sqlx::query(
        r#"
        insert into fault_history (fault_id, action, actor)
        values ($1, 'assigned', $2)
        "#,
    )
    .bind(id)
    .bind(actor)
    .execute(&mut *tx)
    .await
    .context("assign_fault history failed")?;

    tx.commit().await.context("assign commit failed")?;
    map_fault_row(&row).map(Some)
}

/// Add tags (set union, deduplicated, sorted).
pub async fn add_tags(pool: &PgPool, id: Uuid, tags: &[String]) -> Result<Option<FaultRow>> {
    let row = sqlx::query(&format!(
        r#"
        update faults
           set tags = (
               select coalesce(array_agg(distinct t order by t), '{{}}')
               from unnest(tags || $2::text[]) as u(t)
           )
         where id = $1
        returning {FAULT_COLS}
        "#
    ))
    .bind(id)
    .bind(tags)
    .fetch_optional(pool)
    .await
    .context("add_tags failed")?;

    row.as_ref().map(map_fault_row).transpose()
}

/// Replace the whole tag set (PATCH semantics).
pub async fn replace_tags(pool: &PgPool, id: Uuid, tags: &[String]) -> Result<Option<FaultRow>> {
    let row = sqlx::query(&format!(
        "update faults set tags = $2 where id = $1 returning {FAULT_COLS}"
    ))
    .bind(id)
    .bind(tags)
    .fetch_optional(pool)
    .await
    .context("replace_tags failed")?;

    row.as_ref().map(map_fault_row).transpose()
}

// ---------------------------------------------------------------------------
// Notices, history, comments
// ---------------------------------------------------------------------------

pub async fn list_notices(pool: &PgPool, fault_id: Uuid, limit: i64) -> Result<Vec<NoticeRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {NOTICE_COLS}
        from notices
        where fault_id = $1
        order by created_at desc
        limit $2
        "#
    ))
    .bind(fault_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_notices failed")?;

    rows.iter().map(map_notice_row).collect()
}

pub async fn count_notices(pool: &PgPool, fault_id: Uuid) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from notices where fault_id = $1")
        .bind(fault_id)
        .fetch_one(pool)
        .await
        .context("count_notices failed")?;
    Ok(n)
}

pub async fn list_history(pool: &PgPool, fault_id: Uuid) -> Result<Vec<FaultHistoryRow>> {
    let rows = sqlx::query(
        r#"
        select id, fault_id, action, actor, revision, created_at
        from fault_history
        where fault_id = $1
        order by id asc
        "#,
    )
    .bind(fault_id)
    .fetch_all(pool)
    .await
    .context("list_history failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(FaultHistoryRow {
            id: row.try_get("id")?,
            fault_id: row.try_get("fault_id")?,
            action: row.try_get("action")?,
            actor: row.try_get("actor")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

/// Returns `None` when the fault does not exist.
pub async fn add_comment(
    pool: &PgPool,
    fault_id: Uuid,
    user_id: Option<Uuid>,
    body: &str,
) -> Result<Option<CommentRow>> {
    let row = sqlx::query(
        r#"
        insert into fault_comments (fault_id, user_id, body)
        select $1, $2, $3
        where exists (select 1 from faults where id = $1)
        returning id, fault_id, user_id, body, created_at
        "#,
    )
    .bind(fault_id)
    .bind(user_id)
    .bind(body)
    .fetch_optional(pool)
    .await
    .context("add_comment failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(CommentRow {
        id: row.try_get("id")?,
        fault_id: row.try_get("fault_id")?,
        user_id: row.try_get("user_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    }))
}

pub async fn list_comments(pool: &PgPool, fault_id: Uuid) -> Result<Vec<CommentRow>> {
    let rows = sqlx::query(
        r#"
        select id, fault_id, user_id, body, created_at
        from fault_comments
        where fault_id = $1
        order by id asc
        "#,
    )
    .bind(fault_id)
    .fetch_all(pool)
    .await
    .context("list_comments failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(CommentRow {
            id: row.try_get("id")?,
            fault_id: row.try_get("fault_id")?,
            user_id: row.try_get("user_id")?,
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn map_fault_row(row: &sqlx::postgres::PgRow) -> Result<FaultRow> {
    Ok(FaultRow {
        id: row.try_get("id")?,
        error_class: row.try_get("error_class")?,
        message: row.try_get("message")?,
        location: row.try_get("location")?,
        environment: row.try_get("environment")?,
        resolved: row.try_get("resolved")?,
        ignored: row.try_get("ignored")?,
        assignee: row.try_get("assignee")?,
        tags: row.try_get("tags")?,
        occurrence_count: row.try_get("occurrence_count")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

fn map_notice_row(row: &sqlx::postgres::PgRow) -> Result<NoticeRow> {
    Ok(NoticeRow {
        id: row.try_get("id")?,
        fault_id: row.try_get("fault_id")?,
        message: row.try_get("message")?,
        backtrace: row.try_get("backtrace")?,
        context: row.try_get("context")?,
        params: row.try_get("params")?,
        session: row.try_get("session")?,
        cookies: row.try_get("cookies")?,
        environment: row.try_get("environment")?,
        breadcrumbs: row.try_get("breadcrumbs")?,
        hostname: row.try_get("hostname")?,
        revision: row.try_get("revision")?,
        created_at: row.try_get("created_at")?,
    })
}

//! API key rows. Soft delete only: deactivation clears `active`, the row
//! stays for audit. Secrets are stored verbatim (the key itself is the
//! high-entropy credential) and are never logged.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// An api_keys row as exposed to the admin surface. The secret is not
/// included; it is returned exactly once, at creation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

pub async fn create_api_key(
    pool: &PgPool,
    secret: &str,
    name: &str,
    description: &str,
    created_by: Option<Uuid>,
) -> Result<ApiKeyRow> {
    let row = sqlx::query(
        r#"
        insert into api_keys (id, key, name, description, created_by)
        values ($1, $2, $3, $4, $5)
        returning id, name, description, active, created_at, created_by
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(secret)
    .bind(name)
    .bind(description)
    .bind(created_by)
    .fetch_one(pool)
    .await
    .context("create_api_key failed")?;

    let key = map_key_row(&row)?;
    tracing::info!(api_key_id = %key.id, name = %key.name, "api key created");
    Ok(key)
}

pub async fn get_api_key(pool: &PgPool, id: Uuid) -> Result<Option<ApiKeyRow>> {
    let row = sqlx::query(
        r#"
        select id, name, description, active, created_at, created_by
        from api_keys
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("get_api_key failed")?;

    row.as_ref().map(map_key_row).transpose()
}

/// All keys, active and inactive, newest first.
pub async fn list_api_keys(pool: &PgPool) -> Result<Vec<ApiKeyRow>> {
    let rows = sqlx::query(
        r#"
        select id, name, description, active, created_at, created_by
        from api_keys
        order by created_at desc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_api_keys failed")?;

    rows.iter().map(map_key_row).collect()
}

/// Secrets of active keys only; the key cache's refresh source.
pub async fn list_active_key_secrets(pool: &PgPool) -> Result<Vec<String>> {
    let rows = sqlx::query("select key from api_keys where active")
        .fetch_all(pool)
        .await
        .context("list_active_key_secrets failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row.try_get("key")?);
    }
    Ok(out)
}

/// Soft delete. Returns `true` if an active key was deactivated, `false`
/// when the key was unknown or already inactive.
pub async fn deactivate_api_key(pool: &PgPool, id: Uuid) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update api_keys
           set active = false
         where id = $1 and active
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .context("deactivate_api_key failed")?;

    let deactivated = res.rows_affected() > 0;
    if deactivated {
        tracing::info!(api_key_id = %id, "api key deactivated");
    }
    Ok(deactivated)
}

fn map_key_row(row: &sqlx::postgres::PgRow) -> Result<ApiKeyRow> {
    Ok(ApiKeyRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
    })
}

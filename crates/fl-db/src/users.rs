//! Operator rows. Authentication for operators is external; this table
//! exists so assignees and comment authors have something to reference.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

pub async fn create_user(pool: &PgPool, email: &str, name: &str) -> Result<UserRow> {
    let row = sqlx::query(
        r#"
        insert into users (id, email, name)
        values ($1, $2, $3)
        returning id, email, name, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("create_user failed")?;

    map_user_row(&row)
}

pub async fn get_user(pool: &PgPool, id: Uuid) -> Result<Option<UserRow>> {
    let row = sqlx::query("select id, email, name, created_at from users where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("get_user failed")?;

    row.as_ref().map(map_user_row).transpose()
}

fn map_user_row(row: &sqlx::postgres::PgRow) -> Result<UserRow> {
    Ok(UserRow {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

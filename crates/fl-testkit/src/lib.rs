//! Shared plumbing for integration tests.
//!
//! `maybe_pool` is the one gate for store-coupled tests: it connects and
//! migrates when `TEST_DATABASE_URL` is set and returns `None` otherwise so
//! suites skip cleanly on machines without Postgres.

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

/// Connect + migrate using TEST_DATABASE_URL, or `None` to skip.
pub async fn maybe_pool() -> Result<Option<PgPool>> {
    fl_db::testkit_db_pool().await
}

/// A unique service name so parallel tests never collide on data.
pub fn unique_service() -> String {
    format!("svc-{}", Uuid::new_v4().simple())
}

/// JSON body for `POST /api/v1/logs`.
pub fn log_body(service: &str, level: &str, message: &str, metadata: Value) -> String {
    json!({
        "log": {
            "service": service,
            "level": level,
            "message": message,
            "metadata": metadata,
        }
    })
    .to_string()
}

/// JSON body for `POST /api/v1/notices` with a fixed backtrace location.
pub fn notice_body(class: &str, message: &str, environment: &str) -> String {
    json!({
        "error": {
            "class": class,
            "message": message,
            "backtrace": [{"file": "app/job.rs", "line": 17, "function": "perform"}],
        },
        "server": {"environment_name": environment, "hostname": "test-host"},
        "notifier": {"name": "testkit"},
    })
    .to_string()
}

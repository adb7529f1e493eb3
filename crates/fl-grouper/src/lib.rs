//! The deduplication engine: fingerprints incoming notices and collapses
//! repeats into one fault aggregate.
//!
//! `process` is synchronous end-to-end: the caller gets back the fault
//! snapshot after the counter moved and the persisted notice. Concurrency
//! safety comes from the store: the fingerprint unique constraint for
//! group-or-create, one transaction for the occurrence recording.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;

use fl_db::{FaultRow, NewFault, NewNotice, NoticeRow};
use fl_schemas::NoticeRequest;

pub const DEFAULT_ERROR_CLASS: &str = "UnknownError";
pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_LOCATION: &str = "unknown";

/// The identity of a fault: compared by exact string equality per field.
/// The error message intentionally stays out; it varies per occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub error_class: String,
    pub location: String,
    pub environment: String,
}

impl Fingerprint {
    /// Derive the fingerprint from a notice payload.
    ///
    /// Location priority: `component#action` when both are present, else the
    /// first backtrace frame as `file:line`, else `"unknown"`.
    pub fn derive(req: &NoticeRequest) -> Self {
        let error_class = non_empty(req.error.class.as_deref())
            .unwrap_or(DEFAULT_ERROR_CLASS)
            .to_string();

        let location = derive_location(req);

        let environment = req
            .server
            .as_ref()
            .and_then(|s| non_empty(s.environment_name.as_deref()))
            .unwrap_or(DEFAULT_ENVIRONMENT)
            .to_string();

        Self {
            error_class,
            location,
            environment,
        }
    }
}

fn derive_location(req: &NoticeRequest) -> String {
    if let Some(r) = &req.request {
        if let (Some(component), Some(action)) = (
            non_empty(r.component.as_deref()),
            non_empty(r.action.as_deref()),
        ) {
            return format!("{component}#{action}");
        }
    }

    if let Some(frame) = req.error.backtrace.first() {
        if let Some(file) = non_empty(frame.file.as_deref()) {
            return format!("{file}:{}", frame.line.unwrap_or(0));
        }
    }

    DEFAULT_LOCATION.to_string()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Ingest one notice: find-or-create the fault for its fingerprint, then
/// record the occurrence (counter, last-seen, notice row, auto-reopen) in a
/// single store transaction.
pub async fn process(pool: &PgPool, req: &NoticeRequest) -> Result<(FaultRow, NoticeRow)> {
    let fingerprint = Fingerprint::derive(req);
    let now = Utc::now();
    let message = req.error.message.clone().unwrap_or_default();

    let fault = fl_db::upsert_fault_by_fingerprint(
        pool,
        &NewFault {
            error_class: fingerprint.error_class.clone(),
            location: fingerprint.location.clone(),
            environment: fingerprint.environment.clone(),
            message: message.clone(),
        },
        now,
    )
    .await?;

    let notice = build_notice(req, &fingerprint, message)?;
    let (fault, notice) = fl_db::record_occurrence(pool, fault.id, now, &notice).await?;

    info!(
        fault_id = %fault.id,
        notice_id = %notice.id,
        error_class = %fault.error_class,
        occurrence_count = fault.occurrence_count,
        "notice grouped"
    );

    Ok((fault, notice))
}

fn build_notice(
    req: &NoticeRequest,
    fingerprint: &Fingerprint,
    message: String,
) -> Result<NewNotice> {
    let request = req.request.as_ref();
    let server = req.server.as_ref();

    Ok(NewNotice {
        message,
        backtrace: serde_json::to_value(&req.error.backtrace)?,
        context: request.and_then(|r| r.context.clone()),
        params: request.and_then(|r| r.params.clone()),
        session: request.and_then(|r| r.session.clone()),
        cookies: request.and_then(|r| r.cookies.clone()),
        environment: fingerprint.environment.clone(),
        breadcrumbs: req
            .breadcrumbs
            .as_ref()
            .map(|b| Value::Array(b.trail.clone()))
            .unwrap_or_else(|| Value::Array(Vec::new())),
        hostname: server.and_then(|s| s.hostname.clone()),
        revision: server.and_then(|s| s.revision.clone()),
    })
}

//! Request and response bodies for the HTTP surface. Row types from fl-db
//! serialize directly; these are the envelopes around them.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::state::BuildInfo;
use fl_batcher::BatcherMetrics;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: &'static str,
    pub service: BuildInfo,
    pub database: DatabaseHealth,
    pub batcher: BatcherMetrics,
    pub uptime: u64,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub healthy: bool,
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct LogAccepted {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub accepted: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchItemError>,
    /// Items that validated but could not be enqueued (backpressure).
    #[serde(skip_serializing_if = "is_zero")]
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct NoticeAccepted {
    pub id: Uuid,
    pub fault_id: Uuid,
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct FaultList {
    pub faults: Vec<fl_db::FaultRow>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct FaultDetail {
    pub fault: fl_db::FaultRow,
    pub history: Vec<fl_db::FaultHistoryRow>,
}

#[derive(Debug, Deserialize)]
pub struct FaultQueryParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// PATCH body. `assignee` distinguishes "absent" from an explicit `null`
/// (unassign) via the double Option.
#[derive(Debug, Default, Deserialize)]
pub struct FaultPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub assignee: Option<Option<Uuid>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitParam {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    /// Window length in seconds.
    #[serde(default)]
    pub window: Option<i64>,
    /// Bucket width in seconds: 60, 300, 900 or 3600.
    #[serde(default)]
    pub bucket: Option<i64>,
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The only response that ever carries the secret.
#[derive(Debug, Serialize)]
pub struct KeyCreated {
    pub id: Uuid,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

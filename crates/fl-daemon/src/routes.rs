//! Axum router and all HTTP handlers for fl-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Status mapping lives in `error.rs`; handlers only report error kinds.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use fl_auth::Principal;
use fl_ratelimit::Decision;

use crate::{
    api_types::{
        AssignRequest, BatchItemError, BatchResponse, CommentRequest, CreateKeyRequest,
        DatabaseHealth, FaultDetail, FaultList, FaultPatch, FaultQueryParams, HealthResponse,
        KeyCreated, LimitParam, LogAccepted, MergeRequest, NoticeAccepted, OkResponse,
        TagsRequest, WindowParams,
    },
    auth,
    error::ApiError,
    search,
    state::{uptime_secs, AppState},
};

const DEFAULT_FAULT_LIMIT: i64 = 50;
const MAX_FAULT_LIMIT: i64 = 200;
const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;
const DEFAULT_WINDOW_SECS: i64 = 3600;
const BUCKET_SIZES: [i64; 4] = [60, 300, 900, 3600];

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (trace, CORS, body limit) are **not** applied here;
/// `main.rs` attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/logs", post(ingest_log))
        .route("/api/v1/logs/batch", post(ingest_batch))
        .route("/api/v1/notices", post(ingest_notice))
        .route("/api/v1/faults", get(list_faults))
        .route(
            "/api/v1/faults/:id",
            get(get_fault).patch(patch_fault).delete(delete_fault),
        )
        .route("/api/v1/faults/:id/resolve", post(resolve_fault))
        .route("/api/v1/faults/:id/unresolve", post(unresolve_fault))
        .route("/api/v1/faults/:id/ignore", post(ignore_fault))
        .route("/api/v1/faults/:id/unignore", post(unignore_fault))
        .route("/api/v1/faults/:id/assign", post(assign_fault))
        .route("/api/v1/faults/:id/tags", post(tag_fault))
        .route("/api/v1/faults/:id/merge", post(merge_fault))
        .route("/api/v1/faults/:id/notices", get(fault_notices))
        .route(
            "/api/v1/faults/:id/comments",
            get(fault_comments).post(comment_fault),
        )
        .route("/admin/logs/recent", get(recent_logs))
        .route("/admin/logs/stats", get(log_stats))
        .route("/admin/logs/series", get(log_series))
        .route("/admin/logs/:id", get(log_by_id))
        .route("/admin/keys", get(list_keys).post(create_key))
        .route("/admin/keys/:id", delete(delete_key))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

fn check_rate(st: &AppState, principal: &Principal) -> Result<(), ApiError> {
    match st.limiter.allow(&principal.key) {
        Decision::Accept => Ok(()),
        Decision::Reject { retry_after_secs } => Err(ApiError::RateLimited { retry_after_secs }),
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Json<HealthResponse> {
    let healthy = matches!(fl_db::status(&st.pool).await, Ok(s) if s.ok);

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        service: st.build.clone(),
        database: DatabaseHealth { healthy },
        batcher: st.batcher.metrics(),
        uptime: uptime_secs(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/v1/logs
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_log(
    State(st): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<LogAccepted>), ApiError> {
    check_rate(&st, &principal)?;

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let payload = fl_ingest::parse_single(content_type, &body)?;
    let record = fl_ingest::validate(payload, Utc::now())?;

    let id = record.id;
    st.batcher.submit(record)?;

    Ok((StatusCode::CREATED, Json(LogAccepted { id })))
}

// ---------------------------------------------------------------------------
// POST /api/v1/logs/batch
// ---------------------------------------------------------------------------

/// Partial acceptance: a structural parse failure rejects the request, but
/// per-item validation failures only show up in the response body.
pub(crate) async fn ingest_batch(
    State(st): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: String,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    check_rate(&st, &principal)?;

    let submission: fl_schemas::BatchSubmission =
        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))?;

    let now = Utc::now();
    let total = submission.logs.len();
    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut errors = Vec::new();

    for (index, payload) in submission.logs.into_iter().enumerate() {
        match fl_ingest::validate(payload, now) {
            Ok(record) => match st.batcher.submit(record) {
                Ok(()) => accepted += 1,
                Err(_) => rejected += 1,
            },
            Err(err) => errors.push(BatchItemError {
                index,
                field: err.field.to_string(),
                reason: err.reason,
            }),
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(BatchResponse {
            accepted,
            total,
            errors,
            rejected,
        }),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/notices
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_notice(
    State(st): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: String,
) -> Result<(StatusCode, Json<NoticeAccepted>), ApiError> {
    check_rate(&st, &principal)?;

    let request: fl_schemas::NoticeRequest =
        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))?;

    let (fault, notice) = fl_grouper::process(&st.pool, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(NoticeAccepted {
            id: notice.id,
            fault_id: fault.id,
        }),
    ))
}

// ---------------------------------------------------------------------------
// GET /api/v1/faults
// ---------------------------------------------------------------------------

pub(crate) async fn list_faults(
    State(st): State<Arc<AppState>>,
    Query(params): Query<FaultQueryParams>,
) -> Result<Json<FaultList>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_FAULT_LIMIT)
        .clamp(1, MAX_FAULT_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let filter = search::parse_query(params.q.as_deref().unwrap_or(""), limit, offset);
    let faults = fl_db::list_faults(&st.pool, &filter).await?;

    Ok(Json(FaultList {
        faults,
        limit,
        offset,
    }))
}

// ---------------------------------------------------------------------------
// Fault CRUD
// ---------------------------------------------------------------------------

pub(crate) async fn get_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FaultDetail>, ApiError> {
    let fault = fl_db::get_fault(&st.pool, id).await?.ok_or(ApiError::NotFound)?;
    let history = fl_db::list_history(&st.pool, id).await?;
    Ok(Json(FaultDetail { fault, history }))
}

pub(crate) async fn patch_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<FaultPatch>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    let mut fault = fl_db::get_fault(&st.pool, id).await?.ok_or(ApiError::NotFound)?;

    if let Some(tags) = &patch.tags {
        fault = fl_db::replace_tags(&st.pool, id, tags)
            .await?
            .ok_or(ApiError::NotFound)?;
    }
    if let Some(assignee) = patch.assignee {
        fault = fl_db::assign_fault(&st.pool, id, assignee, None)
            .await?
            .ok_or(ApiError::NotFound)?;
    }

    Ok(Json(fault))
}

pub(crate) async fn delete_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    if fl_db::delete_fault(&st.pool, id).await? {
        Ok(Json(OkResponse { ok: true }))
    } else {
        Err(ApiError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Fault lifecycle
// ---------------------------------------------------------------------------

pub(crate) async fn resolve_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    fl_db::set_resolved(&st.pool, id, true, None)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn unresolve_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    fl_db::set_resolved(&st.pool, id, false, None)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn ignore_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    fl_db::set_ignored(&st.pool, id, true, None)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn unignore_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    fl_db::set_ignored(&st.pool, id, false, None)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn assign_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    fl_db::assign_fault(&st.pool, id, req.user_id, None)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn tag_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<TagsRequest>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    fl_db::add_tags(&st.pool, id, &req.tags)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn merge_fault(
    State(st): State<Arc<AppState>>,
    Path(target_id): Path<Uuid>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<fl_db::FaultRow>, ApiError> {
    if req.source_id == target_id {
        return Err(ApiError::validation(
            "source_id",
            "cannot merge a fault into itself",
        ));
    }

    fl_db::merge_faults(&st.pool, req.source_id, target_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// ---------------------------------------------------------------------------
// Fault notices and comments
// ---------------------------------------------------------------------------

pub(crate) async fn fault_notices(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<LimitParam>,
) -> Result<Json<Vec<fl_db::NoticeRow>>, ApiError> {
    if fl_db::get_fault(&st.pool, id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_FAULT_LIMIT)
        .clamp(1, MAX_FAULT_LIMIT);
    Ok(Json(fl_db::list_notices(&st.pool, id, limit).await?))
}

pub(crate) async fn fault_comments(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<fl_db::CommentRow>>, ApiError> {
    if fl_db::get_fault(&st.pool, id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(fl_db::list_comments(&st.pool, id).await?))
}

pub(crate) async fn comment_fault(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> Result<(StatusCode, Json<fl_db::CommentRow>), ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::validation("body", "must not be empty"));
    }

    let comment = fl_db::add_comment(&st.pool, id, req.user_id, req.body.trim())
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok((StatusCode::CREATED, Json(comment)))
}

// ---------------------------------------------------------------------------
// Admin: stored logs
// ---------------------------------------------------------------------------

pub(crate) async fn recent_logs(
    State(st): State<Arc<AppState>>,
    Query(params): Query<LimitParam>,
) -> Result<Json<Vec<fl_db::LogRow>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    Ok(Json(fl_db::get_recent_logs(&st.pool, limit).await?))
}

pub(crate) async fn log_stats(
    State(st): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Result<Json<fl_db::LogStats>, ApiError> {
    let window = window_from(&params)?;
    Ok(Json(fl_db::get_log_stats(&st.pool, window).await?))
}

pub(crate) async fn log_series(
    State(st): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<fl_db::TimeBucket>>, ApiError> {
    let window = window_from(&params)?;
    let bucket = params.bucket.unwrap_or(300);
    if !BUCKET_SIZES.contains(&bucket) {
        return Err(ApiError::validation(
            "bucket",
            "must be one of 60, 300, 900, 3600 seconds",
        ));
    }
    Ok(Json(fl_db::get_time_series(&st.pool, window, bucket).await?))
}

fn window_from(params: &WindowParams) -> Result<chrono::Duration, ApiError> {
    let secs = params.window.unwrap_or(DEFAULT_WINDOW_SECS);
    if secs <= 0 {
        return Err(ApiError::validation("window", "must be positive seconds"));
    }
    Ok(chrono::Duration::seconds(secs))
}

pub(crate) async fn log_by_id(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<fl_db::LogRow>, ApiError> {
    fl_db::get_log_by_id(&st.pool, id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// ---------------------------------------------------------------------------
// Admin: API keys
// ---------------------------------------------------------------------------

pub(crate) async fn list_keys(
    State(st): State<Arc<AppState>>,
) -> Result<Json<Vec<fl_db::ApiKeyRow>>, ApiError> {
    Ok(Json(fl_db::list_api_keys(&st.pool).await?))
}

pub(crate) async fn create_key(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<KeyCreated>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("name", "must not be empty"));
    }

    let secret = fl_auth::generate_api_key();
    let row = fl_db::create_api_key(
        &st.pool,
        &secret,
        req.name.trim(),
        req.description.as_deref().unwrap_or(""),
        None,
    )
    .await?;

    // New keys authenticate immediately, not at the next refresh tick.
    st.keys.refresh().await;

    Ok((
        StatusCode::CREATED,
        Json(KeyCreated {
            id: row.id,
            name: row.name,
            key: secret,
        }),
    ))
}

pub(crate) async fn delete_key(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    if !fl_db::deactivate_api_key(&st.pool, id).await? {
        return Err(ApiError::NotFound);
    }

    // Drop the key from the auth snapshot now, not at the next tick.
    st.keys.refresh().await;

    Ok(Json(OkResponse { ok: true }))
}

//! API-key extraction and the auth middleware.
//!
//! `X-API-Key` is preferred; `Authorization: Bearer <key>` is accepted. The
//! first non-empty value wins. Unknown and inactive keys produce the same
//! 401 as a missing key. Key material never reaches the logs.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, state::AppState};

pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let auth = headers.get("authorization").and_then(|v| v.to_str().ok())?;
    let rest = strip_bearer(auth)?;
    let trimmed = rest.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn strip_bearer(value: &str) -> Option<&str> {
    let value = value.trim_start();
    if value.len() < 7 || !value[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }
    Some(&value[7..])
}

/// Middleware for every route except `/health`: resolve the key and stash
/// the principal for handlers.
pub async fn require_api_key(
    State(st): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(presented) = extract_api_key(req.headers()) else {
        return ApiError::Unauthorized.into_response();
    };
    let Some(principal) = st.keys.resolve(&presented) else {
        return ApiError::Unauthorized.into_response();
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}

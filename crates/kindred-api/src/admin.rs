use anyhow::anyhow;
use axum::{Json, extract::State, http::HeaderMap, response::IntoResponse};
use tracing::info;

use kindred_db::StoreError;

use crate::auth::AppState;
use crate::error::ApiError;

/// The admin surface is gated on a shared token, and answers 404 (not 401)
/// on any mismatch so that probing doesn't reveal the endpoints exist. With
/// no token configured the surface is disabled outright.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let configured = state
        .admin_token
        .as_deref()
        .ok_or(ApiError::Store(StoreError::NotFound("route")))?;

    let presented = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented != configured {
        return Err(StoreError::NotFound("route").into());
    }
    Ok(())
}

/// Run the reaper sweep right now instead of waiting for the next tick.
pub async fn force_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let now = chrono::Utc::now();
    let db = state.clone();
    let report = tokio::task::spawn_blocking(move || db.db.sweep_expired(now))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?;

    info!("Forced sweep: {} rows flipped", report.total());
    Ok(Json(report))
}

/// How far behind the sweep is: rows past their deadline that nothing has
/// flipped yet.
pub async fn expiration_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let now = chrono::Utc::now();
    let db = state.clone();
    let stats = tokio::task::spawn_blocking(move || db.db.expiration_stats(now))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(stats))
}

use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    pub key: Option<String>,
}

/// GET /sync?key= — accept a sync key. Only validation happens here; the
/// resumed work itself is not defined yet.
pub async fn sync(
    State(state): State<AppState>,
    Query(params): Query<SyncQuery>,
) -> Result<StatusCode, AppError> {
    let key = params
        .key
        .filter(|k| !k.is_empty())
        .ok_or(AppError::MissingSyncKey)?;

    let decoded = state.sync_keys.decode(&key).map_err(|e| {
        tracing::warn!(error = %e, "Rejected sync key");
        AppError::InvalidSyncKey(e)
    })?;

    tracing::info!(
        pipe_id = decoded.get("identifier").map(String::as_str).unwrap_or(""),
        "Sync key accepted"
    );
    Ok(StatusCode::ACCEPTED)
}

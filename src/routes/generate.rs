use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;

use crate::app::AppState;
use crate::error::AppError;
use crate::pipes::provision;

pub const SYNC_KEY_HEADER: HeaderName = HeaderName::from_static("x-sync-key");

/// GET /generate — provision a pipe for the signed-in user.
///
/// Responds with the pipe service's body verbatim. The `X-Sync-Key` header
/// carries the new pipe's identifier sealed as a sync key.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let session = state.sessions.load(&jar).session;
    let access_token = session.access_token.ok_or(AppError::MissingToken)?;

    if !state.pipes.is_configured() {
        return Err(AppError::PipesUnconfigured);
    }

    let origin = super::request_origin(&state, &headers);
    let pipe = provision(
        &state.aggregator,
        &state.pipes,
        &state.delegated_service,
        &access_token,
        &origin,
    )
    .await
    .inspect_err(|e| tracing::warn!(error = %e, "Pipe provisioning failed"))?;

    tracing::info!(pipe_id = %pipe.identifier, "Pipe registered");

    let params = BTreeMap::from([
        ("identifier".to_string(), pipe.identifier.clone()),
        ("service".to_string(), pipe.service.clone()),
    ]);
    let mut response = Json(pipe.upstream).into_response();
    match state.sync_keys.encode(&params) {
        Ok(key) => {
            if let Ok(value) = HeaderValue::from_str(&key) {
                response.headers_mut().insert(SYNC_KEY_HEADER, value);
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to seal sync key"),
    }
    Ok(response)
}

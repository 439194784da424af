use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::drain::batch_len;

/// POST /drain/{id} — webhook delivery from the pipe service.
///
/// Always acknowledged with 200 straight away. Array batches bump the
/// counter in a detached task; failures there are only logged.
pub async fn drain_write(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> StatusCode {
    match batch_len(&body) {
        Some(count) => {
            let counters = state.counters.clone();
            tokio::spawn(async move {
                match counters.increment(&id, count).await {
                    Ok(total) => tracing::debug!(pipe_id = %id, count, total, "Drain batch counted"),
                    Err(e) => tracing::error!(pipe_id = %id, count, error = %e, "Drain increment failed"),
                }
            });
        }
        None => tracing::debug!(pipe_id = %id, "Ignoring non-array drain payload"),
    }
    StatusCode::OK
}

/// GET /drain/{id} — `{"total": n}`, or `{"total": null}` if nothing arrived yet
pub async fn drain_read(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let total = match state.counters.get(&id).await {
        Ok(total) => total,
        Err(e) => {
            tracing::error!(pipe_id = %id, error = %e, "Drain read failed");
            None
        }
    };
    Json(json!({ "total": total }))
}

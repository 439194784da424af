pub mod callback;
pub mod drain;
pub mod generate;
pub mod index;
pub mod sync;

#[cfg(test)]
mod tests;

use axum::http::header::HOST;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;

use crate::app::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index))
        .route("/callback", get(callback::callback))
        .route("/generate", get(generate::generate))
        .route("/sync", get(sync::sync))
        .route(
            "/drain/{id}",
            get(drain::drain_read).post(drain::drain_write),
        )
        .with_state(state)
}

/// `scheme://host` this request reached us on, used to build URLs the
/// outside world calls back into.
pub(crate) fn request_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_url {
        return url.clone();
    }
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

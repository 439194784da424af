use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::sync_key::SyncKeyError;

/// Failure talking to the aggregation API or the pipe API. Every variant
/// keeps whatever the upstream sent so it can be surfaced verbatim.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{status} {body}")]
    Status { status: u16, body: String },

    #[error("response missing {field}")]
    MissingField { field: &'static str, body: Value },
}

impl UpstreamError {
    /// The raw upstream payload, `null` when there was none.
    pub fn body(&self) -> Value {
        match self {
            UpstreamError::Transport(_) => Value::Null,
            UpstreamError::Status { body, .. } => Value::String(body.clone()),
            UpstreamError::MissingField { body, .. } => body.clone(),
        }
    }
}

/// Request-level error. Every variant is terminal and maps to a 500.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Configuration(String),

    #[error("missing token")]
    MissingToken,

    /// `/generate` without pipe API credentials; reported as JSON like every
    /// other failure on that route.
    #[error("missing pipes app_key and app_secret settings")]
    PipesUnconfigured,

    #[error("missing authorization code")]
    MissingCode,

    #[error("missing sync key")]
    MissingSyncKey,

    #[error("invalid sync key")]
    InvalidSyncKey(#[source] SyncKeyError),

    /// Code exchange or profile fetch failed during `/callback`.
    #[error("{0}")]
    Callback(#[source] UpstreamError),

    #[error("couldn't get {service} token")]
    Delegation {
        service: String,
        #[source]
        source: UpstreamError,
    },

    #[error("{0}")]
    Provisioning(#[source] UpstreamError),

    #[error("failed to render page: {0}")]
    Render(#[from] askama::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        match &self {
            AppError::Configuration(_)
            | AppError::MissingCode
            | AppError::MissingSyncKey
            | AppError::InvalidSyncKey(_)
            | AppError::Render(_) => (status, self.to_string()).into_response(),
            AppError::Callback(err) => match err {
                UpstreamError::MissingField { body, .. } => {
                    (status, format!("{err} {body}")).into_response()
                }
                _ => (status, err.to_string()).into_response(),
            },
            AppError::MissingToken => (status, Json(json!({ "err": "missing token" }))).into_response(),
            AppError::Delegation { source, .. } => (
                status,
                Json(json!({ "err": self.to_string(), "body": source.body() })),
            )
                .into_response(),
            AppError::PipesUnconfigured | AppError::Provisioning(_) => {
                (status, Json(json!({ "err": self.to_string() }))).into_response()
            }
        }
    }
}

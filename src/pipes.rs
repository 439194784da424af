//! Pipe provisioning.
//!
//! A pipe is a recurring job run by the pipe service: it pulls data from a
//! linked service with a delegated token and POSTs batches to our drain.

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, UpstreamError};
use crate::oauth::client::AggregatorClient;

const PIPE_CATEGORY: &str = "photos";
const PIPE_SCHEDULE: u64 = 1;
const PIPE_EXPIRES_AT: u64 = 1;

#[derive(Debug, Serialize)]
pub struct PipeAuth {
    pub token: String,
}

/// Body of `POST /applications/{key}/pipes`.
#[derive(Debug, Serialize)]
pub struct PipeRegistration {
    pub service: String,
    pub category: &'static str,
    pub schedule: u64,
    pub expires_at: u64,
    pub identifier: String,
    pub target_url: String,
    pub auth: PipeAuth,
}

impl PipeRegistration {
    /// Fresh registration with a random identifier, delivering to
    /// `{origin}/drain/{identifier}`.
    pub fn new(service: &str, origin: &str, delegated_token: String) -> Self {
        let identifier = format!("{:032x}", rand::random::<u128>());
        Self {
            service: service.to_string(),
            category: PIPE_CATEGORY,
            schedule: PIPE_SCHEDULE,
            expires_at: PIPE_EXPIRES_AT,
            target_url: format!("{}/drain/{}", origin.trim_end_matches('/'), identifier),
            identifier,
            auth: PipeAuth {
                token: delegated_token,
            },
        }
    }
}

/// Client for the pipe service, authenticated with the application's own
/// key and secret.
#[derive(Clone)]
pub struct PipeClient {
    http: reqwest::Client,
    api_base_url: String,
    app_key: String,
    app_secret: String,
}

impl PipeClient {
    pub fn new(http: reqwest::Client, api_base_url: &str, app_key: &str, app_secret: &str) -> Self {
        Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            app_key: app_key.to_string(),
            app_secret: app_secret.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.app_key.is_empty() && !self.app_secret.is_empty()
    }

    /// Register `pipe`. Only `201 Created` counts as success; the upstream
    /// body is returned as-is.
    pub async fn register(&self, pipe: &PipeRegistration) -> Result<Value, UpstreamError> {
        let resp = self
            .http
            .post(format!(
                "{}/applications/{}/pipes",
                self.api_base_url,
                urlencoding::encode(&self.app_key)
            ))
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .json(pipe)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if status != StatusCode::CREATED {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// A pipe the remote service accepted.
#[derive(Debug)]
pub struct ProvisionedPipe {
    pub identifier: String,
    pub service: String,
    pub upstream: Value,
}

/// Delegated token → registration → submit. Each step depends on the one
/// before and nothing is retried.
pub async fn provision(
    aggregator: &AggregatorClient,
    pipes: &PipeClient,
    service: &str,
    access_token: &str,
    origin: &str,
) -> Result<ProvisionedPipe, AppError> {
    let delegated = aggregator
        .delegated_token(service, access_token)
        .await
        .map_err(|source| AppError::Delegation {
            service: service.to_string(),
            source,
        })?;

    let pipe = PipeRegistration::new(service, origin, delegated);
    tracing::info!(
        pipe_id = %pipe.identifier,
        service = %pipe.service,
        target_url = %pipe.target_url,
        "Registering pipe"
    );

    let upstream = pipes
        .register(&pipe)
        .await
        .map_err(AppError::Provisioning)?;

    Ok(ProvisionedPipe {
        identifier: pipe.identifier,
        service: pipe.service,
        upstream,
    })
}

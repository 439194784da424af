//! Client for the identity/data aggregation API.

use serde::Deserialize;
use serde_json::Value;

use crate::error::UpstreamError;
use crate::session::Profile;

#[derive(Clone)]
pub struct AggregatorClient {
    http: reqwest::Client,
    api_base_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

impl AggregatorClient {
    pub fn new(
        http: reqwest::Client,
        api_base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Read a response body as JSON, turning non-success statuses into
    /// [`UpstreamError::Status`] with the raw text attached.
    async fn json_body(resp: reqwest::Response) -> Result<Value, UpstreamError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, UpstreamError> {
        let resp = self
            .http
            .post(format!("{}/oauth/access_token", self.api_base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await?;

        let body = Self::json_body(resp).await?;
        match serde_json::from_value::<TokenResponse>(body.clone()) {
            Ok(TokenResponse {
                access_token: Some(token),
            }) if !token.is_empty() => Ok(token),
            _ => Err(UpstreamError::MissingField {
                field: "access_token",
                body,
            }),
        }
    }

    /// Fetch the merged profile for `access_token`.
    pub async fn profile(&self, access_token: &str) -> Result<Profile, UpstreamError> {
        let resp = self
            .http
            .get(format!("{}/profile", self.api_base_url))
            .query(&[("access_token", access_token)])
            .send()
            .await?;

        let body = Self::json_body(resp).await?;
        if !body.is_object() {
            return Err(UpstreamError::MissingField {
                field: "profile body",
                body,
            });
        }
        serde_json::from_value(body.clone()).map_err(|_| UpstreamError::MissingField {
            field: "profile body",
            body,
        })
    }

    /// Ask for `service`'s own access token on behalf of the user.
    pub async fn delegated_token(
        &self,
        service: &str,
        access_token: &str,
    ) -> Result<String, UpstreamError> {
        let resp = self
            .http
            .get(format!("{}/profiles/{}", self.api_base_url, service))
            .query(&[("auth", "true"), ("access_token", access_token)])
            .send()
            .await?;

        let body = Self::json_body(resp).await?;
        match body
            .pointer("/auth/accessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            Some(token) => Ok(token.to_string()),
            None => Err(UpstreamError::MissingField {
                field: "auth.accessToken",
                body,
            }),
        }
    }
}

//! HTTP plumbing shared by the identity and patient adapters.
//!
//! Every request goes through [`ApiClient`], which reads the current bearer
//! token from a [`CredentialSlot`] and sends it as `Authorization: Token <v>`.
//! Only the session store writes to the slot.

pub mod credential;

pub use credential::CredentialSlot;

use crate::config::ApiConfig;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Fallback message when a failed response carries no usable error text.
const GENERIC_FAILURE: &str = "Request failed";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Human-readable message suitable for a login form.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Authenticated JSON client for the records backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    credential: CredentialSlot,
}

impl ApiClient {
    /// Create a client sharing the given credential slot.
    pub fn new(config: &ApiConfig, credential: CredentialSlot) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            credential,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential(&self) -> &CredentialSlot {
        &self.credential
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a request. `authenticated` requests carry the current credential;
    /// credential exchange endpoints must not.
    fn request(&self, method: Method, path: &str, authenticated: bool) -> RequestBuilder {
        let builder = self
            .http
            .request(method, self.url(path))
            .header("Content-Type", "application/json");
        match self.credential.authorization_header() {
            Some(value) if authenticated => builder.header("Authorization", value),
            _ => builder,
        }
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let res = self.request(Method::GET, path, true).query(query).send().await?;
        Self::decode(res).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let res = self.request(Method::POST, path, true).json(body).send().await?;
        Self::decode(res).await
    }

    /// POST without the stored credential (login, second-factor exchange).
    pub async fn post_json_anonymous(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let res = self.request(Method::POST, path, false).json(body).send().await?;
        Self::decode(res).await
    }

    /// Authenticated GET judged on status alone. The body is not read.
    pub async fn get_status(&self, path: &str, query: &[(&str, &str)]) -> Result<(), ApiError> {
        let res = self.request(Method::GET, path, true).query(query).send().await?;
        Self::check_status(res).await.map(|_| ())
    }

    /// Map 401 and other failure statuses to errors. The body is read only
    /// for the error message.
    async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(res)
    }

    async fn decode(res: reqwest::Response) -> Result<Value, ApiError> {
        let text = Self::check_status(res).await?.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Pull the most specific error text out of a failed response body.
///
/// Looks at `error`, then `detail`, then the first `non_field_errors` entry,
/// and falls back to the raw body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = value.get("error").and_then(Value::as_str) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("detail").and_then(Value::as_str) {
            return msg.to_string();
        }
        if let Some(msg) = value
            .get("non_field_errors")
            .and_then(Value::as_array)
            .and_then(|errs| errs.first())
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        GENERIC_FAILURE.to_string()
    } else {
        trimmed.to_string()
    }
}

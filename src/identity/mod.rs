//! Remote identity service: login, token liveness and second-factor login.
//!
//! The session store only talks to the [`IdentityService`] trait; the HTTP
//! adapter lives in [`http`].

pub mod http;

pub use http::HttpIdentityService;

use async_trait::async_trait;
use serde_json::Value;

/// Reply to a username/password login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    /// Credentials accepted; here is the bearer token.
    Token(String),
    /// Credentials accepted but a second factor must be supplied first.
    SecondFactorRequired(SecondFactorChallenge),
}

/// Everything the second-factor flow needs to resume a deferred login.
#[derive(Clone, PartialEq, Eq)]
pub struct SecondFactorChallenge {
    pub user_id: String,
    pub username: String,
    password: String,
    /// Opaque challenge identifier, when the server issues one.
    pub challenge: Option<String>,
}

impl SecondFactorChallenge {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        challenge: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            password: password.into(),
            challenge,
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for SecondFactorChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondFactorChallenge")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The service answered and said no.
    #[error("{message}")]
    Rejected { message: String },
    /// The service could not be reached or did not answer in time.
    #[error("identity service unreachable: {0}")]
    Transport(String),
    #[error("unexpected identity service response: {0}")]
    InvalidResponse(String),
}

impl From<crate::api::ApiError> for IdentityError {
    fn from(err: crate::api::ApiError) -> Self {
        use crate::api::ApiError;
        match err {
            ApiError::Status { message, .. } => Self::Rejected { message },
            ApiError::Unauthorized(status) => Self::Rejected {
                message: format!("Credential rejected (HTTP {status})"),
            },
            ApiError::Transport(e) => Self::Transport(e.to_string()),
            ApiError::Decode(e) => Self::InvalidResponse(e),
        }
    }
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchange credentials for a token, or learn that a second factor is due.
    async fn login(&self, username: &str, password: &str) -> Result<LoginReply, IdentityError>;

    /// Probe whether `token` is still accepted. The caller has already
    /// attached `token` to outgoing requests.
    async fn check_liveness(&self, token: &str) -> Result<(), IdentityError>;

    /// Finish a deferred login with a one-time code. Returns the token.
    async fn verify_second_factor(
        &self,
        challenge: &SecondFactorChallenge,
        code: &str,
    ) -> Result<String, IdentityError>;
}

/// Interpret a login response body.
///
/// `{ "token": ... }` is a success; `{ "requires_2fa": true, "user_id": ... }`
/// defers to the second factor. Anything else is an invalid response.
pub fn parse_login_reply(
    body: &Value,
    username: &str,
    password: &str,
) -> Result<LoginReply, IdentityError> {
    if body.get("requires_2fa").and_then(Value::as_bool) == Some(true) {
        let user_id = body
            .get("user_id")
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                IdentityError::InvalidResponse("second factor requested without user_id".into())
            })?;
        let challenge = body.get("challenge").and_then(scalar_to_string);
        return Ok(LoginReply::SecondFactorRequired(SecondFactorChallenge::new(
            user_id, username, password, challenge,
        )));
    }

    parse_token(body).map(LoginReply::Token)
}

/// Extract a non-empty `token` field.
pub fn parse_token(body: &Value) -> Result<String, IdentityError> {
    match body.get("token").and_then(Value::as_str) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(IdentityError::InvalidResponse(
            "response carried no token".into(),
        )),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

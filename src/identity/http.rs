use super::{parse_login_reply, parse_token, IdentityError, IdentityService, LoginReply, SecondFactorChallenge};
use crate::api::ApiClient;
use async_trait::async_trait;
use serde_json::json;

const LOGIN_PATH: &str = "/api-token-auth/";
const SECOND_FACTOR_PATH: &str = "/2fa/verify-login/";

/// Any authenticated read works as a liveness probe; this one is cheap.
const LIVENESS_PATH: &str = "/api/patients/";

/// Identity service backed by the records REST API.
pub struct HttpIdentityService {
    api: ApiClient,
}

impl HttpIdentityService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn login(&self, username: &str, password: &str) -> Result<LoginReply, IdentityError> {
        let body = self
            .api
            .post_json_anonymous(
                LOGIN_PATH,
                &json!({
                    "username": username,
                    "password": password,
                }),
            )
            .await?;
        parse_login_reply(&body, username, password)
    }

    async fn check_liveness(&self, _token: &str) -> Result<(), IdentityError> {
        self.api
            .get_status(LIVENESS_PATH, &[("limit", "1")])
            .await
            .map_err(IdentityError::from)
    }

    async fn verify_second_factor(
        &self,
        challenge: &SecondFactorChallenge,
        code: &str,
    ) -> Result<String, IdentityError> {
        let body = self
            .api
            .post_json_anonymous(
                SECOND_FACTOR_PATH,
                &json!({
                    "user_id": challenge.user_id,
                    "username": challenge.username,
                    "password": challenge.password(),
                    "code": code,
                }),
            )
            .await?;
        parse_token(&body)
    }
}

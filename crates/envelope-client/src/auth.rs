//! Token endpoint client used for sign-in, refresh and sign-out.

use std::time::Duration;

use async_trait::async_trait;
use envelope_session::{AuthBackend, AuthBackendError};
use envelope_types::TokenGrant;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use url::Url;

use crate::error::GatewayError;
use crate::transport::{DEFAULT_TIMEOUT, error_message, http_client, normalize_base_url};

const TOKEN_PATH: &str = "auth/v1/token";
const LOGOUT_PATH: &str = "auth/v1/logout";

/// [`AuthBackend`] speaking the hosted auth service's token API.
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpAuthBackend {
    pub fn new(base_url: &str, api_key: Option<&str>) -> crate::Result<Self> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        Ok(Self {
            http: http_client(api_key, timeout, None)?,
            base_url: normalize_base_url(base_url)?,
        })
    }

    /// Build from the `[backend]` config section.
    pub fn from_config(config: &envelope_config::BackendConfig) -> crate::Result<Self> {
        Self::with_timeout(
            &config.url,
            config.resolve_api_key().as_deref(),
            config.request_timeout(),
        )
    }

    /// Password sign-in. The caller installs the grant with
    /// [`SessionManager::set_grant`](envelope_session::SessionManager::set_grant).
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<TokenGrant, AuthBackendError> {
        self.token_request("password", json!({ "email": email, "password": password }))
            .await
    }

    fn url(&self, path: &str) -> Result<Url, AuthBackendError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthBackendError::Rejected(format!("invalid URL: {}", e)))
    }

    async fn token_request(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<TokenGrant, AuthBackendError> {
        let response = self
            .http
            .post(self.url(TOKEN_PATH)?)
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(network_error)?;

        if !status.is_success() {
            let message = error_message(status, &bytes);
            tracing::debug!(grant_type, status = status.as_u16(), message = %message, "Token request failed");
            return Err(classify_token_status(status, message));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| AuthBackendError::Transient(format!("malformed token response: {}", e)))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthBackendError> {
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn revoke(&self, access_token: &str) -> Result<(), AuthBackendError> {
        let response = self
            .http
            .post(self.url(LOGOUT_PATH)?)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = response.bytes().await.map_err(network_error)?;
        Err(classify_token_status(status, error_message(status, &bytes)))
    }
}

/// 400/401/403 mean the grant itself is bad; only overload and server errors
/// are worth retrying.
fn classify_token_status(status: StatusCode, message: String) -> AuthBackendError {
    match status.as_u16() {
        408 | 429 => AuthBackendError::Transient(message),
        s if s >= 500 => AuthBackendError::Transient(message),
        _ => AuthBackendError::Rejected(message),
    }
}

fn network_error(e: reqwest::Error) -> AuthBackendError {
    AuthBackendError::Transient(e.to_string())
}

impl From<AuthBackendError> for GatewayError {
    fn from(e: AuthBackendError) -> Self {
        match e {
            AuthBackendError::Rejected(message) => GatewayError::AuthorizationRejected(message),
            AuthBackendError::Transient(message) => GatewayError::TransientNetwork {
                message,
                attempts: 1,
                retries_exhausted: false,
            },
        }
    }
}

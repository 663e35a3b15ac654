// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OAuth2 authorization server access.
//!
//! Village only needs four things from its identity provider: a device code,
//! the device code grant, the refresh token grant, and the user profile. All
//! requests use `application/x-www-form-urlencoded` bodies, and all responses
//! are JSON.

use crate::{auth::TokenSet, config::Settings};

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

/// Scopes requested on login. `offline_access` is what gets us a refresh
/// token.
pub const SCOPES: &str = "openid email profile offline_access";

/// Grant type of the device authorization grant.
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Layer of indirection for the authorization server.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// Begin device authorization.
    async fn request_device_code(&self) -> Result<DeviceCode>;

    /// Ask token endpoint once whether the device code has been approved.
    async fn poll_device_token(&self, device_code: &str) -> Result<TokenResponse>;

    /// Exchange refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken>;

    /// Fetch profile of the user owning the access token.
    async fn userinfo(&self, access_token: &str) -> Result<Value>;
}

/// Device authorization response.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,

    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Polling interval suggested by the server. Not honored, Village polls
    /// at a fixed pace.
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Outcome of one poll against the token endpoint.
#[derive(Debug, PartialEq, Clone)]
pub enum TokenResponse {
    /// User approved, here are the tokens.
    Granted(TokenSet),

    /// Token endpoint answered with an OAuth error code.
    Rejected(GrantError),
}

/// OAuth error codes of the device code grant.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GrantError {
    /// User has not approved yet.
    AuthorizationPending,

    /// Polling too fast.
    SlowDown,

    /// Device code is no longer valid.
    ExpiredToken,

    /// User refused.
    AccessDenied,

    /// Anything else the server felt like saying.
    Other(String),
}

impl From<&str> for GrantError {
    fn from(code: &str) -> Self {
        match code {
            "authorization_pending" => Self::AuthorizationPending,
            "slow_down" => Self::SlowDown,
            "expired_token" => Self::ExpiredToken,
            "access_denied" => Self::AccessDenied,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Refresh token grant response. Only the access token is of interest.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Authorization server reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthorizationServer {
    http: Client,
    domain: String,
    client_id: String,
    audience: String,
}

impl HttpAuthorizationServer {
    /// Construct new authorization server client.
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            domain: domain.into(),
            client_id: client_id.into(),
            audience: audience.into(),
        }
    }

    /// Construct authorization server client from process settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.auth_domain.as_str(),
            settings.client_id.as_str(),
            settings.audience.as_str(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.domain)
    }
}

#[async_trait]
impl AuthorizationServer for HttpAuthorizationServer {
    #[instrument(skip(self), level = "debug")]
    async fn request_device_code(&self) -> Result<DeviceCode> {
        let response = self
            .http
            .post(self.url("/oauth/device/code"))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", SCOPES),
                ("audience", self.audience.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OAuthError::UnexpectedResponse {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|_| OAuthError::UnexpectedResponse {
            status: status.as_u16(),
            body,
        })
    }

    #[instrument(skip(self, device_code), level = "debug")]
    async fn poll_device_token(&self, device_code: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.url("/oauth/token"))
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device_code),
                ("client_id", self.client_id.as_str()),
                ("audience", self.audience.as_str()),
            ])
            .send()
            .await?;

        // INVARIANT: Judge by body, not status.
        //   - Pending authorization comes back as a 4xx with an error code.
        let status = response.status();
        let body = response.text().await?;
        let value: Value = serde_json::from_str(&body).map_err(|_| OAuthError::UnexpectedResponse {
            status: status.as_u16(),
            body: body.clone(),
        })?;

        if value.get("access_token").is_some() {
            let tokens = serde_json::from_value(value)
                .map_err(|_| OAuthError::UnexpectedResponse {
                    status: status.as_u16(),
                    body,
                })?;
            return Ok(TokenResponse::Granted(tokens));
        }

        match serde_json::from_value::<ErrorBody>(value) {
            Ok(error) => {
                debug!("token endpoint says {}", error.error);
                Ok(TokenResponse::Rejected(GrantError::from(error.error.as_str())))
            }
            Err(_) => Err(OAuthError::UnexpectedResponse {
                status: status.as_u16(),
                body,
            }),
        }
    }

    #[instrument(skip(self, refresh_token), level = "debug")]
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken> {
        let response = self
            .http
            .post(self.url("/oauth/token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    #[instrument(skip(self, access_token), level = "debug")]
    async fn userinfo(&self, access_token: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url("/userinfo"))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}

/// Authorization server error types.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Request never got a response, or the response body was cut short.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Server answered with something we cannot make sense of.
    #[error("unexpected response from authorization server ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

/// Friendly result alias :3
pub type Result<T, E = OAuthError> = std::result::Result<T, E>;

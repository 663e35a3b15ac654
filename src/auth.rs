// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Authentication against the Village identity provider.
//!
//! Village authenticates users through the OAuth2 __Device Authorization
//! Grant__. The CLI asks the authorization server for a device code, tells the
//! user where to confirm it in a browser, and then polls the token endpoint
//! until the user approves, denies, or lets the code expire.
//!
//! # Token Lifecycle
//!
//! A successful login yields a [`TokenSet`] that is stored verbatim in the
//! credential store. Every authenticated command goes through the
//! [`TokenManager`] first. The manager decodes the `exp` claim of the access
//! token, and swaps in a fresh access token through the refresh token grant
//! if the current one has expired. Only the access token is ever replaced.
//! Logging out simply deletes the stored token set.
//!
//! # See Also
//!
//! 1. [RFC 8628 - OAuth 2.0 Device Authorization Grant](https://www.rfc-editor.org/rfc/rfc8628)
//! 2. [`device`](crate::auth::device)
//! 3. [`oauth`](crate::auth::oauth)

pub mod device;
pub mod oauth;

use crate::{
    api::{VillageClient, Workspace},
    auth::{
        device::{DeviceFlow, DeviceFlowError},
        oauth::{AuthorizationServer, OAuthError},
    },
    store::{CredentialStore, StoreError},
    workspace::bootstrap_user,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

/// OAuth token set.
///
/// Persisted exactly as the authorization server handed it out. Fields the
/// CLI does not know about are kept so they survive a refresh round trip.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct TokenSet {
    /// JWT used as bearer token against the platform API.
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,

    #[serde(default)]
    pub id_token: String,

    #[serde(default)]
    pub scope: String,

    #[serde(default)]
    pub expires_in: u64,

    #[serde(default)]
    pub token_type: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenSet {
    /// Determine when the access token expires.
    ///
    /// Decodes the payload segment of the access token JWT, and reads its
    /// `exp` claim. The signature is not verified, that is the platform
    /// API's job.
    ///
    /// # Errors
    ///
    /// - Return [`TokenError`] if the access token is not a well-formed JWT
    ///   carrying a numeric `exp` claim.
    pub fn expires_at(&self) -> Result<DateTime<Utc>, TokenError> {
        let payload = self
            .access_token
            .split('.')
            .nth(1)
            .ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        let claims: Claims = serde_json::from_slice(&payload)?;

        DateTime::from_timestamp_millis(claims.exp.saturating_mul(1000))
            .ok_or(TokenError::Malformed)
    }

    /// Check if access token is unusable at given point in time.
    ///
    /// Tokens that cannot be decoded count as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Ok(expiry) => expiry < now,
            Err(err) => {
                debug!("treat access token as expired: {err}");
                true
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
}

/// Keep access tokens fresh.
///
/// Loads tokens from the credential store, and refreshes them through the
/// authorization server when needed.
#[derive(Debug)]
pub struct TokenManager<S>
where
    S: AuthorizationServer,
{
    store: CredentialStore,
    server: S,
}

impl<S> TokenManager<S>
where
    S: AuthorizationServer,
{
    /// Construct new token manager.
    pub fn new(store: CredentialStore, server: S) -> Self {
        Self { store, server }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    /// Obtain a token set whose access token is valid right now.
    ///
    /// # Errors
    ///
    /// - Return [`AuthError::NotLoggedIn`] if there is no stored token set.
    pub async fn valid_tokens(&self) -> Result<TokenSet> {
        self.valid_tokens_at(Utc::now()).await
    }

    /// Obtain a token set whose access token is valid at a given time.
    ///
    /// An expired access token is refreshed once. A failed refresh is not an
    /// error. The user is told to log in again, and the expired token set is
    /// handed back so the following API call fails with an auth error.
    ///
    /// # Errors
    ///
    /// - Return [`AuthError::NotLoggedIn`] if there is no stored token set.
    #[instrument(skip(self), level = "debug")]
    pub async fn valid_tokens_at(&self, now: DateTime<Utc>) -> Result<TokenSet> {
        let mut tokens = self.store.tokens().ok_or(AuthError::NotLoggedIn)?;
        if !tokens.is_expired_at(now) {
            return Ok(tokens);
        }

        debug!("access token expired, refreshing");
        match self.server.refresh(&tokens.refresh_token).await {
            Ok(refreshed) => {
                tokens.access_token = refreshed.access_token;
                if let Err(err) = self.store.save_tokens(&tokens) {
                    warn!("cannot persist refreshed token: {err}");
                }
            }
            Err(err) => {
                warn!("Error refreshing token. Please log in again.");
                debug!("{err:?}");
            }
        }

        Ok(tokens)
    }
}

/// Run the device authorization flow, and persist the resulting token set.
///
/// Nothing is written unless the flow ends up authorized.
///
/// # Errors
///
/// - Return [`AuthError::DeviceFlow`] if the user denies access, the device
///   code expires, or the device code cannot be obtained.
/// - Return [`AuthError::Store`] if tokens cannot be written.
pub async fn login<S>(flow: &DeviceFlow<'_, S>, store: &CredentialStore) -> Result<TokenSet>
where
    S: AuthorizationServer,
{
    let tokens = flow.authorize().await?;
    store.save_tokens(&tokens)?;
    info!("Successfully logged in!");

    Ok(tokens)
}

/// How a login attempt ended.
#[derive(Debug, PartialEq, Clone)]
pub enum LoginOutcome {
    /// A usable token set was stored already. Nothing happened.
    AlreadyLoggedIn,

    /// Fresh tokens were stored, along with a default workspace if one could
    /// be determined.
    LoggedIn {
        tokens: TokenSet,
        workspace: Option<Workspace>,
    },
}

/// Log in unless already logged in, then set up the platform user.
///
/// The user bootstrap is best effort. Its failures are logged at debug level,
/// and never undo the stored tokens.
///
/// # Errors
///
/// - Return [`AuthError::DeviceFlow`] if the user denies access, the device
///   code expires, or the device code cannot be obtained.
/// - Return [`AuthError::Store`] if tokens cannot be written.
#[instrument(skip(flow, store), level = "debug")]
pub async fn login_and_bootstrap<S>(
    flow: &DeviceFlow<'_, S>,
    store: &CredentialStore,
    api_base_url: &str,
) -> Result<LoginOutcome>
where
    S: AuthorizationServer,
{
    if store.is_logged_in() {
        info!("You're logged in! Run `village logout` to log out first.");
        return Ok(LoginOutcome::AlreadyLoggedIn);
    }

    let tokens = login(flow, store).await?;

    // INVARIANT: Tokens stay stored even if the user bootstrap fails.
    let profile = match flow.server().userinfo(&tokens.access_token).await {
        Ok(profile) => profile,
        Err(err) => {
            debug!("cannot fetch user profile: {err}");
            return Ok(LoginOutcome::LoggedIn {
                tokens,
                workspace: None,
            });
        }
    };

    let client = VillageClient::new(api_base_url, tokens.access_token.as_str());
    let workspace = match bootstrap_user(&client, store, &profile).await {
        Ok(workspace) => workspace,
        Err(err) => {
            debug!("cannot set up platform user: {err}");
            None
        }
    };

    Ok(LoginOutcome::LoggedIn { tokens, workspace })
}

/// Access token decoding error types.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Access token does not have three dot separated segments.
    #[error("access token is not a JWT")]
    Malformed,

    /// Payload segment is not valid base64url.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    /// Payload segment does not hold a numeric `exp` claim.
    #[error(transparent)]
    Claims(#[from] serde_json::Error),
}

/// Authentication error types.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token set has been stored yet.
    #[error("not logged in, run `village login` first")]
    NotLoggedIn,

    /// Device authorization did not complete.
    #[error(transparent)]
    DeviceFlow(#[from] DeviceFlowError),

    /// Authorization server request failed.
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    /// Credential store manipulation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendly result alias :3
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::oauth::{DeviceCode, RefreshedToken, TokenResponse};
    use async_trait::async_trait;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Forge an unsigned JWT whose payload carries target `exp` claim.
    pub(crate) fn jwt_expiring_at(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "auth0|42", "exp": exp }).to_string());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    #[derive(Debug, Default)]
    struct RefreshOnly {
        refreshes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AuthorizationServer for RefreshOnly {
        async fn request_device_code(&self) -> Result<DeviceCode, OAuthError> {
            unimplemented!("not used by token manager")
        }

        async fn poll_device_token(&self, _: &str) -> Result<TokenResponse, OAuthError> {
            unimplemented!("not used by token manager")
        }

        async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, OAuthError> {
            assert_eq!(refresh_token, "refresh-me");
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OAuthError::UnexpectedResponse {
                    status: 403,
                    body: r#"{"error":"invalid_grant"}"#.into(),
                });
            }

            Ok(RefreshedToken {
                access_token: "fresh.access.token".into(),
            })
        }

        async fn userinfo(&self, _: &str) -> Result<Value, OAuthError> {
            unimplemented!("not used by token manager")
        }
    }

    fn stored_tokens(exp: i64) -> TokenSet {
        serde_json::from_value(json!({
            "access_token": jwt_expiring_at(exp),
            "refresh_token": "refresh-me",
            "id_token": "id.token.here",
            "scope": "openid email profile offline_access",
            "expires_in": 86400,
            "token_type": "Bearer",
        }))
        .unwrap()
    }

    #[test]
    fn expires_at_decodes_exp_claim() -> anyhow::Result<()> {
        let tokens = stored_tokens(1_700_000_000);
        assert_eq!(tokens.expires_at()?.timestamp(), 1_700_000_000);

        Ok(())
    }

    #[test]
    fn undecodable_tokens_count_as_expired() {
        let now = Utc::now();
        for access_token in ["opaque", "a.%%%.c", "a.e30.c"] {
            let tokens = TokenSet {
                access_token: access_token.into(),
                ..Default::default()
            };
            assert!(tokens.is_expired_at(now), "{access_token} should be expired");
        }
    }

    #[tokio::test]
    async fn fresh_tokens_are_not_refreshed() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = CredentialStore::open(root.path());
        let now = Utc::now();
        let tokens = stored_tokens((now + Duration::hours(1)).timestamp());
        store.save_tokens(&tokens)?;

        let manager = TokenManager::new(store, RefreshOnly::default());
        let result = manager.valid_tokens_at(now).await?;

        assert_eq!(result, tokens);
        assert_eq!(manager.server().refreshes.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_refresh_only_access_token() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = CredentialStore::open(root.path());
        let now = Utc::now();
        let mut tokens = stored_tokens((now - Duration::seconds(1)).timestamp());
        tokens.extra.insert("x-vendor".into(), json!("kept"));
        store.save_tokens(&tokens)?;

        let manager = TokenManager::new(store.clone(), RefreshOnly::default());
        let result = manager.valid_tokens_at(now).await?;

        let mut expect = tokens.clone();
        expect.access_token = "fresh.access.token".into();
        assert_eq!(result, expect);
        assert_eq!(store.tokens(), Some(expect));
        assert_eq!(manager.server().refreshes.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_hands_back_expired_tokens() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = CredentialStore::open(root.path());
        let now = Utc::now();
        let tokens = stored_tokens(now.timestamp() - 60);
        store.save_tokens(&tokens)?;
        let before = std::fs::read_to_string(store.tokens_path())?;

        let server = RefreshOnly {
            fail: true,
            ..Default::default()
        };
        let manager = TokenManager::new(store.clone(), server);
        let result = manager.valid_tokens_at(now).await?;

        assert_eq!(result, tokens);
        assert_eq!(std::fs::read_to_string(store.tokens_path())?, before);
        assert_eq!(manager.server().refreshes.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[tokio::test]
    async fn missing_tokens_mean_not_logged_in() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let manager = TokenManager::new(CredentialStore::open(root.path()), RefreshOnly::default());

        let result = manager.valid_tokens().await;
        assert!(matches!(result, Err(AuthError::NotLoggedIn)));

        Ok(())
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Device authorization flow.
//!
//! The flow is a small state machine:
//!
//! ```text
//! Idle -> CodeRequested -> Polling -> { Authorized, Denied, Expired }
//! ```
//!
//! Polling keeps going on `authorization_pending` and `slow_down`. Village
//! polls at a fixed interval, so `slow_down` does not stretch it. The three
//! terminal states end polling for good. Nothing is sent to the token endpoint
//! once a terminal state has been reached.
//!
//! Transitions are pure, see [`FlowState`]. The [`DeviceFlow`] driver only
//! adds the waiting between polls and the talking to the server.

use crate::auth::{
    oauth::{AuthorizationServer, DeviceCode, GrantError, OAuthError, TokenResponse},
    TokenSet,
};

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Default pace of token endpoint polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// State of device authorization.
#[derive(Debug, PartialEq, Clone)]
pub enum FlowState {
    /// Nothing has happened yet.
    Idle,

    /// Server handed out a device code, user has been told about it.
    CodeRequested(DeviceCode),

    /// Waiting on user approval.
    Polling { device_code: String, attempts: u32 },

    /// User approved.
    Authorized(TokenSet),

    /// User refused.
    Denied,

    /// Device code ran out of time.
    Expired,
}

impl FlowState {
    /// Record device code handed out by the server.
    pub fn code_requested(self, code: DeviceCode) -> Self {
        match self {
            Self::Idle => Self::CodeRequested(code),
            other => other,
        }
    }

    /// Start polling with the device code at hand.
    pub fn start_polling(self) -> Self {
        match self {
            Self::CodeRequested(code) => Self::Polling {
                device_code: code.device_code,
                attempts: 0,
            },
            other => other,
        }
    }

    /// Advance by one response of the token endpoint.
    ///
    /// Only polling states move. Transport failures and unknown error codes
    /// keep polling.
    pub fn advance(self, response: Result<TokenResponse, OAuthError>) -> Self {
        let (device_code, attempts) = match self {
            Self::Polling {
                device_code,
                attempts,
            } => (device_code, attempts.saturating_add(1)),
            other => return other,
        };

        match response {
            Ok(TokenResponse::Granted(tokens)) => Self::Authorized(tokens),
            Ok(TokenResponse::Rejected(GrantError::ExpiredToken)) => Self::Expired,
            Ok(TokenResponse::Rejected(GrantError::AccessDenied)) => Self::Denied,
            Ok(TokenResponse::Rejected(GrantError::AuthorizationPending))
            | Ok(TokenResponse::Rejected(GrantError::SlowDown)) => {
                debug!("authorization still pending after {attempts} polls");
                Self::Polling {
                    device_code,
                    attempts,
                }
            }
            Ok(TokenResponse::Rejected(GrantError::Other(code))) => {
                debug!("ignore unknown token endpoint error {code:?} on poll {attempts}");
                Self::Polling {
                    device_code,
                    attempts,
                }
            }
            Err(err) => {
                debug!("poll {attempts} failed, trying again: {err}");
                Self::Polling {
                    device_code,
                    attempts,
                }
            }
        }
    }

    /// Check if flow is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authorized(_) | Self::Denied | Self::Expired)
    }
}

/// Device authorization driver.
#[derive(Debug)]
pub struct DeviceFlow<'srv, S>
where
    S: AuthorizationServer,
{
    server: &'srv S,
    interval: Duration,
    bar: ProgressBar,
}

impl<'srv, S> DeviceFlow<'srv, S>
where
    S: AuthorizationServer,
{
    /// Construct new device flow against target server.
    ///
    /// Polls every [`POLL_INTERVAL`] without any visible progress by default.
    pub fn new(server: &'srv S) -> Self {
        Self {
            server,
            interval: POLL_INTERVAL,
            bar: ProgressBar::hidden(),
        }
    }

    pub fn server(&self) -> &'srv S {
        self.server
    }

    /// Poll at a different pace.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Show spinner on target progress bar while waiting on the user.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    /// Run the whole flow.
    ///
    /// Requests a device code, tells the user where to enter it, and polls
    /// until the flow reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - Return [`DeviceFlowError::OAuth`] if no device code can be obtained.
    /// - Return [`DeviceFlowError::Expired`] if the device code expires.
    /// - Return [`DeviceFlowError::Denied`] if the user refuses.
    #[instrument(skip(self), level = "debug")]
    pub async fn authorize(&self) -> Result<TokenSet> {
        let code = self.server.request_device_code().await?;
        info!("Verify your login here: {}", code.verification_uri);
        info!("Paste in this auth code: {}", code.user_code);

        let state = FlowState::Idle.code_requested(code).start_polling();
        self.poll(state).await
    }

    /// Drive polling state to completion.
    ///
    /// # Errors
    ///
    /// - Return [`DeviceFlowError::Expired`] if the device code expires.
    /// - Return [`DeviceFlowError::Denied`] if the user refuses.
    pub async fn poll(&self, mut state: FlowState) -> Result<TokenSet> {
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
            self.bar.set_style(style);
        }
        self.bar.set_message("Waiting for authorization...");
        self.bar.enable_steady_tick(Duration::from_millis(100));

        while let FlowState::Polling { device_code, .. } = &state {
            tokio::time::sleep(self.interval).await;
            let response = self.server.poll_device_token(device_code).await;
            state = state.advance(response);
        }
        self.bar.finish_and_clear();

        match state {
            FlowState::Authorized(tokens) => Ok(tokens),
            FlowState::Expired => {
                error!("Authorization expired. Please try again.");
                Err(DeviceFlowError::Expired)
            }
            FlowState::Denied => {
                error!("Authorization denied. Please try again.");
                Err(DeviceFlowError::Denied)
            }
            other => Err(DeviceFlowError::NotStarted(format!("{other:?}"))),
        }
    }
}

/// Device flow error types.
#[derive(Debug, thiserror::Error)]
pub enum DeviceFlowError {
    /// Device code expired before the user approved it.
    #[error("device authorization expired")]
    Expired,

    /// User denied access.
    #[error("device authorization denied")]
    Denied,

    /// Polling was asked to drive a state that never requested a code.
    #[error("device authorization was never started, state is {0}")]
    NotStarted(String),

    /// Authorization server request failed.
    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

/// Friendly result alias :3
pub type Result<T, E = DeviceFlowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{login, oauth::RefreshedToken, AuthError},
        store::CredentialStore,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    /// Token endpoint that plays back a fixed script of responses.
    #[derive(Debug, Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<TokenResponse, OAuthError>>>,
        polls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: impl IntoIterator<Item = Result<TokenResponse, OAuthError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                polls: AtomicUsize::new(0),
            }
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }

        fn leftover(&self) -> usize {
            self.responses.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AuthorizationServer for Scripted {
        async fn request_device_code(&self) -> Result<DeviceCode, OAuthError> {
            Ok(DeviceCode {
                device_code: "dev-123".into(),
                user_code: "ABCD-EFGH".into(),
                verification_uri: "https://village.eu.auth0.com/activate".into(),
                verification_uri_complete: None,
                expires_in: Some(900),
                interval: Some(5),
            })
        }

        async fn poll_device_token(&self, device_code: &str) -> Result<TokenResponse, OAuthError> {
            assert_eq!(device_code, "dev-123");
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("poll after script ran out")
        }

        async fn refresh(&self, _: &str) -> Result<RefreshedToken, OAuthError> {
            unimplemented!("not used by device flow")
        }

        async fn userinfo(&self, _: &str) -> Result<Value, OAuthError> {
            unimplemented!("not used by device flow")
        }
    }

    fn pending() -> Result<TokenResponse, OAuthError> {
        Ok(TokenResponse::Rejected(GrantError::AuthorizationPending))
    }

    fn granted() -> Result<TokenResponse, OAuthError> {
        Ok(TokenResponse::Granted(TokenSet {
            access_token: "a.b.c".into(),
            refresh_token: "r".into(),
            ..Default::default()
        }))
    }

    #[test]
    fn transitions_ignore_states_that_are_not_polling() {
        assert_eq!(FlowState::Idle.advance(granted()), FlowState::Idle);
        assert_eq!(FlowState::Denied.advance(granted()), FlowState::Denied);
        assert_eq!(FlowState::Idle.start_polling(), FlowState::Idle);
    }

    #[test]
    fn transitions_from_polling() {
        let polling = || FlowState::Polling {
            device_code: "dev-123".into(),
            attempts: 0,
        };
        let still_polling = FlowState::Polling {
            device_code: "dev-123".into(),
            attempts: 1,
        };

        assert_eq!(polling().advance(pending()), still_polling);
        assert_eq!(
            polling().advance(Ok(TokenResponse::Rejected(GrantError::SlowDown))),
            still_polling
        );
        assert_eq!(
            polling().advance(Ok(TokenResponse::Rejected(GrantError::Other("huh".into())))),
            still_polling
        );
        assert_eq!(
            polling().advance(Ok(TokenResponse::Rejected(GrantError::ExpiredToken))),
            FlowState::Expired
        );
        assert_eq!(
            polling().advance(Ok(TokenResponse::Rejected(GrantError::AccessDenied))),
            FlowState::Denied
        );
        assert!(polling().advance(granted()).is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn authorized_after_pending_stops_polling() -> anyhow::Result<()> {
        let pending_count = 4;
        let mut script = (0..pending_count).map(|_| pending()).collect::<Vec<_>>();
        script.push(granted());
        // Never reached.
        script.push(pending());
        let server = Scripted::new(script);

        let tokens = DeviceFlow::new(&server).authorize().await?;

        assert_eq!(tokens.access_token, "a.b.c");
        assert_eq!(server.polls(), pending_count + 1);
        assert_eq!(server.leftover(), 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_down_keeps_polling_at_same_pace() -> anyhow::Result<()> {
        let server = Scripted::new([
            Ok(TokenResponse::Rejected(GrantError::SlowDown)),
            pending(),
            granted(),
        ]);

        let started = tokio::time::Instant::now();
        DeviceFlow::new(&server).authorize().await?;

        assert_eq!(server.polls(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= POLL_INTERVAL * 3 && elapsed < POLL_INTERVAL * 4);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn denied_rejects_flow() {
        let server = Scripted::new([pending(), Ok(TokenResponse::Rejected(GrantError::AccessDenied))]);

        let result = DeviceFlow::new(&server).authorize().await;

        assert!(matches!(result, Err(DeviceFlowError::Denied)));
        assert_eq!(server.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_login_writes_nothing() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = CredentialStore::open(root.path().join(".village"));
        let server = Scripted::new([pending(), Ok(TokenResponse::Rejected(GrantError::ExpiredToken))]);

        let flow = DeviceFlow::new(&server);
        let result = login(&flow, &store).await;

        assert!(matches!(
            result,
            Err(AuthError::DeviceFlow(DeviceFlowError::Expired))
        ));
        assert!(!store.tokens_path().exists());
        assert!(!root.path().join(".village").exists());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn authorized_login_persists_tokens() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = CredentialStore::open(root.path().join(".village"));
        let server = Scripted::new([granted()]);

        let flow = DeviceFlow::new(&server).with_interval(Duration::from_secs(1));
        let tokens = login(&flow, &store).await?;

        assert_eq!(store.tokens(), Some(tokens));

        Ok(())
    }
}

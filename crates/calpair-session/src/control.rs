//! Session control client: the request/response half of the backend API.
//!
//! Two commands, both addressed by identity and both idempotent on the
//! backend, which may already be warm or mid-pairing:
//!
//! ```text
//! POST {base}/session/start   {"identity": "u1"}
//! POST {base}/session/logout  {"identity": "u1"}
//! ```
//!
//! The login entry point (`{base}/auth/google`) is a browser-level
//! redirect with no payload, so it is exposed as a URL, not a request.

use std::future::Future;
use std::time::Duration;

use calpair_protocol::{Identity, SessionRequest};
use url::Url;

use crate::SessionError;

const START_PATH: &str = "session/start";
const LOGOUT_PATH: &str = "session/logout";
const LOGIN_PATH: &str = "auth/google";

/// Default per-request timeout for session commands.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts and ends pairing sessions on the backend.
///
/// Callers guarantee a real identity; implementations never see "no
/// session". Retrying either command is always allowed.
pub trait SessionControl: Send + Sync + 'static {
    /// Asks the backend to (re)activate the pairing session for `identity`.
    fn start(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Asks the backend to tear down the session for `identity`.
    fn end(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// [`SessionControl`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSessionControl {
    client: reqwest::Client,
    start_url: Url,
    logout_url: Url,
    login_url: Url,
}

impl HttpSessionControl {
    /// Builds a client rooted at `base`.
    ///
    /// `base` may carry a path prefix (`https://host/api`); a trailing
    /// slash is added so endpoints resolve beneath it.
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, SessionError> {
        let base = normalize_base(base);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SessionError::Client)?;

        Ok(Self {
            client,
            start_url: base.join(START_PATH)?,
            logout_url: base.join(LOGOUT_PATH)?,
            login_url: login_url(&base)?,
        })
    }

    /// The federated-login initiation location.
    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    async fn post(
        &self,
        endpoint: &'static str,
        url: &Url,
        identity: &Identity,
    ) -> Result<(), SessionError> {
        let body = SessionRequest {
            identity: identity.clone(),
        };

        let resp = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| SessionError::Request { endpoint, source })?;

        let status = resp.status();
        if !status.is_success() {
            // The body is only for the error message; a failed read is not
            // worth masking the status over.
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::Rejected {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(endpoint, %identity, "session command accepted");
        Ok(())
    }
}

impl SessionControl for HttpSessionControl {
    async fn start(&self, identity: &Identity) -> Result<(), SessionError> {
        self.post(START_PATH, &self.start_url, identity).await
    }

    async fn end(&self, identity: &Identity) -> Result<(), SessionError> {
        self.post(LOGOUT_PATH, &self.logout_url, identity).await
    }
}

/// Returns `base` with a path ending in `/`, so `Url::join` appends
/// instead of replacing the last segment.
pub fn normalize_base(base: &Url) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// The federated-login initiation location under `base`.
pub fn login_url(base: &Url) -> Result<Url, url::ParseError> {
    normalize_base(base).join(LOGIN_PATH)
}

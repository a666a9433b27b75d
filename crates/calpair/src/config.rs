//! Client configuration.
//!
//! Exactly one setting is required: the backend base URL. Everything else
//! has a default. A missing or unusable backend URL is not a panic and not
//! a constructor error; [`ClientConfig::backend`] reports it as a
//! [`ConfigError`] that the orchestrator keeps on screen for the whole
//! session.

use std::time::Duration;

use calpair_session::{
    DEFAULT_IDENTITY_PARAM, DEFAULT_REQUEST_TIMEOUT, login_url, normalize_base,
};
use tracing::warn;
use url::Url;

use crate::ConfigError;

/// Environment variable holding the backend base URL (required).
pub const BACKEND_URL_ENV: &str = "CALPAIR_BACKEND_URL";
/// Environment variable overriding the identity query parameter name.
pub const IDENTITY_PARAM_ENV: &str = "CALPAIR_IDENTITY_PARAM";
/// Environment variable overriding the pairing timeout, in seconds.
pub const PAIRING_TIMEOUT_ENV: &str = "CALPAIR_PAIRING_TIMEOUT_SECS";
/// Environment variable overriding the command request timeout, in seconds.
pub const REQUEST_TIMEOUT_ENV: &str = "CALPAIR_REQUEST_TIMEOUT_SECS";

/// Default time to wait for the first pairing code or status.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// How the session channel recovers from a dropped transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Delay before the first retry. Doubles per attempt.
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
    /// Give up after this many consecutive failures (0 = never).
    pub max_attempts: u32,
    /// Random extra delay (0..jitter) added to every retry so clients
    /// dropped together don't reconnect together.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether retry number `attempt` (0-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

// ---------------------------------------------------------------------------
// ChannelConfig
// ---------------------------------------------------------------------------

/// Push channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Path of the push endpoint, relative to the backend base. An absolute
    /// `ws://`/`wss://` URL points the channel at a separate host.
    pub path: String,
    /// Close the transport on unsubscribe. When `false` the connection is
    /// parked and reused by the next subscription.
    pub close_on_unsubscribe: bool,
    /// Reconnection behavior for dropped transports.
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: "channel".to_string(),
            close_on_unsubscribe: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for an orchestrator.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL. Required; `None` is reported as a configuration
    /// error at startup.
    pub backend_url: Option<String>,
    /// Query parameter that carries the identity after login.
    pub identity_param: String,
    /// How long to wait in `Bootstrapping`/`AwaitingCode` before giving up.
    /// Zero disables the timer.
    pub pairing_timeout: Duration,
    /// Per-request timeout for `start`/`end`.
    pub request_timeout: Duration,
    /// Push channel settings.
    pub channel: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            identity_param: DEFAULT_IDENTITY_PARAM.to_string(),
            pairing_timeout: DEFAULT_PAIRING_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            channel: ChannelConfig::default(),
        }
    }
}

/// The resolved backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrls {
    /// Base for session commands (always ends in `/`).
    pub base: Url,
    /// `ws://` or `wss://` URL of the push channel.
    pub channel: Url,
    /// Federated-login initiation location.
    pub login: Url,
}

impl ClientConfig {
    /// Upper bound for `pairing_timeout`.
    pub const MAX_PAIRING_TIMEOUT: Duration = Duration::from_secs(3600);

    /// A config pointing at `backend_url` with every other setting default.
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: Some(backend_url.into()),
            ..Self::default()
        }
    }

    /// Reads configuration from the process environment.
    ///
    /// A missing [`BACKEND_URL_ENV`] is not an error here; it surfaces
    /// later through [`backend`](Self::backend).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            backend_url: lookup(BACKEND_URL_ENV).filter(|v| !v.trim().is_empty()),
            ..Self::default()
        };

        if let Some(param) = lookup(IDENTITY_PARAM_ENV) {
            config.identity_param = param;
        }
        if let Some(secs) = read_secs(&lookup, PAIRING_TIMEOUT_ENV) {
            config.pairing_timeout = secs;
        }
        if let Some(secs) = read_secs(&lookup, REQUEST_TIMEOUT_ENV) {
            config.request_timeout = secs;
        }

        config.validated()
    }

    pub fn with_identity_param(mut self, param: impl Into<String>) -> Self {
        self.identity_param = param.into();
        self
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called by the orchestrator constructors. Rules:
    /// - an empty `identity_param` falls back to the default name.
    /// - `pairing_timeout` capped to [`Self::MAX_PAIRING_TIMEOUT`].
    /// - a zero `request_timeout` falls back to the default.
    /// - `reconnect.max_delay` raised to at least `initial_delay`.
    pub fn validated(mut self) -> Self {
        if self.identity_param.trim().is_empty() {
            warn!("identity_param is empty: using default");
            self.identity_param = DEFAULT_IDENTITY_PARAM.to_string();
        }
        if self.pairing_timeout > Self::MAX_PAIRING_TIMEOUT {
            warn!(
                secs = self.pairing_timeout.as_secs(),
                max = Self::MAX_PAIRING_TIMEOUT.as_secs(),
                "pairing_timeout exceeds maximum: clamping"
            );
            self.pairing_timeout = Self::MAX_PAIRING_TIMEOUT;
        }
        if self.request_timeout.is_zero() {
            warn!("request_timeout is zero: using default");
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }
        let reconnect = &mut self.channel.reconnect;
        if reconnect.max_delay < reconnect.initial_delay {
            warn!("reconnect max_delay below initial_delay: raising");
            reconnect.max_delay = reconnect.initial_delay;
        }
        self
    }

    /// The pairing timer duration, or `None` when disabled.
    pub fn pairing_deadline(&self) -> Option<Duration> {
        (!self.pairing_timeout.is_zero()).then_some(self.pairing_timeout)
    }

    /// Resolves the backend URLs, or explains why they can't be.
    pub fn backend(&self) -> Result<BackendUrls, ConfigError> {
        let raw = self
            .backend_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingBackendUrl)?;

        let parsed = Url::parse(raw).map_err(|source| ConfigError::InvalidBackendUrl {
            url: raw.to_string(),
            source,
        })?;

        let ws_scheme = match parsed.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let base = normalize_base(&parsed);
        let invalid = |source| ConfigError::InvalidBackendUrl {
            url: raw.to_string(),
            source,
        };
        let mut channel = base.clone();
        channel
            .set_scheme(ws_scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(ws_scheme.to_string()))?;
        let channel = channel
            .join(self.channel.path.trim_start_matches('/'))
            .map_err(invalid)?;
        let login = login_url(&base).map_err(invalid)?;

        Ok(BackendUrls {
            base,
            channel,
            login,
        })
    }
}

/// Parses a whole-seconds environment value, warning on garbage.
fn read_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            warn!(key, value = %raw, "ignoring non-numeric duration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // =====================================================================
    // backend()
    // =====================================================================

    #[test]
    fn test_backend_missing_returns_error() {
        let config = ClientConfig::default();
        assert!(matches!(config.backend(), Err(ConfigError::MissingBackendUrl)));
    }

    #[test]
    fn test_backend_blank_returns_missing() {
        let config = ClientConfig::new("   ");
        assert!(matches!(config.backend(), Err(ConfigError::MissingBackendUrl)));
    }

    #[test]
    fn test_backend_unparseable_returns_invalid() {
        let config = ClientConfig::new("not a url");
        assert!(matches!(
            config.backend(),
            Err(ConfigError::InvalidBackendUrl { .. })
        ));
    }

    #[test]
    fn test_backend_rejects_non_http_scheme() {
        let config = ClientConfig::new("ftp://files.example");
        assert!(matches!(
            config.backend(),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_backend_http_maps_channel_to_ws() {
        let urls = ClientConfig::new("http://localhost:3000").backend().unwrap();
        assert_eq!(urls.base.as_str(), "http://localhost:3000/");
        assert_eq!(urls.channel.as_str(), "ws://localhost:3000/channel");
        assert_eq!(urls.login.as_str(), "http://localhost:3000/auth/google");
    }

    #[test]
    fn test_backend_https_with_prefix_maps_channel_to_wss() {
        let mut config = ClientConfig::new("https://api.example/v1");
        config.channel.path = "/push".into();
        let urls = config.backend().unwrap();
        assert_eq!(urls.base.as_str(), "https://api.example/v1/");
        assert_eq!(urls.channel.as_str(), "wss://api.example/v1/push");
    }

    #[test]
    fn test_backend_absolute_channel_url_overrides_host() {
        let mut config = ClientConfig::new("https://api.example");
        config.channel.path = "wss://push.example/events".into();
        let urls = config.backend().unwrap();
        assert_eq!(urls.channel.as_str(), "wss://push.example/events");
        assert_eq!(urls.base.as_str(), "https://api.example/");
    }

    // =====================================================================
    // from_lookup() / validated()
    // =====================================================================

    #[test]
    fn test_from_lookup_reads_all_settings() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (BACKEND_URL_ENV, "https://api.example"),
            (IDENTITY_PARAM_ENV, "userId"),
            (PAIRING_TIMEOUT_ENV, "30"),
            (REQUEST_TIMEOUT_ENV, "3"),
        ]));

        assert_eq!(config.backend_url.as_deref(), Some("https://api.example"));
        assert_eq!(config.identity_param, "userId");
        assert_eq!(config.pairing_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_from_lookup_without_backend_keeps_none() {
        let config = ClientConfig::from_lookup(lookup_from(&[]));
        assert!(config.backend_url.is_none());
        assert!(config.backend().is_err());
    }

    #[test]
    fn test_from_lookup_ignores_garbage_durations() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (PAIRING_TIMEOUT_ENV, "soon"),
        ]));
        assert_eq!(config.pairing_timeout, DEFAULT_PAIRING_TIMEOUT);
    }

    #[test]
    fn test_validated_clamps_out_of_range_values() {
        let mut config = ClientConfig::new("http://x")
            .with_identity_param("")
            .with_pairing_timeout(Duration::from_secs(86_400))
            .with_request_timeout(Duration::ZERO);
        config.channel.reconnect.initial_delay = Duration::from_secs(5);
        config.channel.reconnect.max_delay = Duration::from_secs(1);

        let config = config.validated();

        assert_eq!(config.identity_param, DEFAULT_IDENTITY_PARAM);
        assert_eq!(config.pairing_timeout, ClientConfig::MAX_PAIRING_TIMEOUT);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.channel.reconnect.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_pairing_deadline_zero_disables_timer() {
        let config = ClientConfig::new("http://x").with_pairing_timeout(Duration::ZERO);
        assert_eq!(config.pairing_deadline(), None);
        assert_eq!(
            ClientConfig::new("http://x").pairing_deadline(),
            Some(DEFAULT_PAIRING_TIMEOUT)
        );
    }

    // =====================================================================
    // ReconnectPolicy
    // =====================================================================

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(700),
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(700));
        assert_eq!(policy.backoff(40), Duration::from_millis(700));
    }

    #[test]
    fn test_allows_respects_enabled_and_max_attempts() {
        assert!(!ReconnectPolicy::disabled().allows(0));

        let bounded = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(bounded.allows(0));
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));

        assert!(ReconnectPolicy::default().allows(10_000));
    }
}

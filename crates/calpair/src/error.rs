//! Unified error types for calpair.

use calpair_protocol::ProtocolError;
use calpair_session::SessionError;
use calpair_transport::TransportError;

/// The backend location is missing or unusable.
///
/// Fatal to every session operation, but never to the orchestrator
/// itself: it is shown to the user as a persistent notice.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No backend URL was configured.
    #[error("backend url is not configured (set {})", crate::config::BACKEND_URL_ENV)]
    MissingBackendUrl,

    /// The backend URL does not parse.
    #[error("backend url {url:?} is invalid: {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The backend URL is not http(s).
    #[error("backend url scheme {0:?} is not supported (use http or https)")]
    UnsupportedScheme(String),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CalpairError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, empty identity).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session command or navigation error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

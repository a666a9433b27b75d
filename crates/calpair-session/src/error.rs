//! Error types for the session layer.

/// Errors from the session control client and navigation handling.
///
/// Command failures are expected and recoverable: the orchestrator turns
/// them into state-machine inputs instead of propagating them further.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A URL could not be parsed or joined onto the backend base.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    /// The request never produced a response (DNS, refused, timeout).
    #[error("{endpoint} request failed: {source}")]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{endpoint} rejected with status {status}: {body}")]
    Rejected {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
}

//! Error types for the protocol layer.
//!
//! When you see a `ProtocolError`, the problem is in the shape of a
//! message (or an identity), not in networking or session state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes on the push channel: an event kind the client does
    /// not know, a missing `data` field, or a non-JSON frame.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// An identity was empty or whitespace-only.
    #[error("identity must not be empty")]
    EmptyIdentity,

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

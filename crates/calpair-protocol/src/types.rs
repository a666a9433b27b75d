//! Core protocol types for calpair's wire format.
//!
//! Everything here either travels over the push channel (JSON text frames)
//! or forms the body of a session command. The shapes are fixed by the
//! backend, so the serde attributes below are part of the contract.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The opaque key that scopes one pairing session.
///
/// It originates from the federated-login redirect and is never produced
/// by the client. An `Identity` is always non-empty: the empty string is
/// how "no session" would leak through a query string, so it is rejected
/// at construction and at deserialization (`try_from = "String"`).
///
/// Serialized as the bare string: `Identity("u1")` is `"u1"` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Wraps `value`, rejecting empty or whitespace-only strings.
    pub fn new(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ProtocolError::EmptyIdentity);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PairingCode
// ---------------------------------------------------------------------------

/// A one-time pairing payload, meant to be rendered as a scannable code.
///
/// The backend regenerates it per pairing attempt; the client only
/// observes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingCode(pub String);

impl PairingCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PairingStatus
// ---------------------------------------------------------------------------

/// The status value that marks a completed pairing.
pub const CONNECTED_STATUS: &str = "connected";

/// A `status` value from the push channel, mapped onto a closed set.
///
/// Only [`CONNECTED_STATUS`] is recognized. Anything else is kept verbatim
/// in `Unrecognized` so it can be logged, and is never treated as a
/// transition. Matching is exact: `"Connected"` or `"connected!"` are
/// unrecognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PairingStatus {
    /// The companion device finished pairing.
    Connected,
    /// Any other status string.
    Unrecognized(String),
}

impl PairingStatus {
    /// Maps a raw wire value onto the closed set.
    pub fn from_wire(value: &str) -> Self {
        if value == CONNECTED_STATUS {
            Self::Connected
        } else {
            Self::Unrecognized(value.to_string())
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Connected => CONNECTED_STATUS,
            Self::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl From<String> for PairingStatus {
    fn from(value: String) -> Self {
        if value == CONNECTED_STATUS {
            Self::Connected
        } else {
            Self::Unrecognized(value)
        }
    }
}

impl From<PairingStatus> for String {
    fn from(status: PairingStatus) -> Self {
        match status {
            PairingStatus::Connected => CONNECTED_STATUS.to_string(),
            PairingStatus::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

// ---------------------------------------------------------------------------
// Push channel messages
// ---------------------------------------------------------------------------

/// Server → Client events on the push channel.
///
/// Adjacently tagged, with kebab-case event names:
///
/// ```text
/// {"event":"pairing-code","data":"XYZ123"}
/// {"event":"status","data":"connected"}
/// ```
///
/// The two kinds have no ordering guarantee relative to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChannelEvent {
    /// A fresh pairing code for the current attempt.
    PairingCode(PairingCode),
    /// A pairing status change.
    Status(PairingStatus),
}

impl ChannelEvent {
    /// The wire name of this event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingCode(_) => "pairing-code",
            Self::Status(_) => "status",
        }
    }
}

/// Client → Server signals on the push channel.
///
/// `{"event":"join","data":"u1"}` scopes the connection to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChannelSignal {
    Join(Identity),
}

// ---------------------------------------------------------------------------
// Command bodies
// ---------------------------------------------------------------------------

/// JSON body of `session/start` and `session/logout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub identity: Identity,
}

// =========================================================================
// Tests
// =========================================================================

//! Wire protocol for calpair.
//!
//! This crate defines what the client and backend say to each other:
//!
//! - **Types** ([`Identity`], [`ChannelEvent`], [`ChannelSignal`],
//!   [`SessionRequest`], etc.): the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding or identity validation.
//!
//! ```text
//! Transport (bytes) → Protocol (ChannelEvent) → Orchestrator (state)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    CONNECTED_STATUS, ChannelEvent, ChannelSignal, Identity, PairingCode,
    PairingStatus, SessionRequest,
};

//! # Calpair
//!
//! Client-side session pairing orchestrator.
//!
//! After a federated login, the backend redirects back with a session
//! identity. Calpair picks that identity up, asks the backend to start a
//! pairing session, listens on a push channel for the pairing code and the
//! final `connected` status, and tears everything down on logout.
//!
//! ```text
//!   navigation ──identity──→ Orchestrator ──start/end──→ backend (HTTP)
//!                                 │  ↑
//!                       subscribe │  │ pairing-code / status
//!                                 ↓  │
//!                           push channel (WebSocket)
//! ```
//!
//! The presentation layer only ever reads [`Snapshot`]s and calls the
//! [`OrchestratorHandle`] intents.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use calpair::prelude::*;
//!
//! # async fn run() -> Result<(), CalpairError> {
//! let config = ClientConfig::from_env();
//! let navigation = MemoryNavigation::parse("https://app.example/?identity=u1")?;
//!
//! let handle = Orchestrator::from_config(config, AlwaysConfirm)?.start(navigation);
//! let mut snapshots = handle.watch();
//! while snapshots.changed().await.is_ok() {
//!     let snapshot = snapshots.borrow_and_update().clone();
//!     println!("{}", snapshot.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
mod error;
pub mod orchestrator;
pub mod state;

pub use channel::{ChannelUpdate, SessionChannel, Subscription, UpdateKind};
pub use config::{BackendUrls, ChannelConfig, ClientConfig, ReconnectPolicy};
pub use error::{CalpairError, ConfigError};
pub use orchestrator::{AlwaysConfirm, ConfirmLogout, Orchestrator, OrchestratorHandle};
pub use state::{
    Effect, Input, Notice, NoticeKind, PairingMachine, SessionState, Snapshot,
};

// Re-export sub-crates for advanced usage.
pub use calpair_protocol as protocol;
pub use calpair_session as session;
pub use calpair_transport as transport;

/// Everything needed to embed the orchestrator.
pub mod prelude {
    pub use crate::config::{ChannelConfig, ClientConfig, ReconnectPolicy};
    pub use crate::error::{CalpairError, ConfigError};
    pub use crate::orchestrator::{
        AlwaysConfirm, ConfirmLogout, Orchestrator, OrchestratorHandle,
    };
    pub use crate::state::{Notice, NoticeKind, SessionState, Snapshot};

    pub use calpair_protocol::{Identity, PairingCode};
    pub use calpair_session::{
        MemoryNavigation, NavigationContext, SessionControl, SessionError,
    };
    pub use calpair_transport::{Connection, Connector, TransportError};
}

//! Identity bootstrap and session control for calpair.
//!
//! This crate covers the two leaves the orchestrator drives:
//!
//! 1. **Identity bootstrap**: reading the session identity out of the
//!    navigation context once, and stripping it ([`capture_identity`])
//! 2. **Session control**: the idempotent `start`/`end` commands
//!    ([`SessionControl`], [`HttpSessionControl`])
//!
//! Neither piece holds session state. Deciding *when* to call them is the
//! orchestrator's job.

mod bootstrap;
mod control;
mod error;

pub use bootstrap::{
    DEFAULT_IDENTITY_PARAM, MemoryNavigation, NavigationContext,
    capture_identity, entry_point,
};
pub use control::{
    DEFAULT_REQUEST_TIMEOUT, HttpSessionControl, SessionControl, login_url,
    normalize_base,
};
pub use error::SessionError;

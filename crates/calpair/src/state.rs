//! The pairing state machine.
//!
//! [`PairingMachine`] is pure: it takes an [`Input`], updates its state,
//! and returns the [`Effect`]s the runtime must carry out. It never does
//! I/O, which keeps every transition testable without a network.
//!
//! ```text
//!   Unauthenticated ──identity──→ Bootstrapping ──joined──→ AwaitingCode
//!
//!   Bootstrapping, AwaitingCode, AwaitingScan ──pairing-code──→ AwaitingScan
//!   Bootstrapping, AwaitingCode, AwaitingScan ──connected─────→ Paired
//!   Bootstrapping, AwaitingCode ──start failed──→ Failed
//!   Bootstrapping, AwaitingCode ──timer─────────→ TimedOut
//!   Failed, TimedOut ──login──→ Unauthenticated
//!   any state with an identity ──logout succeeded──→ Unauthenticated
//! ```
//!
//! A pairing code in `AwaitingScan` replaces the one shown. The two event
//! kinds have no relative ordering guarantee, so `connected` may arrive
//! before any code.
//!
//! Every bootstrap and every reset starts a new attempt. Command
//! completions carry the attempt they were issued for and are dropped once
//! the machine has moved past it, even when the identity is the same.

use std::fmt;

use calpair_protocol::{ChannelEvent, Identity, PairingCode, PairingStatus};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where the pairing session stands. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No identity.
    Unauthenticated,
    /// Identity known; `start` issued and the channel is subscribing.
    Bootstrapping,
    /// Joined the channel, no pairing code yet.
    AwaitingCode,
    /// A pairing code is on screen, waiting for the device to scan it.
    AwaitingScan,
    /// Pairing completed. Stays here until logout.
    Paired,
    /// `start` failed. Terminal until reset.
    Failed,
    /// No pairing code or status arrived in time. Terminal until reset.
    TimedOut,
}

impl SessionState {
    /// `true` while pairing is still in progress.
    pub fn is_pairing(&self) -> bool {
        matches!(
            self,
            Self::Bootstrapping | Self::AwaitingCode | Self::AwaitingScan
        )
    }

    /// `true` for states that only a reset leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paired | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::Bootstrapping => "Bootstrapping",
            Self::AwaitingCode => "AwaitingCode",
            Self::AwaitingScan => "AwaitingScan",
            Self::Paired => "Paired",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Notice / Snapshot
// ---------------------------------------------------------------------------

/// Which kind of user-visible problem a [`Notice`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// The backend location is missing or invalid. Persistent.
    Configuration,
    /// `start` failed. Cleared by a reset.
    Bootstrap,
    /// `end` failed. The user may retry logout.
    Teardown,
}

/// A user-visible problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the presentation layer should offer a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, NoticeKind::Configuration)
    }
}

/// The read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub pairing_code: Option<PairingCode>,
    pub notice: Option<Notice>,
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

/// Everything that can happen to a pairing session.
///
/// Inputs that carry an [`Identity`] and an `attempt` are completions of
/// work started for that attempt; they are ignored once the machine has
/// moved on to another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// The identity bootstrap found an identity.
    IdentityCaptured(Identity),
    /// The channel sent `join` and is delivering events.
    ChannelJoined,
    /// `start` succeeded.
    StartSucceeded { identity: Identity, attempt: u64 },
    /// `start` failed.
    StartFailed {
        identity: Identity,
        attempt: u64,
        message: String,
    },
    /// An event from the push channel.
    Event(ChannelEvent),
    /// The pairing timer fired.
    PairingTimedOut,
    /// The user confirmed logout.
    LogoutConfirmed { identity: Identity, attempt: u64 },
    /// `end` succeeded.
    LogoutSucceeded { identity: Identity, attempt: u64 },
    /// `end` failed.
    LogoutFailed {
        identity: Identity,
        attempt: u64,
        message: String,
    },
    /// The user asked to log in again.
    LoginRequested,
}

/// Work the runtime must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the channel subscription for this identity.
    Subscribe(Identity),
    /// Tear down the channel subscription.
    Unsubscribe,
    /// Issue `start(identity)` and report back with `attempt`.
    StartSession { identity: Identity, attempt: u64 },
    /// Issue `end(identity)` and report back with `attempt`.
    EndSession { identity: Identity, attempt: u64 },
    /// Start the pairing timer.
    ArmTimeout,
    /// Cancel the pairing timer.
    DisarmTimeout,
    /// Return the navigation context to the unauthenticated entry point.
    ResetNavigation,
}

// ---------------------------------------------------------------------------
// PairingMachine
// ---------------------------------------------------------------------------

/// The session pairing state machine.
#[derive(Debug, Clone)]
pub struct PairingMachine {
    state: SessionState,
    identity: Option<Identity>,
    code: Option<PairingCode>,
    notice: Option<Notice>,
    /// Bumped on every bootstrap and reset.
    attempt: u64,
    /// Set when the backend is not configured; every input is ignored.
    disabled: bool,
}

impl Default for PairingMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingMachine {
    /// A machine in `Unauthenticated`.
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            identity: None,
            code: None,
            notice: None,
            attempt: 0,
            disabled: false,
        }
    }

    /// A machine that only shows a configuration error.
    ///
    /// It stays `Unauthenticated` forever and produces no effects, so no
    /// command or subscription is ever attempted.
    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self {
            notice: Some(Notice::new(NoticeKind::Configuration, message)),
            disabled: true,
            ..Self::new()
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn pairing_code(&self) -> Option<&PairingCode> {
        self.code.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// The current attempt. Work issued now should report back with it.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            identity: self.identity.clone(),
            pairing_code: self.code.clone(),
            notice: self.notice.clone(),
        }
    }

    /// Applies one input and returns the effects to carry out, in order.
    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        if self.disabled {
            debug!(?input, "ignoring input: backend not configured");
            return Vec::new();
        }

        let effects = match input {
            Input::IdentityCaptured(identity) => self.on_identity(identity),
            Input::ChannelJoined => self.on_joined(),
            Input::StartSucceeded { identity, attempt } => {
                if self.is_current(&identity, attempt) {
                    debug!(%identity, attempt, "start acknowledged");
                }
                Vec::new()
            }
            Input::StartFailed {
                identity,
                attempt,
                message,
            } => self.on_start_failed(&identity, attempt, message),
            Input::Event(ChannelEvent::PairingCode(code)) => {
                self.on_pairing_code(code)
            }
            Input::Event(ChannelEvent::Status(status)) => self.on_status(status),
            Input::PairingTimedOut => self.on_timeout(),
            Input::LogoutConfirmed { identity, attempt } => {
                if self.is_current(&identity, attempt) {
                    vec![Effect::EndSession { identity, attempt }]
                } else {
                    debug!(%identity, attempt, "ignoring stale logout confirmation");
                    Vec::new()
                }
            }
            Input::LogoutSucceeded { identity, attempt } => {
                if self.is_current(&identity, attempt) {
                    info!(%identity, "logged out");
                    self.reset()
                } else {
                    debug!(%identity, attempt, "ignoring stale logout completion");
                    Vec::new()
                }
            }
            Input::LogoutFailed {
                identity,
                attempt,
                message,
            } => {
                if self.is_current(&identity, attempt) {
                    self.notice = Some(Notice::new(NoticeKind::Teardown, message));
                } else {
                    debug!(%identity, attempt, "ignoring stale logout failure");
                }
                Vec::new()
            }
            Input::LoginRequested => {
                if matches!(self.state, SessionState::Failed | SessionState::TimedOut) {
                    self.reset()
                } else {
                    Vec::new()
                }
            }
        };

        self.debug_check();
        effects
    }

    fn is_current(&self, identity: &Identity, attempt: u64) -> bool {
        self.attempt == attempt && self.identity.as_ref() == Some(identity)
    }

    fn on_identity(&mut self, identity: Identity) -> Vec<Effect> {
        if let Some(current) = &self.identity {
            if current == &identity {
                debug!(%identity, "identity already bootstrapped");
            } else {
                debug!(%identity, %current, "ignoring identity while another session is held");
            }
            return Vec::new();
        }

        self.attempt += 1;
        info!(%identity, attempt = self.attempt, "bootstrapping pairing session");
        self.identity = Some(identity.clone());
        self.state = SessionState::Bootstrapping;
        self.notice = None;
        vec![
            Effect::Subscribe(identity.clone()),
            Effect::StartSession {
                identity,
                attempt: self.attempt,
            },
            Effect::ArmTimeout,
        ]
    }

    fn on_joined(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Bootstrapping {
            self.state = SessionState::AwaitingCode;
        }
        Vec::new()
    }

    fn on_start_failed(
        &mut self,
        identity: &Identity,
        attempt: u64,
        message: String,
    ) -> Vec<Effect> {
        if !self.is_current(identity, attempt) {
            debug!(%identity, attempt, "ignoring stale start failure");
            return Vec::new();
        }
        self.notice = Some(Notice::new(NoticeKind::Bootstrap, message));
        match self.state {
            SessionState::Bootstrapping | SessionState::AwaitingCode => {
                info!(%identity, "pairing session failed to start");
                self.state = SessionState::Failed;
                vec![Effect::Unsubscribe, Effect::DisarmTimeout]
            }
            // The channel already proved the session is alive.
            _ => Vec::new(),
        }
    }

    fn on_pairing_code(&mut self, code: PairingCode) -> Vec<Effect> {
        if !self.state.is_pairing() {
            debug!(state = %self.state, "ignoring pairing-code outside pairing");
            return Vec::new();
        }
        debug!(state = %self.state, "pairing code received");
        self.state = SessionState::AwaitingScan;
        self.code = Some(code);
        vec![Effect::DisarmTimeout]
    }

    fn on_status(&mut self, status: PairingStatus) -> Vec<Effect> {
        match status {
            PairingStatus::Connected if self.state.is_pairing() => {
                info!(identity = ?self.identity, "device paired");
                self.state = SessionState::Paired;
                self.code = None;
                vec![Effect::DisarmTimeout]
            }
            PairingStatus::Connected => {
                debug!(state = %self.state, "ignoring connected status outside pairing");
                Vec::new()
            }
            PairingStatus::Unrecognized(raw) => {
                debug!(status = %raw, state = %self.state, "ignoring unrecognized status");
                Vec::new()
            }
        }
    }

    fn on_timeout(&mut self) -> Vec<Effect> {
        match self.state {
            SessionState::Bootstrapping | SessionState::AwaitingCode => {
                info!(identity = ?self.identity, "pairing timed out");
                self.state = SessionState::TimedOut;
                vec![Effect::Unsubscribe]
            }
            _ => Vec::new(),
        }
    }

    fn reset(&mut self) -> Vec<Effect> {
        self.attempt += 1;
        self.state = SessionState::Unauthenticated;
        self.identity = None;
        self.code = None;
        self.notice = None;
        vec![
            Effect::Unsubscribe,
            Effect::DisarmTimeout,
            Effect::ResetNavigation,
        ]
    }

    fn debug_check(&self) {
        debug_assert_eq!(
            self.code.is_some(),
            self.state == SessionState::AwaitingScan,
            "a pairing code is held exactly in AwaitingScan"
        );
        debug_assert_eq!(
            self.identity.is_none(),
            self.state == SessionState::Unauthenticated,
            "an identity is held exactly outside Unauthenticated"
        );
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `PairingMachine`.
    //!
    //! Naming: `test_{input}_{scenario}_{expected}`.

    use super::*;

    fn id(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    fn code(value: &str) -> Input {
        Input::Event(ChannelEvent::PairingCode(PairingCode(value.into())))
    }

    fn status(value: &str) -> Input {
        Input::Event(ChannelEvent::Status(PairingStatus::from_wire(value)))
    }

    fn start_failed(identity: &str, attempt: u64, message: &str) -> Input {
        Input::StartFailed {
            identity: id(identity),
            attempt,
            message: message.into(),
        }
    }

    fn confirmed(identity: &str, attempt: u64) -> Input {
        Input::LogoutConfirmed {
            identity: id(identity),
            attempt,
        }
    }

    fn logged_out(identity: &str, attempt: u64) -> Input {
        Input::LogoutSucceeded {
            identity: id(identity),
            attempt,
        }
    }

    /// A machine that has bootstrapped `u1` and joined the channel.
    fn awaiting_code() -> PairingMachine {
        let mut m = PairingMachine::new();
        m.apply(Input::IdentityCaptured(id("u1")));
        m.apply(Input::ChannelJoined);
        m
    }

    fn paired() -> PairingMachine {
        let mut m = awaiting_code();
        m.apply(code("XYZ123"));
        m.apply(status("connected"));
        m
    }

    // =====================================================================
    // Scenarios
    // =====================================================================

    #[test]
    fn test_new_starts_unauthenticated() {
        let m = PairingMachine::new();
        assert_eq!(m.state(), SessionState::Unauthenticated);
        assert!(m.identity().is_none());
        assert!(m.pairing_code().is_none());
    }

    #[test]
    fn test_identity_captured_bootstraps_and_subscribes() {
        let mut m = PairingMachine::new();

        let effects = m.apply(Input::IdentityCaptured(id("u1")));

        assert_eq!(m.state(), SessionState::Bootstrapping);
        assert_eq!(
            effects,
            vec![
                Effect::Subscribe(id("u1")),
                Effect::StartSession {
                    identity: id("u1"),
                    attempt: 1,
                },
                Effect::ArmTimeout,
            ]
        );

        m.apply(Input::ChannelJoined);
        assert_eq!(m.state(), SessionState::AwaitingCode);
    }

    #[test]
    fn test_pairing_code_in_awaiting_code_stores_code() {
        let mut m = awaiting_code();

        let effects = m.apply(code("XYZ123"));

        assert_eq!(m.state(), SessionState::AwaitingScan);
        assert_eq!(m.pairing_code(), Some(&PairingCode("XYZ123".into())));
        assert_eq!(effects, vec![Effect::DisarmTimeout]);
    }

    #[test]
    fn test_status_connected_pairs_and_clears_code() {
        let mut m = awaiting_code();
        m.apply(code("XYZ123"));

        m.apply(status("connected"));

        assert_eq!(m.state(), SessionState::Paired);
        assert!(m.pairing_code().is_none());
    }

    #[test]
    fn test_logout_from_paired_resets_everything() {
        let mut m = paired();

        let effects = m.apply(confirmed("u1", 1));
        assert_eq!(
            effects,
            vec![Effect::EndSession {
                identity: id("u1"),
                attempt: 1,
            }]
        );
        assert_eq!(m.state(), SessionState::Paired, "nothing changes until end succeeds");

        let effects = m.apply(logged_out("u1", 1));
        assert_eq!(m.state(), SessionState::Unauthenticated);
        assert!(m.identity().is_none());
        assert!(m.pairing_code().is_none());
        assert_eq!(
            effects,
            vec![Effect::Unsubscribe, Effect::DisarmTimeout, Effect::ResetNavigation]
        );
    }

    #[test]
    fn test_misconfigured_ignores_everything() {
        let mut m = PairingMachine::misconfigured("backend url is not configured");

        let effects = m.apply(Input::IdentityCaptured(id("u1")));

        assert!(effects.is_empty());
        assert_eq!(m.state(), SessionState::Unauthenticated);
        let notice = m.notice().expect("configuration notice");
        assert_eq!(notice.kind, NoticeKind::Configuration);
        assert!(!notice.is_retryable());
    }

    // =====================================================================
    // Edge cases
    // =====================================================================

    #[test]
    fn test_identity_captured_twice_is_idempotent() {
        let mut m = PairingMachine::new();
        m.apply(Input::IdentityCaptured(id("u1")));
        let before = m.snapshot();

        let effects = m.apply(Input::IdentityCaptured(id("u1")));

        assert!(effects.is_empty(), "no second subscribe or start");
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_identity_captured_different_identity_while_held_ignored() {
        let mut m = awaiting_code();

        let effects = m.apply(Input::IdentityCaptured(id("u2")));

        assert!(effects.is_empty());
        assert_eq!(m.identity(), Some(&id("u1")));
    }

    #[test]
    fn test_pairing_code_before_join_goes_straight_to_scan() {
        let mut m = PairingMachine::new();
        m.apply(Input::IdentityCaptured(id("u1")));

        m.apply(code("EARLY"));
        assert_eq!(m.state(), SessionState::AwaitingScan);

        // A late join must not move the machine backwards.
        m.apply(Input::ChannelJoined);
        assert_eq!(m.state(), SessionState::AwaitingScan);
    }

    #[test]
    fn test_pairing_code_replaces_previous_code() {
        let mut m = awaiting_code();
        m.apply(code("first"));

        m.apply(code("second"));

        assert_eq!(m.pairing_code(), Some(&PairingCode("second".into())));
    }

    #[test]
    fn test_status_connected_before_any_code_pairs() {
        let mut m = awaiting_code();

        m.apply(status("connected"));

        assert_eq!(m.state(), SessionState::Paired);
    }

    #[test]
    fn test_pairing_code_after_paired_is_noop() {
        let mut m = paired();

        let effects = m.apply(code("STALE"));

        assert!(effects.is_empty());
        assert_eq!(m.state(), SessionState::Paired);
        assert!(m.pairing_code().is_none());
    }

    #[test]
    fn test_unrecognized_status_never_transitions() {
        for mut m in [PairingMachine::new(), awaiting_code(), paired()] {
            let before = m.snapshot();
            for raw in ["disconnected", "Connected", "qr", ""] {
                let effects = m.apply(status(raw));
                assert!(effects.is_empty());
                assert_eq!(m.snapshot(), before, "status {raw:?} must be a no-op");
            }
        }
    }

    #[test]
    fn test_start_failed_while_bootstrapping_fails() {
        let mut m = PairingMachine::new();
        m.apply(Input::IdentityCaptured(id("u1")));

        let effects = m.apply(start_failed("u1", 1, "502"));

        assert_eq!(m.state(), SessionState::Failed);
        assert_eq!(effects, vec![Effect::Unsubscribe, Effect::DisarmTimeout]);
        let notice = m.notice().unwrap();
        assert_eq!(notice.kind, NoticeKind::Bootstrap);
        assert!(notice.is_retryable());
    }

    #[test]
    fn test_start_failed_after_code_only_annotates() {
        let mut m = awaiting_code();
        m.apply(code("XYZ"));

        let effects = m.apply(start_failed("u1", 1, "timeout"));

        assert!(effects.is_empty());
        assert_eq!(m.state(), SessionState::AwaitingScan);
        assert_eq!(m.notice().unwrap().kind, NoticeKind::Bootstrap);
    }

    #[test]
    fn test_failed_ignores_channel_events() {
        let mut m = PairingMachine::new();
        m.apply(Input::IdentityCaptured(id("u1")));
        m.apply(start_failed("u1", 1, "down"));

        m.apply(code("XYZ"));
        m.apply(status("connected"));

        assert_eq!(m.state(), SessionState::Failed);
    }

    #[test]
    fn test_logout_failed_keeps_state_and_surfaces_teardown() {
        let mut m = paired();
        let before = m.state();

        let effects = m.apply(Input::LogoutFailed {
            identity: id("u1"),
            attempt: 1,
            message: "503".into(),
        });

        assert!(effects.is_empty());
        assert_eq!(m.state(), before);
        assert_eq!(m.identity(), Some(&id("u1")));
        assert_eq!(m.notice().unwrap().kind, NoticeKind::Teardown);

        // Retry succeeds and clears the notice.
        m.apply(logged_out("u1", 1));
        assert!(m.notice().is_none());
    }

    #[test]
    fn test_stale_completions_for_other_identity_ignored() {
        let mut m = paired();

        assert!(m.apply(logged_out("old", 1)).is_empty());
        assert!(m.apply(confirmed("old", 1)).is_empty());
        assert!(m.apply(start_failed("old", 1, "x")).is_empty());
        assert_eq!(m.state(), SessionState::Paired);
        assert!(m.notice().is_none());
    }

    #[test]
    fn test_logout_confirmed_without_identity_is_noop() {
        let mut m = PairingMachine::new();
        assert!(m.apply(confirmed("u1", 0)).is_empty());
    }

    #[test]
    fn test_start_failed_from_previous_attempt_of_same_identity_ignored() {
        let mut m = awaiting_code();
        m.apply(confirmed("u1", 1));
        m.apply(logged_out("u1", 1));
        m.apply(Input::IdentityCaptured(id("u1")));
        m.apply(Input::ChannelJoined);
        assert_eq!(m.attempt(), 3);

        let effects = m.apply(start_failed("u1", 1, "late"));

        assert!(effects.is_empty());
        assert_eq!(m.state(), SessionState::AwaitingCode);
        assert!(m.notice().is_none());

        // The current attempt still fails normally.
        m.apply(start_failed("u1", 3, "down"));
        assert_eq!(m.state(), SessionState::Failed);
    }

    #[test]
    fn test_duplicate_logout_completing_after_relogin_ignored() {
        let mut m = paired();
        assert_eq!(m.apply(confirmed("u1", 1)), m.apply(confirmed("u1", 1)));
        m.apply(logged_out("u1", 1));
        m.apply(Input::IdentityCaptured(id("u1")));
        m.apply(Input::ChannelJoined);

        assert!(m.apply(logged_out("u1", 1)).is_empty());
        assert!(
            m.apply(Input::LogoutFailed {
                identity: id("u1"),
                attempt: 1,
                message: "503".into(),
            })
            .is_empty()
        );
        assert_eq!(m.state(), SessionState::AwaitingCode);
        assert_eq!(m.identity(), Some(&id("u1")));
        assert!(m.notice().is_none());
    }

    #[test]
    fn test_logout_succeeded_from_failed_or_timed_out_resets() {
        let mut failed = PairingMachine::new();
        failed.apply(Input::IdentityCaptured(id("u1")));
        failed.apply(start_failed("u1", 1, "down"));
        let mut timed_out = awaiting_code();
        timed_out.apply(Input::PairingTimedOut);

        for mut m in [failed, timed_out] {
            assert_eq!(
                m.apply(confirmed("u1", 1)),
                vec![Effect::EndSession {
                    identity: id("u1"),
                    attempt: 1,
                }]
            );
            let effects = m.apply(logged_out("u1", 1));
            assert_eq!(m.state(), SessionState::Unauthenticated);
            assert!(m.notice().is_none());
            assert!(effects.contains(&Effect::ResetNavigation));
        }
    }

    // =====================================================================
    // Timeout
    // =====================================================================

    #[test]
    fn test_timeout_in_awaiting_code_times_out() {
        let mut m = awaiting_code();

        let effects = m.apply(Input::PairingTimedOut);

        assert_eq!(m.state(), SessionState::TimedOut);
        assert_eq!(effects, vec![Effect::Unsubscribe]);
        assert_eq!(m.identity(), Some(&id("u1")), "identity kept for logout");
    }

    #[test]
    fn test_timeout_after_code_is_ignored() {
        let mut m = awaiting_code();
        m.apply(code("XYZ"));

        assert!(m.apply(Input::PairingTimedOut).is_empty());
        assert_eq!(m.state(), SessionState::AwaitingScan);
    }

    #[test]
    fn test_login_requested_resets_terminal_failures_only() {
        let mut m = awaiting_code();
        m.apply(Input::PairingTimedOut);

        let effects = m.apply(Input::LoginRequested);
        assert_eq!(m.state(), SessionState::Unauthenticated);
        assert!(effects.contains(&Effect::ResetNavigation));

        let mut p = paired();
        assert!(p.apply(Input::LoginRequested).is_empty());
        assert_eq!(p.state(), SessionState::Paired);
    }

    // =====================================================================
    // Sequence properties
    // =====================================================================

    /// Every input sequence up to length 5 over a small alphabet keeps the
    /// machine consistent: a code is held only in `AwaitingScan`, and
    /// `Paired` never holds one.
    #[test]
    fn test_all_short_sequences_keep_invariants() {
        let alphabet = [
            Input::IdentityCaptured(id("u1")),
            Input::ChannelJoined,
            code("C1"),
            status("connected"),
            status("weird"),
            start_failed("u1", 1, "e"),
            start_failed("u1", 3, "e"),
            Input::PairingTimedOut,
            logged_out("u1", 1),
            Input::LogoutFailed {
                identity: id("u1"),
                attempt: 1,
                message: "e".into(),
            },
            Input::LoginRequested,
        ];

        let mut sequences: Vec<Vec<usize>> = vec![Vec::new()];
        for _ in 0..5 {
            let mut next = Vec::new();
            for seq in &sequences {
                for i in 0..alphabet.len() {
                    let mut s = seq.clone();
                    s.push(i);
                    next.push(s);
                }
            }
            for seq in &next {
                let mut m = PairingMachine::new();
                for &i in seq {
                    m.apply(alphabet[i].clone());
                    if m.state() == SessionState::Paired {
                        assert!(m.pairing_code().is_none(), "sequence {seq:?}");
                    }
                    assert_eq!(
                        m.pairing_code().is_some(),
                        m.state() == SessionState::AwaitingScan,
                        "sequence {seq:?}"
                    );
                }
            }
            sequences = next;
        }
    }

    #[test]
    fn test_subscribe_emitted_at_most_once_per_identity() {
        let mut m = PairingMachine::new();
        let mut subscribes = 0;
        for input in [
            Input::IdentityCaptured(id("u1")),
            Input::IdentityCaptured(id("u1")),
            Input::ChannelJoined,
            Input::IdentityCaptured(id("u1")),
        ] {
            subscribes += m
                .apply(input)
                .iter()
                .filter(|e| matches!(e, Effect::Subscribe(_)))
                .count();
        }
        assert_eq!(subscribes, 1);
    }

    #[test]
    fn test_session_state_display_and_predicates() {
        assert_eq!(SessionState::AwaitingScan.to_string(), "AwaitingScan");
        assert!(SessionState::AwaitingCode.is_pairing());
        assert!(!SessionState::Paired.is_pairing());
        assert!(SessionState::TimedOut.is_terminal());
        assert!(!SessionState::Unauthenticated.is_terminal());
    }
}

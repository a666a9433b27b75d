//! Session orchestrator: ties bootstrap, commands, channel, and timer together.
//!
//! The orchestrator runs as a single actor task. It owns the
//! [`PairingMachine`], the [`SessionChannel`], and the navigation context,
//! and is the only place effects are executed. Everything that happens
//! elsewhere (user intents, command completions, channel updates, the
//! pairing timer) reaches it as a message, so transitions are applied one
//! at a time in arrival order.
//!
//! ```text
//!  OrchestratorHandle ──intent──→ ┌─────────┐ ──snapshot──→ watch::Receiver
//!  start/end tasks ───result───→  │ Actor   │
//!  channel reader ────update───→  │ machine │ ──effects──→ channel, control,
//!  pairing timer ─────fired────→  └─────────┘              timer, navigation
//! ```
//!
//! Commands run in their own tasks and post their outcome back, so a slow
//! backend never stalls event handling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use calpair_protocol::Identity;
use calpair_session::{
    HttpSessionControl, NavigationContext, SessionControl, capture_identity,
    entry_point,
};
use calpair_transport::{Connector, WebSocketConnector};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{ChannelUpdate, SessionChannel, UpdateKind};
use crate::config::{BackendUrls, ChannelConfig, ClientConfig};
use crate::state::{Effect, Input, PairingMachine, Snapshot};
use crate::{CalpairError, ConfigError};

// ---------------------------------------------------------------------------
// ConfirmLogout
// ---------------------------------------------------------------------------

/// Asks the user whether to really log out.
///
/// Logout is destructive (it tears down the backend session), so the
/// orchestrator only calls `end` after this resolves to `true`.
pub trait ConfirmLogout: Send + Sync + 'static {
    fn confirm_logout(&self, identity: &Identity) -> impl Future<Output = bool> + Send;
}

/// Confirms every logout without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl ConfirmLogout for AlwaysConfirm {
    async fn confirm_logout(&self, _identity: &Identity) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Backend<S, K> {
    control: Arc<S>,
    connector: Arc<K>,
    urls: BackendUrls,
}

/// A configured, not yet running, session orchestrator.
///
/// A missing or invalid backend URL does not fail construction. The
/// orchestrator starts anyway, shows a persistent configuration notice,
/// and never attempts a command or subscription.
pub struct Orchestrator<S, K, F> {
    backend: Result<Backend<S, K>, ConfigError>,
    identity_param: String,
    pairing_timeout: Option<Duration>,
    channel: ChannelConfig,
    confirm: Arc<F>,
}

impl<F: ConfirmLogout> Orchestrator<HttpSessionControl, WebSocketConnector, F> {
    /// An orchestrator speaking HTTP for commands and WebSocket for the
    /// push channel.
    ///
    /// # Errors
    /// Only if the HTTP client cannot be built. Configuration problems are
    /// reported through the snapshot instead.
    pub fn from_config(config: ClientConfig, confirm: F) -> Result<Self, CalpairError> {
        let config = config.validated();
        let backend = match config.backend() {
            Ok(urls) => Ok((
                HttpSessionControl::new(&urls.base, config.request_timeout)?,
                urls,
            )),
            Err(e) => Err(e),
        };
        Ok(Self::assemble(config, backend, WebSocketConnector::new(), confirm))
    }
}

impl<S: SessionControl, K: Connector, F: ConfirmLogout> Orchestrator<S, K, F> {
    /// An orchestrator over caller-supplied command and channel transports.
    pub fn new(config: ClientConfig, control: S, connector: K, confirm: F) -> Self {
        let config = config.validated();
        let backend = config.backend().map(|urls| (control, urls));
        Self::assemble(config, backend, connector, confirm)
    }

    fn assemble(
        config: ClientConfig,
        backend: Result<(S, BackendUrls), ConfigError>,
        connector: K,
        confirm: F,
    ) -> Self {
        let backend = backend.map(|(control, urls)| Backend {
            control: Arc::new(control),
            connector: Arc::new(connector),
            urls,
        });
        Self {
            backend,
            pairing_timeout: config.pairing_deadline(),
            identity_param: config.identity_param,
            channel: config.channel,
            confirm: Arc::new(confirm),
        }
    }

    /// The configuration problem, if the backend is unusable.
    pub fn config_error(&self) -> Option<&ConfigError> {
        self.backend.as_ref().err()
    }

    /// Spawns the actor and runs the identity bootstrap once.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<N: NavigationContext>(self, navigation: N) -> OrchestratorHandle {
        let (backend, machine) = match self.backend {
            Ok(backend) => (Some(backend), PairingMachine::new()),
            Err(e) => {
                warn!(error = %e, "backend not configured; session operations disabled");
                (None, PairingMachine::misconfigured(e.to_string()))
            }
        };
        let login = backend.as_ref().map(|b| b.urls.login.clone());

        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            machine,
            backend,
            channel: None,
            updates: None,
            channel_config: self.channel,
            navigation,
            identity_param: self.identity_param,
            pairing_timeout: self.pairing_timeout,
            deadline: None,
            confirm: self.confirm,
            intents: intents_rx,
            results: results_rx,
            results_tx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(actor.run());

        let handle = OrchestratorHandle {
            intents: intents_tx,
            snapshot: snapshot_rx,
            login,
            task,
        };
        handle.bootstrap();
        handle
    }
}

// ---------------------------------------------------------------------------
// OrchestratorHandle
// ---------------------------------------------------------------------------

enum Intent {
    Request(Request),
    Stop(oneshot::Sender<()>),
}

enum Request {
    Bootstrap,
    Login,
    Logout,
}

/// Handle to a running orchestrator.
///
/// Dropping the handle stops the actor and closes the channel.
pub struct OrchestratorHandle {
    intents: mpsc::UnboundedSender<Intent>,
    snapshot: watch::Receiver<Snapshot>,
    login: Option<Url>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// The current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that sees every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Waits until a snapshot satisfies `predicate`.
    ///
    /// Returns `None` if the orchestrator stopped first.
    pub async fn wait_for(&self, predicate: impl FnMut(&Snapshot) -> bool) -> Option<Snapshot> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(predicate).await.ok().map(|s| s.clone())
    }

    /// Starts a login.
    ///
    /// Returns the federated-login location to navigate to, or `None` when
    /// the backend is not configured. From `Failed` or `TimedOut` this also
    /// resets the session locally.
    pub fn login(&self) -> Option<Url> {
        self.send(Intent::Request(Request::Login));
        self.login.clone()
    }

    /// Asks for confirmation and, if given, ends the session.
    /// A no-op without an identity.
    pub fn logout(&self) {
        self.send(Intent::Request(Request::Logout));
    }

    /// Runs the identity bootstrap against the navigation context again.
    /// Does nothing, and leaves the address untouched, while an identity is
    /// held.
    pub fn bootstrap(&self) {
        self.send(Intent::Request(Request::Bootstrap));
    }

    /// Stops the actor, closing the channel and cancelling the timer.
    pub async fn stop(self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Intent::Stop(done_tx));
        let _ = done_rx.await;
        let _ = self.task.await;
    }

    fn send(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            debug!("orchestrator already stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Actor<S, K: Connector, F, N> {
    machine: PairingMachine,
    /// `None` when the backend is not configured.
    backend: Option<Backend<S, K>>,
    /// Created on the first subscription.
    channel: Option<SessionChannel<K>>,
    updates: Option<mpsc::UnboundedReceiver<ChannelUpdate>>,
    channel_config: ChannelConfig,
    navigation: N,
    identity_param: String,
    pairing_timeout: Option<Duration>,
    deadline: Option<Instant>,
    confirm: Arc<F>,
    intents: mpsc::UnboundedReceiver<Intent>,
    results: mpsc::UnboundedReceiver<Input>,
    results_tx: mpsc::UnboundedSender<Input>,
    snapshot: watch::Sender<Snapshot>,
}

impl<S, K, F, N> Actor<S, K, F, N>
where
    S: SessionControl,
    K: Connector,
    F: ConfirmLogout,
    N: NavigationContext,
{
    async fn run(mut self) {
        info!("orchestrator started");

        loop {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(Intent::Stop(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(Intent::Request(request)) => self.handle_request(request),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(input) = self.results.recv() => self.dispatch(input),
                Some(update) = next_update(&mut self.updates) => self.handle_update(update),
                () = wait_until(self.deadline) => {
                    self.deadline = None;
                    self.dispatch(Input::PairingTimedOut);
                }
            }
        }

        info!("orchestrator stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Bootstrap => {
                if self.backend.is_none() {
                    debug!("skipping bootstrap: backend not configured");
                    return;
                }
                // The address is only consumed when the identity can be taken.
                if let Some(current) = self.machine.identity() {
                    debug!(%current, "skipping bootstrap: identity already held");
                    return;
                }
                let param = &self.identity_param;
                if let Some(identity) = capture_identity(&mut self.navigation, param) {
                    self.dispatch(Input::IdentityCaptured(identity));
                }
            }
            Request::Login => self.dispatch(Input::LoginRequested),
            Request::Logout => {
                let Some(identity) = self.machine.identity().cloned() else {
                    debug!("logout without identity");
                    return;
                };
                let attempt = self.machine.attempt();
                let confirm = Arc::clone(&self.confirm);
                let results = self.results_tx.clone();
                tokio::spawn(async move {
                    if confirm.confirm_logout(&identity).await {
                        let _ = results.send(Input::LogoutConfirmed { identity, attempt });
                    } else {
                        debug!(%identity, "logout declined");
                    }
                });
            }
        }
    }

    fn handle_update(&mut self, update: ChannelUpdate) {
        let active = self.channel.as_ref().and_then(SessionChannel::active_generation);
        if active != Some(update.generation) {
            debug!(generation = update.generation, ?active, "dropping stale channel update");
            return;
        }
        match update.kind {
            UpdateKind::Joined => self.dispatch(Input::ChannelJoined),
            UpdateKind::Event(event) => {
                debug!(event = event.kind(), "channel event");
                self.dispatch(Input::Event(event));
            }
            UpdateKind::Anomaly(reason) => {
                debug!(%reason, "ignoring malformed channel message");
            }
            UpdateKind::Closed(reason) => {
                warn!(%reason, state = %self.machine.state(), "session channel closed");
            }
        }
    }

    fn dispatch(&mut self, input: Input) {
        let effects = self.machine.apply(input);
        for effect in effects {
            self.execute(effect);
        }
        let next = self.machine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn execute(&mut self, effect: Effect) {
        let Some(backend) = &self.backend else {
            return;
        };
        match effect {
            Effect::Subscribe(identity) => {
                if self.channel.is_none() {
                    let (channel, updates) = SessionChannel::new(
                        Arc::clone(&backend.connector),
                        backend.urls.channel.as_str(),
                        self.channel_config.clone(),
                    );
                    self.channel = Some(channel);
                    self.updates = Some(updates);
                }
                if let Some(channel) = &mut self.channel {
                    channel.subscribe(identity);
                }
            }
            Effect::Unsubscribe => {
                if let Some(channel) = &mut self.channel {
                    channel.unsubscribe();
                }
            }
            Effect::StartSession { identity, attempt } => {
                let control = Arc::clone(&backend.control);
                let results = self.results_tx.clone();
                tokio::spawn(async move {
                    let result = control.start(&identity).await;
                    let input = match result {
                        Ok(()) => Input::StartSucceeded { identity, attempt },
                        Err(e) => {
                            warn!(%identity, attempt, error = %e, "session start failed");
                            Input::StartFailed {
                                identity,
                                attempt,
                                message: e.to_string(),
                            }
                        }
                    };
                    let _ = results.send(input);
                });
            }
            Effect::EndSession { identity, attempt } => {
                let control = Arc::clone(&backend.control);
                let results = self.results_tx.clone();
                tokio::spawn(async move {
                    let result = control.end(&identity).await;
                    let input = match result {
                        Ok(()) => Input::LogoutSucceeded { identity, attempt },
                        Err(e) => {
                            warn!(%identity, attempt, error = %e, "session end failed");
                            Input::LogoutFailed {
                                identity,
                                attempt,
                                message: e.to_string(),
                            }
                        }
                    };
                    let _ = results.send(input);
                });
            }
            Effect::ArmTimeout => {
                self.deadline = self.pairing_timeout.map(|t| Instant::now() + t);
            }
            Effect::DisarmTimeout => self.deadline = None,
            Effect::ResetNavigation => {
                let entry = entry_point(&self.navigation.current());
                self.navigation.replace(entry);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.deadline = None;
        if let Some(channel) = &mut self.channel {
            channel.shutdown().await;
        }
    }
}

async fn next_update(
    updates: &mut Option<mpsc::UnboundedReceiver<ChannelUpdate>>,
) -> Option<ChannelUpdate> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

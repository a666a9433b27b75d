//! The session push channel.
//!
//! [`SessionChannel`] owns at most one [`Subscription`]. Subscribing spawns a
//! reader task that connects, sends `join`, and forwards decoded events as
//! [`ChannelUpdate`]s tagged with the subscription's generation. Whoever
//! drains the updates compares that generation against
//! [`SessionChannel::active_generation`] and drops anything older, so an
//! event that was in flight during an unsubscribe is never acted on.
//!
//! ```text
//!   subscribe(u1) ──→ [reader gen=1] ──connect──→ join ──→ Joined
//!                                                   ├──→ Event(..)
//!                                                   └──→ Closed(reason)
//!   unsubscribe() ──→ abort gen=1, close or park the connection
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use calpair_protocol::{ChannelEvent, ChannelSignal, Codec, Identity, JsonCodec};
use calpair_transport::{Connection, Connector};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, ReconnectPolicy};

/// Something the reader task observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// `join` was sent on a fresh (or reused) connection.
    Joined,
    /// A decoded push event.
    Event(ChannelEvent),
    /// A frame that could not be decoded. Never a state change.
    Anomaly(String),
    /// The reader gave up; no more updates follow for this generation.
    Closed(String),
}

/// An update from the reader task of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub generation: u64,
    pub kind: UpdateKind,
}

type ConnectionSlot<T> = Arc<Mutex<Option<Arc<T>>>>;

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live subscription for one identity.
pub struct Subscription<T> {
    generation: u64,
    identity: Identity,
    task: JoinHandle<()>,
    connection: ConnectionSlot<T>,
}

impl<T> Subscription<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// A push channel client with at most one active subscription.
pub struct SessionChannel<K: Connector, C: Codec = JsonCodec> {
    connector: Arc<K>,
    codec: Arc<C>,
    url: String,
    config: ChannelConfig,
    active: Option<Subscription<K::Connection>>,
    /// A connection kept open after unsubscribe for the next subscription.
    parked: Option<Arc<K::Connection>>,
    next_generation: u64,
    updates: mpsc::UnboundedSender<ChannelUpdate>,
}

impl<K: Connector> SessionChannel<K> {
    /// A JSON channel for `url`. Updates arrive on the returned receiver.
    pub fn new(
        connector: Arc<K>,
        url: impl Into<String>,
        config: ChannelConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelUpdate>) {
        Self::with_codec(connector, JsonCodec, url, config)
    }
}

impl<K: Connector, C: Codec> SessionChannel<K, C> {
    pub fn with_codec(
        connector: Arc<K>,
        codec: C,
        url: impl Into<String>,
        config: ChannelConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            connector,
            codec: Arc::new(codec),
            url: url.into(),
            config,
            active: None,
            parked: None,
            next_generation: 1,
            updates: tx,
        };
        (channel, rx)
    }

    /// Generation of the active subscription, if any.
    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(Subscription::generation)
    }

    pub fn subscription(&self) -> Option<&Subscription<K::Connection>> {
        self.active.as_ref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    /// Subscribes for `identity`, replacing any existing subscription.
    ///
    /// Returns the new generation.
    pub fn subscribe(&mut self, identity: Identity) -> u64 {
        if self.active.is_some() {
            self.unsubscribe();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let slot: ConnectionSlot<K::Connection> = Arc::new(Mutex::new(None));
        let reader = Reader {
            connector: Arc::clone(&self.connector),
            codec: Arc::clone(&self.codec),
            url: self.url.clone(),
            identity: identity.clone(),
            generation,
            policy: self.config.reconnect.clone(),
            slot: Arc::clone(&slot),
            updates: self.updates.clone(),
        };
        let reused = self.parked.take();
        if reused.is_some() {
            debug!(generation, "reusing parked channel connection");
        }
        let task = tokio::spawn(reader.run(reused));

        info!(generation, %identity, url = %self.url, "subscribed to session channel");
        self.active = Some(Subscription {
            generation,
            identity,
            task,
            connection: slot,
        });
        generation
    }

    /// Tears down the active subscription. A no-op without one.
    ///
    /// The reader task is aborted before this returns, so it delivers no
    /// further updates. The connection is closed in the background, or
    /// parked when `close_on_unsubscribe` is off.
    pub fn unsubscribe(&mut self) {
        let Some(connection) = self.detach() else {
            return;
        };
        if self.config.close_on_unsubscribe {
            tokio::spawn(async move {
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "channel close failed");
                }
            });
        } else if let Some(previous) = self.parked.replace(connection) {
            tokio::spawn(async move {
                let _ = previous.close().await;
            });
        }
    }

    /// Unsubscribes and closes every connection, parked ones included.
    pub async fn shutdown(&mut self) {
        let connections = self.detach().into_iter().chain(self.parked.take());
        for connection in connections {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "channel close failed");
            }
        }
    }

    /// Stops the reader task and hands back its connection, if it had one.
    fn detach(&mut self) -> Option<Arc<K::Connection>> {
        let sub = self.active.take()?;
        sub.task.abort();
        info!(
            generation = sub.generation,
            identity = %sub.identity,
            "unsubscribed from session channel"
        );
        lock(&sub.connection).take()
    }
}

impl<K: Connector, C: Codec> Drop for SessionChannel<K, C> {
    fn drop(&mut self) {
        if let Some(sub) = self.active.take() {
            sub.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

struct Reader<K: Connector, C: Codec> {
    connector: Arc<K>,
    codec: Arc<C>,
    url: String,
    identity: Identity,
    generation: u64,
    policy: ReconnectPolicy,
    slot: ConnectionSlot<K::Connection>,
    updates: mpsc::UnboundedSender<ChannelUpdate>,
}

impl<K: Connector, C: Codec> Reader<K, C> {
    async fn run(self, mut reused: Option<Arc<K::Connection>>) {
        let join = match self.codec.encode(&ChannelSignal::Join(self.identity.clone())) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.emit(UpdateKind::Closed(e.to_string()));
                return;
            }
        };

        let mut attempt: u32 = 0;
        loop {
            let connection = match reused.take() {
                Some(connection) => connection,
                None => match self.connector.connect(&self.url).await {
                    Ok(connection) => Arc::new(connection),
                    Err(e) => {
                        warn!(generation = self.generation, error = %e, "channel connect failed");
                        if self.retry(&mut attempt, e.to_string()).await {
                            continue;
                        }
                        return;
                    }
                },
            };
            *lock(&self.slot) = Some(Arc::clone(&connection));

            if let Err(e) = connection.send(&join).await {
                lock(&self.slot).take();
                warn!(generation = self.generation, error = %e, "channel join failed");
                if self.retry(&mut attempt, e.to_string()).await {
                    continue;
                }
                return;
            }

            attempt = 0;
            debug!(generation = self.generation, conn = %connection.id(), "channel joined");
            if !self.emit(UpdateKind::Joined) {
                return;
            }

            let reason = self.read(&connection).await;
            lock(&self.slot).take();
            match reason {
                Some(reason) => {
                    warn!(generation = self.generation, %reason, "channel dropped");
                    if !self.retry(&mut attempt, reason).await {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    /// Forwards events until the connection ends. Returns the reason it
    /// ended, or `None` when nobody is listening anymore.
    async fn read(&self, connection: &K::Connection) -> Option<String> {
        loop {
            let kind = match connection.recv().await {
                Ok(Some(bytes)) => match self.codec.decode::<ChannelEvent>(&bytes) {
                    Ok(event) => UpdateKind::Event(event),
                    Err(e) => {
                        debug!(
                            generation = self.generation,
                            error = %e,
                            "undecodable channel frame"
                        );
                        UpdateKind::Anomaly(e.to_string())
                    }
                },
                Ok(None) => return Some("closed by server".to_string()),
                Err(e) => return Some(e.to_string()),
            };
            if !self.emit(kind) {
                return None;
            }
        }
    }

    /// Sleeps before the next attempt, or reports `Closed` and returns
    /// `false` when the policy is exhausted.
    async fn retry(&self, attempt: &mut u32, reason: String) -> bool {
        if !self.policy.allows(*attempt) {
            self.emit(UpdateKind::Closed(reason));
            return false;
        }
        let delay = retry_delay(&self.policy, *attempt);
        debug!(generation = self.generation, attempt = *attempt, ?delay, "channel reconnecting");
        *attempt += 1;
        tokio::time::sleep(delay).await;
        true
    }

    fn emit(&self, kind: UpdateKind) -> bool {
        self.updates
            .send(ChannelUpdate {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// Backoff plus a random share of the configured jitter.
fn retry_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let jitter_ms = u64::try_from(policy.jitter.as_millis()).unwrap_or(u64::MAX);
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    policy.backoff(attempt) + Duration::from_millis(extra)
}

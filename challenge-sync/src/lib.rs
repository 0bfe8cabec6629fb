//! Client-side state for collaborative challenges: a session owns one challenge's store, applies
//! optimistic actions with rollback, reconciles push-channel events, and replays penalty draws.

use challenge_model::rng::{derive_seed, pcg_from_seed};
use challenge_model::ChallengeSnapshot;
use rand::Rng;
use rand_pcg::Pcg64Mcg;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{info, warn};

mod actions;
pub mod config;
pub mod error;
pub mod events;
pub mod inflight;
pub mod local;
pub mod membership;
pub mod net;
pub mod penalty;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::SessionConfig;
pub use error::{LocalStoreError, ReconciliationWarning, RemoteError, Result, SyncError};
pub use local::{FileBackend, LocalChallengeStore, LocalTransport, MemoryBackend};
pub use membership::MembershipState;
pub use net::{ApiCall, Channel, ChannelEvent, EventKind, Transport};
pub use penalty::PenaltyPhase;
pub use store::{GroupView, StateStore, StoreSnapshot};

use inflight::InflightRegistry;
use net::EventHandler;
use penalty::PenaltyEngine;

pub type ChangeListener = Arc<dyn Fn(&StoreSnapshot) + Send + Sync>;

struct Inner {
    store: StateStore,
    inflight: InflightRegistry<actions::Undo>,
    penalty: PenaltyEngine,
    rng: Pcg64Mcg,
}

/// One open challenge. Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ChallengeSession {
    challenge_id: String,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(u64, ChangeListener)>>,
    next_listener: AtomicU64,
    connected: AtomicBool,
}

impl ChallengeSession {
    pub fn new(
        snapshot: ChallengeSnapshot,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let challenge_id = snapshot.challenge.id.clone();
        let base_seed = config
            .rng_seed
            .unwrap_or_else(|| rand::thread_rng().gen::<u64>());
        let rng = pcg_from_seed(derive_seed(base_seed, &challenge_id));
        let store = StateStore::from_snapshot(snapshot);
        info!(
            challenge_id = %challenge_id,
            groups = store.groups().len(),
            local = store.challenge().is_local,
            membership = ?store.membership(),
            "challenge session opened"
        );
        Self {
            challenge_id,
            config,
            transport,
            inner: Mutex::new(Inner {
                store,
                inflight: InflightRegistry::default(),
                penalty: PenaltyEngine::default(),
                rng,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Fetches the server snapshot and opens a session, auto-joining when configured.
    pub async fn load(
        challenge_id: &str,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Arc<Self>> {
        let raw = transport
            .call(ApiCall::FetchState {
                challenge_id: challenge_id.to_string(),
            })
            .await?;
        let snapshot: ChallengeSnapshot =
            serde_json::from_value(raw).map_err(RemoteError::malformed)?;
        let session = Arc::new(Self::new(snapshot, transport, config));
        if session.config.auto_join {
            if let Err(err) = session.auto_join().await {
                warn!(challenge_id, error = %err, "auto-join failed");
            }
        }
        Ok(session)
    }

    /// Opens a device-only challenge from its stored record.
    pub fn open_local(
        store: Arc<LocalChallengeStore>,
        id: &str,
        config: SessionConfig,
    ) -> std::result::Result<Arc<Self>, LocalStoreError> {
        let record = store.get(id)?;
        let snapshot = local::local_snapshot(&record);
        let transport = Arc::new(LocalTransport::new(store));
        Ok(Arc::new(Self::new(snapshot, transport, config)))
    }

    pub fn challenge_id(&self) -> &str {
        &self.challenge_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn room_id(&self) -> String {
        self.config.room_id(&self.challenge_id)
    }

    /// Subscribes to every event kind in this challenge's room. Handlers hold a weak reference,
    /// so a dropped session stops reacting without unsubscribing.
    pub fn attach(self: &Arc<Self>, channel: &dyn Channel) {
        let room = self.room_id();
        for kind in EventKind::ALL {
            let session: Weak<Self> = Arc::downgrade(self);
            let handler: EventHandler = Arc::new(move |event: ChannelEvent| {
                if let Some(session) = session.upgrade() {
                    let _ = session.handle_event(event);
                }
            });
            channel.subscribe(&room, kind, handler);
        }
        info!(room = %room, "attached to challenge channel");
    }

    /// Channel (re)connected. Pulls a full snapshot to cover anything missed while away.
    pub async fn on_connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!(room = %self.room_id(), "channel connected");
        if !self.config.resync_on_connect {
            return Ok(());
        }
        let raw = self
            .transport
            .call(ApiCall::FetchState {
                challenge_id: self.challenge_id.clone(),
            })
            .await?;
        let snapshot: ChallengeSnapshot =
            serde_json::from_value(raw).map_err(RemoteError::malformed)?;
        let _ = self.handle_event(ChannelEvent::from_snapshot(snapshot));
        Ok(())
    }

    /// Channel dropped. An initiator waiting for its penalty echo is released, since the echo
    /// may never arrive.
    pub fn on_disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.lock().penalty.cancel_echo();
        info!(room = %self.room_id(), reason, "channel disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Applies one broadcast. Warnings are logged and returned; the store is left untouched
    /// when an event cannot be applied.
    pub fn handle_event(&self, event: ChannelEvent) -> std::result::Result<(), ReconciliationWarning> {
        let kind = event.kind();
        let outcome = {
            let mut inner = self.lock();
            let applied = events::apply_event(&mut inner.store, &event);
            match (applied, event) {
                (Ok(()), ChannelEvent::PenaltySelection {
                    group_id,
                    descriptor,
                }) => {
                    let consistent = descriptor.is_consistent();
                    inner.penalty.replay(group_id, descriptor);
                    if consistent {
                        Ok(())
                    } else {
                        Err(ReconciliationWarning::UnexpectedDescriptor { group_id })
                    }
                }
                (applied, ChannelEvent::FullResync { .. }) => {
                    inner.penalty.cancel_echo();
                    applied
                }
                (applied, _) => applied,
            }
        };
        if let Err(warning) = &outcome {
            warn!(event = kind.as_str(), %warning, "channel event not fully applied");
        }
        self.notify();
        outcome
    }

    pub fn get_snapshot(&self) -> StoreSnapshot {
        let inner = self.lock();
        inner.store.snapshot(inner.penalty.phase().clone())
    }

    pub fn subscribe_to_changes(&self, listener: ChangeListener) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn penalty_phase(&self) -> PenaltyPhase {
        self.lock().penalty.phase().clone()
    }

    /// Moves the penalty replay one wheel forward, once the presentation finished animating.
    pub fn advance_penalty(&self) -> PenaltyPhase {
        let phase = self.lock().penalty.advance().clone();
        self.notify();
        phase
    }

    /// Skips the remaining wheels and shows the result.
    pub fn finish_penalty(&self) -> PenaltyPhase {
        let phase = self.lock().penalty.finish().clone();
        self.notify();
        phase
    }

    pub fn dismiss_penalty(&self) {
        self.lock().penalty.dismiss();
        self.notify();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands a fresh snapshot to every listener. No lock is held while listeners run.
    fn notify(&self) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.get_snapshot();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

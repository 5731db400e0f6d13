pub mod category;
pub mod match_session;
mod sse;
pub mod state_machine;
pub mod transitions;

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{
    sync::{Mutex, Notify, OwnedMutexGuard, RwLock, broadcast, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        match_store::MatchStore,
        models::{MatchCommit, OutboxEntity, TurnEntity, UserStatsEntity},
    },
    dto::sse::ServerEvent,
    error::ServiceError,
    state::match_session::{MatchSession, MatchStatus},
};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const MATCH_SSE_CAPACITY: usize = 32;

/// Per-match coordination: the single-writer gate, the cached session and the event hub.
pub struct MatchSlot {
    gate: Arc<Mutex<()>>,
    session: RwLock<Option<MatchSession>>,
    sse: SseHub,
}

impl MatchSlot {
    fn new() -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            session: RwLock::new(None),
            sse: SseHub::new(MATCH_SSE_CAPACITY),
        }
    }

    /// Event hub of the match.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }
}

/// Countdown task armed for a pending question.
pub(crate) struct ArmedTimer {
    pub(crate) question_id: Uuid,
    pub(crate) handle: JoinHandle<()>,
}

/// Everything a command produced, ready to be committed as one unit.
pub struct StagedTransition<T> {
    pub session: MatchSession,
    pub turn: Option<TurnEntity>,
    pub stats: Vec<UserStatsEntity>,
    pub outbox: Vec<OutboxEntity>,
    pub value: T,
}

impl<T> StagedTransition<T> {
    pub fn new(session: MatchSession, value: T) -> Self {
        Self {
            session,
            turn: None,
            stats: Vec::new(),
            outbox: Vec::new(),
            value,
        }
    }

    pub fn with_turn(mut self, turn: TurnEntity) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn with_stats(mut self, stats: Vec<UserStatsEntity>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_outbox(mut self, outbox: Vec<OutboxEntity>) -> Self {
        self.outbox.extend(outbox);
        self
    }

    /// Replace the value handed back to the caller.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StagedTransition<U> {
        StagedTransition {
            session: self.session,
            turn: self.turn,
            stats: self.stats,
            outbox: self.outbox,
            value: f(self.value),
        }
    }
}

/// Result of [`AppState::run_transition`].
pub struct TransitionOutcome<T> {
    pub value: T,
    /// Session as committed (or unchanged when nothing was applied).
    pub session: MatchSession,
    pub turn: Option<TurnEntity>,
    /// Number of notifications enqueued by the commit.
    pub notifications: usize,
    /// Whether a new version was written.
    pub changed: bool,
    /// Single-writer gate, still held so effects publish in commit order.
    pub(crate) gate: OwnedMutexGuard<()>,
}

/// A match session read under its single-writer gate; the gate opens on drop.
pub struct MatchLock {
    pub session: MatchSession,
    _gate: OwnedMutexGuard<()>,
}

/// Central application state: storage handle, configuration and per-match coordination.
pub struct AppState {
    store: RwLock<Option<Arc<dyn MatchStore>>>,
    config: AppConfig,
    matches: DashMap<Uuid, Arc<MatchSlot>>,
    timers: DashMap<Uuid, ArmedTimer>,
    outbox_wake: Notify,
    degraded: watch::Sender<bool>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_transition_timeout(config, Some(DEFAULT_TRANSITION_TIMEOUT))
    }

    /// Same as [`AppState::new`] with a custom bound on transition work.
    pub fn with_transition_timeout(config: AppConfig, limit: Option<Duration>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            config,
            matches: DashMap::new(),
            timers: DashMap::new(),
            outbox_wake: Notify::new(),
            degraded: degraded_tx,
            transition_timeout: limit,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current match store, if one is installed.
    pub async fn match_store(&self) -> Option<Arc<dyn MatchStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn MatchStore>, ServiceError> {
        if *self.degraded.borrow() {
            return Err(ServiceError::Degraded);
        }
        self.match_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new match store implementation and leave degraded mode.
    pub async fn set_match_store(&self, store: Arc<dyn MatchStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current match store and enter degraded mode.
    pub async fn clear_match_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none() || *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Wake the outbox dispatcher.
    pub fn wake_outbox(&self) {
        self.outbox_wake.notify_one();
    }

    /// Wait until new outbox entries are committed.
    pub async fn outbox_woken(&self) {
        self.outbox_wake.notified().await;
    }

    /// Coordination slot of a match that is already tracked.
    pub fn match_slot(&self, match_id: Uuid) -> Option<Arc<MatchSlot>> {
        self.matches.get(&match_id).map(|slot| Arc::clone(&slot))
    }

    /// Number of matches with a live coordination slot.
    pub fn tracked_matches(&self) -> usize {
        self.matches.len()
    }

    fn register_slot(&self, match_id: Uuid) -> Arc<MatchSlot> {
        self.matches
            .entry(match_id)
            .or_insert_with(|| Arc::new(MatchSlot::new()))
            .clone()
    }

    /// Slot to run `match_id` through, loading the match when it is not tracked.
    ///
    /// Unknown matches get no slot. A finished match gets a detached slot that is
    /// never registered, so it cannot outlive [`AppState::release_match`].
    async fn slot_for(&self, match_id: Uuid) -> Result<Arc<MatchSlot>, ServiceError> {
        if let Some(slot) = self.match_slot(match_id) {
            return Ok(slot);
        }

        let session = self.fetch_session(match_id).await?;
        let slot = if session.status() == MatchStatus::Finished {
            Arc::new(MatchSlot::new())
        } else {
            self.register_slot(match_id)
        };
        {
            let mut cached = slot.session.write().await;
            if cached.is_none() {
                *cached = Some(session);
            }
        }
        Ok(slot)
    }

    async fn fetch_session(&self, match_id: Uuid) -> Result<MatchSession, ServiceError> {
        let store = self.require_store().await?;
        let entity = store
            .find_match(match_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("match `{match_id}` not found")))?;
        Ok(MatchSession::from(entity))
    }

    /// Drop the slot of a match, closing its event streams.
    pub fn release_match(&self, match_id: Uuid) {
        self.matches.remove(&match_id);
        self.cancel_timer(match_id);
    }

    /// Subscribe to the events of a tracked match.
    pub fn subscribe_match(&self, match_id: Uuid) -> Option<broadcast::Receiver<ServerEvent>> {
        self.match_slot(match_id).map(|slot| slot.sse().subscribe())
    }

    /// Broadcast an event to the subscribers of one match, if any.
    pub fn broadcast_match(&self, match_id: Uuid, event: ServerEvent) {
        if let Some(slot) = self.match_slot(match_id) {
            slot.sse().broadcast(event);
        }
    }

    /// Cache a freshly inserted session.
    pub async fn cache_session(&self, session: MatchSession) {
        let slot = self.register_slot(session.id);
        *slot.session.write().await = Some(session);
    }

    /// Load a session from the cache, falling back to the store.
    pub async fn load_session(&self, match_id: Uuid) -> Result<MatchSession, ServiceError> {
        let slot = self.slot_for(match_id).await?;
        self.load_into(&slot, match_id).await
    }

    /// Hold the single-writer gate of a match while reading its session.
    pub async fn lock_match(&self, match_id: Uuid) -> Result<MatchLock, ServiceError> {
        let slot = self.slot_for(match_id).await?;
        let gate = Arc::clone(&slot.gate).lock_owned().await;
        let session = self.load_into(&slot, match_id).await?;
        Ok(MatchLock {
            session,
            _gate: gate,
        })
    }

    async fn load_into(
        &self,
        slot: &MatchSlot,
        match_id: Uuid,
    ) -> Result<MatchSession, ServiceError> {
        if let Some(session) = slot.session.read().await.as_ref() {
            return Ok(session.clone());
        }

        let session = self.fetch_session(match_id).await?;
        *slot.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Run a command against one match under its single-writer gate.
    ///
    /// `work` receives a clone of the current session and stages the new one. The
    /// staged result is committed with the version `work` started from; only then is
    /// the cached session replaced. When `work` leaves the version unchanged nothing
    /// is written.
    pub async fn run_transition<F, Fut, T>(
        &self,
        match_id: Uuid,
        expected_version: Option<u64>,
        work: F,
    ) -> Result<TransitionOutcome<T>, ServiceError>
    where
        F: FnOnce(MatchSession) -> Fut,
        Fut: Future<Output = Result<StagedTransition<T>, ServiceError>>,
    {
        let slot = self.slot_for(match_id).await?;
        let gate = Arc::clone(&slot.gate).lock_owned().await;
        let current = self.load_into(&slot, match_id).await?;

        if let Some(expected) = expected_version.filter(|v| *v != current.version()) {
            return Err(ServiceError::Conflict(format!(
                "match `{match_id}` is at version {}, not {expected}",
                current.version()
            )));
        }

        let store = self.require_store().await?;
        let base_version = current.version();
        let unit = async move {
            let staged = work(current).await?;
            if staged.session.version() == base_version {
                return Ok((staged, false));
            }
            store
                .commit(MatchCommit {
                    entity: staged.session.clone().into(),
                    expected_version: base_version,
                    turn: staged.turn.clone(),
                    stats: staged.stats.clone(),
                    outbox: staged.outbox.clone(),
                })
                .await?;
            Ok::<_, ServiceError>((staged, true))
        };

        let outcome = match self.transition_timeout {
            Some(limit) => match timeout(limit, unit).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(%match_id, version = base_version, "match transition timed out");
                    // The commit may or may not have landed; reload on next use.
                    slot.session.write().await.take();
                    return Err(ServiceError::Timeout);
                }
            },
            None => unit.await,
        };

        match outcome {
            Ok((staged, changed)) => {
                if changed {
                    debug!(
                        %match_id,
                        version = staged.session.version(),
                        "match transition committed"
                    );
                    *slot.session.write().await = Some(staged.session.clone());
                }
                Ok(TransitionOutcome {
                    value: staged.value,
                    notifications: staged.outbox.len(),
                    turn: staged.turn,
                    session: staged.session,
                    changed,
                    gate,
                })
            }
            Err(ServiceError::Conflict(message)) => {
                warn!(%match_id, version = base_version, "stale cached match; dropping cache");
                slot.session.write().await.take();
                Err(ServiceError::Conflict(message))
            }
            Err(err) => Err(err),
        }
    }

    /// Store the countdown task of a match, aborting the previous one.
    pub(crate) fn replace_timer(&self, match_id: Uuid, timer: ArmedTimer) {
        if let Some(previous) = self.timers.insert(match_id, timer) {
            previous.handle.abort();
        }
    }

    /// Question currently guarded by a countdown, if any.
    pub(crate) fn armed_question(&self, match_id: Uuid) -> Option<Uuid> {
        self.timers.get(&match_id).map(|timer| timer.question_id)
    }

    /// Forget a fired countdown without aborting it.
    pub(crate) fn disarm_fired(&self, match_id: Uuid, question_id: Uuid) {
        self.timers
            .remove_if(&match_id, |_, timer| timer.question_id == question_id);
    }

    /// Abort the countdown of a match, if any.
    pub fn cancel_timer(&self, match_id: Uuid) {
        if let Some((_, timer)) = self.timers.remove(&match_id) {
            timer.handle.abort();
        }
    }
}

//! # State Coordinator
//!
//! Owns this process's view of every known [`PlayerRecord`] and is the only
//! writer to the [`PlayerStore`]. Local events go read -> compute ->
//! compare-and-swap -> broadcast; remote envelopes are applied by version.
//!
//! ## Ordering rules
//!
//! * All mutations for one player are serialized by a per-identity lock.
//!   Different players never wait on each other.
//! * Local writes are decided by the store's compare-and-swap. The first
//!   create for an identity wins version 1; every loser re-reads and treats
//!   its own event as an ordinary join. This is what makes "first join ever"
//!   fire exactly once for processes that share a CAS point.
//! * Remote envelopes apply only when their version is strictly greater than
//!   the known one (deltas: exactly one greater). Wall clocks are never
//!   compared. Received envelopes are never re-broadcast.
//! * Store failures are retried a bounded number of times; after that the
//!   event fails closed to the default template instead of blocking.

use crate::error::{CoordinatorError, CoordinatorResult, StoreError};
use crate::replication::{apply_delta, diff, Payload, ReplicationLink, ReplicationMessage};
use crate::store::{version_of, CasOutcome, PlayerStore};
use crate::types::{
    EventScope, JoinEvent, LeaveEvent, PlayerEvent, PlayerId, PlayerRecord, ProcessId,
    ResolvedContext, Timestamp,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Store attempts after the first one before an event fails closed.
pub const DEFAULT_MAX_STORE_RETRIES: u32 = 3;

/// What happened to a received replication envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The local view moved forward.
    Applied,
    /// Version not newer than what is already known.
    Stale,
    /// Delta whose base version is not known here; waits for a snapshot.
    OutOfOrder,
    /// Originated by this process.
    Ignored,
}

/// Point-in-time coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub local_events: u64,
    pub first_joins: u64,
    pub version_conflicts: u64,
    pub store_retries: u64,
    pub degraded_events: u64,
    pub remote_applied: u64,
    pub remote_stale: u64,
    pub remote_out_of_order: u64,
    pub known_players: usize,
}

#[derive(Debug, Default)]
struct Counters {
    local_events: AtomicU64,
    first_joins: AtomicU64,
    version_conflicts: AtomicU64,
    store_retries: AtomicU64,
    degraded_events: AtomicU64,
    remote_applied: AtomicU64,
    remote_stale: AtomicU64,
    remote_out_of_order: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone)]
struct ViewEntry {
    record: PlayerRecord,
    /// Last written by this process; included in periodic snapshots.
    authored: bool,
}

/// A committed read-compute-CAS cycle.
struct Committed {
    previous: Option<PlayerRecord>,
    current: PlayerRecord,
}

pub struct StateCoordinator {
    process: ProcessId,
    store: Arc<dyn PlayerStore>,
    link: Arc<ReplicationLink>,
    view: DashMap<PlayerId, ViewEntry>,
    locks: DashMap<PlayerId, Arc<Mutex<()>>>,
    max_store_retries: u32,
    counters: Counters,
}

impl StateCoordinator {
    pub fn new(store: Arc<dyn PlayerStore>, link: Arc<ReplicationLink>) -> Self {
        Self {
            process: link.local().clone(),
            store,
            link,
            view: DashMap::new(),
            locks: DashMap::new(),
            max_store_retries: DEFAULT_MAX_STORE_RETRIES,
            counters: Counters::default(),
        }
    }

    pub fn with_max_store_retries(mut self, retries: u32) -> Self {
        self.max_store_retries = retries;
        self
    }

    pub fn process(&self) -> &ProcessId {
        &self.process
    }

    pub fn link(&self) -> &ReplicationLink {
        &self.link
    }

    pub fn store(&self) -> &Arc<dyn PlayerStore> {
        &self.store
    }

    /// Loads every stored record into the view. Called once at enable.
    ///
    /// Sessions recorded before this start are not live: a record still
    /// marked online lost its leave to a crash, so the view holds it offline.
    /// The stored record is untouched until the player's next event.
    pub fn warm_up(&self) -> Result<usize, StoreError> {
        let records = self.store.all()?;
        let loaded = records.len();
        let mut closed = 0;
        for (id, mut record) in records {
            let newer = self
                .view
                .get(&id)
                .map_or(true, |known| known.record.version < record.version);
            if newer {
                if record.online {
                    record.online = false;
                    closed += 1;
                }
                self.view.insert(id, ViewEntry { record, authored: false });
            }
        }
        info!("🔄 Loaded {} player record(s) into the local view", loaded);
        if closed > 0 {
            warn!("Closed {} session(s) left open by an unclean stop", closed);
        }
        Ok(loaded)
    }

    /// Record currently known for `id` in the local view.
    pub fn known_record(&self, id: &PlayerId) -> Option<PlayerRecord> {
        self.view.get(id).map(|entry| entry.record.clone())
    }

    /// Players currently marked online in the local view.
    pub fn online_count(&self) -> usize {
        self.view.iter().filter(|entry| entry.record.online).count()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.counters;
        CoordinatorStats {
            local_events: c.local_events.load(Ordering::Relaxed),
            first_joins: c.first_joins.load(Ordering::Relaxed),
            version_conflicts: c.version_conflicts.load(Ordering::Relaxed),
            store_retries: c.store_retries.load(Ordering::Relaxed),
            degraded_events: c.degraded_events.load(Ordering::Relaxed),
            remote_applied: c.remote_applied.load(Ordering::Relaxed),
            remote_stale: c.remote_stale.load(Ordering::Relaxed),
            remote_out_of_order: c.remote_out_of_order.load(Ordering::Relaxed),
            known_players: self.view.len(),
        }
    }

    // ========================================================================
    // Local events
    // ========================================================================

    /// Sole entry point for locally observed events.
    ///
    /// Always returns a context; store trouble degrades to the default
    /// template rather than failing the player's connection.
    pub fn handle_local_event(&self, event: &PlayerEvent) -> ResolvedContext {
        bump(&self.counters.local_events);
        let id = event.identity().id;
        let lock = self.identity_lock(&id);
        let _guard = lock.lock();

        if event.scope() == EventScope::Local {
            return self.resolve_local(event);
        }

        match event {
            PlayerEvent::Join(join) => self.record_join(event, join),
            PlayerEvent::Leave(leave) => self.record_leave(event, leave),
        }
    }

    fn record_join(&self, event: &PlayerEvent, join: &JoinEvent) -> ResolvedContext {
        let id = join.identity.id;
        let committed = match self.commit(&id, |previous| {
            Some(match previous {
                None => PlayerRecord::first_join(&join.identity, &join.backend, join.timestamp),
                Some(prev) => prev.joined(&join.identity, &join.backend, join.timestamp),
            })
        }) {
            Ok(Some(committed)) => committed,
            Ok(None) => return self.fail_closed(event, &"join produced no record"),
            Err(e) => return self.fail_closed(event, &e),
        };

        let is_first_join_ever = committed.previous.is_none();
        if is_first_join_ever {
            bump(&self.counters.first_joins);
            info!(
                "✨ First join ever: {} ({}) on {}",
                join.identity.name, id, join.backend
            );
        } else {
            debug!(
                "👋 {} joined {} (v{})",
                join.identity.name, join.backend, committed.current.version
            );
        }

        let absent_for = committed
            .previous
            .as_ref()
            .and_then(|prev| absence(prev, join.timestamp, self.session_live(&id, prev)));

        self.install(id, committed.current.clone(), true);
        self.link.broadcast(&ReplicationMessage::snapshot(
            self.process.clone(),
            self.link.next_sequence(),
            id,
            committed.current.clone(),
        ));

        ResolvedContext {
            is_first_join_ever,
            template_key: committed.current.override_message_key.clone(),
            absent_for,
            online_count: self.online_count(),
            version: committed.current.version,
            ..ResolvedContext::for_event(event)
        }
    }

    fn record_leave(&self, event: &PlayerEvent, leave: &LeaveEvent) -> ResolvedContext {
        let id = leave.identity.id;
        let committed = match self.commit(&id, |previous| previous.map(|prev| prev.left(leave.timestamp))) {
            Ok(Some(committed)) => committed,
            Ok(None) => {
                debug!("Leave for {} with no stored record", leave.identity.name);
                return ResolvedContext {
                    online_count: self.online_count(),
                    ..ResolvedContext::for_event(event)
                };
            }
            Err(e) => return self.fail_closed(event, &e),
        };

        debug!(
            "🚪 {} left {} (v{})",
            leave.identity.name, leave.backend, committed.current.version
        );
        self.install(id, committed.current.clone(), true);
        self.broadcast_change(id, committed.previous.as_ref(), &committed.current);

        ResolvedContext {
            template_key: committed.current.override_message_key.clone(),
            online_count: self.online_count(),
            version: committed.current.version,
            ..ResolvedContext::for_event(event)
        }
    }

    /// Backend-local observation behind a proxy: read-only, never first-join.
    fn resolve_local(&self, event: &PlayerEvent) -> ResolvedContext {
        let known = self.known_record(&event.identity().id);
        trace!("Local-scope {:?} for {}", event.kind(), event.identity().name);
        ResolvedContext {
            template_key: known.as_ref().and_then(|r| r.override_message_key.clone()),
            online_count: self.online_count(),
            version: version_of(known.as_ref()),
            ..ResolvedContext::for_event(event)
        }
    }

    fn fail_closed(&self, event: &PlayerEvent, reason: &dyn std::fmt::Display) -> ResolvedContext {
        bump(&self.counters.degraded_events);
        error!(
            "⚠️ Falling back to default {} message for {}: {}",
            event.kind().as_str(),
            event.identity().name,
            reason
        );
        ResolvedContext::degraded(event, self.online_count())
    }

    // ========================================================================
    // Administrative mutations
    // ========================================================================

    /// Sets or clears the per-player override template key.
    pub fn set_override(
        &self,
        id: &PlayerId,
        key: Option<String>,
    ) -> CoordinatorResult<PlayerRecord> {
        let lock = self.identity_lock(id);
        let _guard = lock.lock();

        let committed = self
            .commit(id, |previous| previous.map(|prev| prev.with_override(key.clone())))?
            .ok_or(CoordinatorError::UnknownPlayer(*id))?;

        info!("Override for {} set to {:?}", id, committed.current.override_message_key);
        self.install(*id, committed.current.clone(), true);
        self.broadcast_change(*id, committed.previous.as_ref(), &committed.current);
        Ok(committed.current)
    }

    /// Deletes the record for `id` everywhere. The next join is a first join.
    pub fn reset(&self, id: &PlayerId) -> CoordinatorResult<Option<PlayerRecord>> {
        let lock = self.identity_lock(id);
        let _guard = lock.lock();

        let stored = self.with_retries(id, || self.store.remove(id))?;
        let known = self.view.remove(id).map(|(_, entry)| entry.record);
        // An unreadable stored record is gone now; peers still get the
        // incarnation this process knew about.
        let removed = stored.or(known);

        if let Some(record) = &removed {
            info!("🧹 Reset player record {} (was v{})", id, record.version);
            self.link.broadcast(&ReplicationMessage::forget(
                self.process.clone(),
                self.link.next_sequence(),
                *id,
                record.version,
                record.first_seen_at,
            ));
        }
        Ok(removed)
    }

    /// Re-sends a full snapshot of every record this process last wrote.
    /// Bounds staleness for peers that missed a frame.
    pub fn snapshot_broadcast(&self) -> usize {
        let authored: Vec<(PlayerId, PlayerRecord)> = self
            .view
            .iter()
            .filter(|entry| entry.authored)
            .map(|entry| (*entry.key(), entry.record.clone()))
            .collect();

        for (id, record) in &authored {
            self.link.broadcast(&ReplicationMessage::snapshot(
                self.process.clone(),
                self.link.next_sequence(),
                *id,
                record.clone(),
            ));
        }
        if !authored.is_empty() {
            debug!("📡 Periodic snapshot of {} record(s)", authored.len());
        }
        authored.len()
    }

    // ========================================================================
    // Remote envelopes
    // ========================================================================

    /// Applies an envelope received from a peer. Never re-broadcasts.
    pub fn handle_replication_message(&self, message: ReplicationMessage) -> ApplyOutcome {
        if message.origin == self.process {
            return ApplyOutcome::Ignored;
        }

        let id = message.identity;
        let lock = self.identity_lock(&id);
        let _guard = lock.lock();

        let known = self.known_record(&id);
        let known_version = version_of(known.as_ref());
        let kind = message.kind();

        let record = match message.payload {
            Payload::Forget { first_seen_at } => {
                return self.apply_forget(&id, &message.origin, message.version, known.as_ref(), first_seen_at)
            }
            _ if message.version <= known_version => {
                bump(&self.counters.remote_stale);
                trace!(
                    "Stale {} v{} for {} (known v{})",
                    kind,
                    message.version,
                    id,
                    known_version
                );
                return ApplyOutcome::Stale;
            }
            Payload::Snapshot { record } => record,
            Payload::Delta { changes } => {
                let rebuilt = known
                    .as_ref()
                    .filter(|base| base.version + 1 == message.version)
                    .and_then(|base| apply_delta(base, &changes, message.version));
                match rebuilt {
                    Some(record) => record,
                    None => {
                        bump(&self.counters.remote_out_of_order);
                        debug!(
                            "Delta v{} for {} does not follow known v{}; awaiting snapshot",
                            message.version, id, known_version
                        );
                        return ApplyOutcome::OutOfOrder;
                    }
                }
            }
        };

        self.adopt(id, record, &message.origin);
        ApplyOutcome::Applied
    }

    fn adopt(&self, id: PlayerId, record: PlayerRecord, origin: &ProcessId) {
        bump(&self.counters.remote_applied);
        debug!("📥 Applied v{} for {} from {}", record.version, id, origin);
        self.install(id, record.clone(), false);

        // Persist so the replicated knowledge survives a restart. A store
        // that already holds this version or newer is left alone.
        let persisted = self.commit(&id, |stored| {
            (version_of(stored) < record.version).then(|| record.clone())
        });
        if let Err(e) = persisted {
            warn!(
                "Replicated v{} for {} kept in memory only: {}",
                record.version, id, e
            );
        }
    }

    fn apply_forget(
        &self,
        id: &PlayerId,
        origin: &ProcessId,
        version: u64,
        known: Option<&PlayerRecord>,
        first_seen_at: Timestamp,
    ) -> ApplyOutcome {
        // Only the incarnation that was reset, at or below the reset version.
        let matches = |record: &PlayerRecord| {
            record.first_seen_at == first_seen_at && record.version <= version
        };

        if !known.is_some_and(matches) {
            bump(&self.counters.remote_stale);
            return ApplyOutcome::Stale;
        }

        self.view.remove(id);
        let removed = self.with_retries(id, || match self.store.get(id)? {
            Some(stored) if matches(&stored) => self.store.remove(id).map(|_| ()),
            _ => Ok(()),
        });
        if let Err(e) = removed {
            warn!("Reset of {} applied in memory only: {}", id, e);
        }
        bump(&self.counters.remote_applied);
        info!("🧹 Reset of {} received from {}", id, origin);
        ApplyOutcome::Applied
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn identity_lock(&self, id: &PlayerId) -> Arc<Mutex<()>> {
        self.locks
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Whether `stored` describes a session this process still considers
    /// open. Sessions closed at warm-up stay closed until a newer version.
    fn session_live(&self, id: &PlayerId, stored: &PlayerRecord) -> bool {
        stored.online
            && self
                .view
                .get(id)
                .map_or(true, |known| known.record.version != stored.version || known.record.online)
    }

    fn install(&self, id: PlayerId, record: PlayerRecord, authored: bool) {
        self.view.insert(id, ViewEntry { record, authored });
    }

    fn broadcast_change(&self, id: PlayerId, previous: Option<&PlayerRecord>, current: &PlayerRecord) {
        let changes = previous.map(|prev| diff(prev, current)).unwrap_or_default();
        let sequence = self.link.next_sequence();
        let message = if changes.is_empty() {
            ReplicationMessage::snapshot(self.process.clone(), sequence, id, current.clone())
        } else {
            ReplicationMessage::delta(self.process.clone(), sequence, id, current.version, changes)
        };
        self.link.broadcast(&message);
    }

    /// Read -> compute -> compare-and-swap, retried a bounded number of times.
    ///
    /// `compute` returning `None` means "nothing to write" and ends the cycle.
    fn commit<F>(&self, id: &PlayerId, mut compute: F) -> Result<Option<Committed>, CoordinatorError>
    where
        F: FnMut(Option<&PlayerRecord>) -> Option<PlayerRecord>,
    {
        let attempts = self.max_store_retries + 1;
        for attempt in 1..=attempts {
            let previous = match self.store.get(id) {
                Ok(previous) => previous,
                Err(e) if e.is_retryable() => {
                    self.note_retry(id, attempt, &e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(next) = compute(previous.as_ref()) else {
                return Ok(None);
            };

            match self.store.compare_and_swap(id, version_of(previous.as_ref()), &next) {
                Ok(CasOutcome::Swapped) => {
                    return Ok(Some(Committed {
                        previous,
                        current: next,
                    }))
                }
                Ok(CasOutcome::Conflict { current }) => {
                    bump(&self.counters.version_conflicts);
                    debug!(
                        "Version conflict for {} on attempt {}: expected v{}, store has v{}",
                        id,
                        attempt,
                        version_of(previous.as_ref()),
                        version_of(current.as_ref())
                    );
                }
                Err(e) if e.is_retryable() => self.note_retry(id, attempt, &e),
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordinatorError::RetriesExhausted {
            identity: *id,
            attempts,
        })
    }

    fn with_retries<T>(
        &self,
        id: &PlayerId,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, CoordinatorError> {
        let attempts = self.max_store_retries + 1;
        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => self.note_retry(id, attempt, &e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoordinatorError::RetriesExhausted {
            identity: *id,
            attempts,
        })
    }

    fn note_retry(&self, id: &PlayerId, attempt: u32, error: &StoreError) {
        bump(&self.counters.store_retries);
        warn!("Store attempt {} for {} failed: {}", attempt, id, error);
    }
}

/// Offline duration before a join, if the player was actually offline.
fn absence(previous: &PlayerRecord, joined_at: Timestamp, live: bool) -> Option<chrono::Duration> {
    if live {
        return None;
    }
    let gap = joined_at - previous.last_seen_at;
    (gap >= chrono::Duration::zero()).then_some(gap)
}

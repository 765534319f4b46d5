//! # Core Type Definitions
//!
//! Identities, the durable [`PlayerRecord`], the transient lifecycle events
//! produced by the platform adapters, and the [`ResolvedContext`] handed to the
//! template resolver.
//!
//! ## Key Types
//!
//! - [`PlayerId`] - stable platform-assigned UUID, the only key ever used
//! - [`PlayerIdentity`] - id plus the last observed display name
//! - [`ProcessId`] - identifier of a proxy or backend process in the topology
//! - [`PlayerRecord`] - versioned per-player state shared across the network
//! - [`PlayerEvent`] - normalized join/leave event
//! - [`ResolvedContext`] - everything the resolver needs for one message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Wall-clock timestamp. Only used for display and "last seen" bookkeeping,
/// never for conflict resolution.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// Identities
// ============================================================================

/// Unique identifier for a player.
///
/// Wraps the platform-assigned UUID so it cannot be confused with other ids.
/// Display names change between sessions; this does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a random player id (tests and offline-mode hosts).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw UUID bytes, used for deterministic variant selection.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A player as observed by a platform callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub id: PlayerId,
    /// Last observed display name. Never used as a key.
    pub name: String,
}

impl PlayerIdentity {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Identifier of one process (proxy or backend) in the network topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Player Record
// ============================================================================

/// Durable, replicated state for one player.
///
/// Invariants: `first_seen_at <= last_seen_at`, and `version` strictly
/// increases with every mutation. Every constructor below preserves both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Set once, on the first join network-wide.
    pub first_seen_at: Timestamp,
    pub last_seen_at: Timestamp,
    /// Backend the player last joined.
    pub last_backend: String,
    /// Selects a non-default template when set.
    #[serde(default)]
    pub override_message_key: Option<String>,
    /// Monotonic mutation counter; the only conflict-resolution input.
    pub version: u64,
    /// Last observed display name, so replicas can render without the host.
    pub last_name: String,
    #[serde(default)]
    pub online: bool,
}

impl PlayerRecord {
    /// Record for a player's first-ever join.
    pub fn first_join(identity: &PlayerIdentity, backend: &str, now: Timestamp) -> Self {
        Self {
            first_seen_at: now,
            last_seen_at: now,
            last_backend: backend.to_string(),
            override_message_key: None,
            version: 1,
            last_name: identity.name.clone(),
            online: true,
        }
    }

    /// Next version after a join (or backend switch) observed at `now`.
    pub fn joined(&self, identity: &PlayerIdentity, backend: &str, now: Timestamp) -> Self {
        Self {
            last_seen_at: self.clamp_seen(now),
            last_backend: backend.to_string(),
            last_name: identity.name.clone(),
            online: true,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Next version after a leave observed at `now`.
    pub fn left(&self, now: Timestamp) -> Self {
        Self {
            last_seen_at: self.clamp_seen(now),
            online: false,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Next version with a new override key.
    pub fn with_override(&self, key: Option<String>) -> Self {
        Self {
            override_message_key: key,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Whether the ordering invariant on the timestamps holds.
    pub fn is_consistent(&self) -> bool {
        self.version > 0 && self.first_seen_at <= self.last_seen_at
    }

    // Remote clocks may lag; never move last_seen_at behind first_seen_at.
    fn clamp_seen(&self, now: Timestamp) -> Timestamp {
        now.max(self.first_seen_at)
    }
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Whether an event is authoritative for the whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    /// Mutates the record and is replicated to peers.
    Network,
    /// Backend-only observation behind a proxy: rendered locally at most,
    /// never persisted or rebroadcast.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Join,
    Leave,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
        }
    }
}

/// Why a player left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    #[default]
    Quit,
    Kicked,
    NetworkError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEvent {
    pub identity: PlayerIdentity,
    pub backend: String,
    /// Set when a proxy routes an already-connected player to another backend.
    pub previous_backend: Option<String>,
    pub origin: ProcessId,
    pub timestamp: Timestamp,
    pub sequence: u64,
    pub scope: EventScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveEvent {
    pub identity: PlayerIdentity,
    pub backend: String,
    pub reason: LeaveReason,
    pub origin: ProcessId,
    pub timestamp: Timestamp,
    pub sequence: u64,
    pub scope: EventScope,
}

/// The single normalized event shape the coordinator understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Join(JoinEvent),
    Leave(LeaveEvent),
}

impl PlayerEvent {
    pub fn identity(&self) -> &PlayerIdentity {
        match self {
            PlayerEvent::Join(e) => &e.identity,
            PlayerEvent::Leave(e) => &e.identity,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::Join(_) => EventKind::Join,
            PlayerEvent::Leave(_) => EventKind::Leave,
        }
    }

    pub fn backend(&self) -> &str {
        match self {
            PlayerEvent::Join(e) => &e.backend,
            PlayerEvent::Leave(e) => &e.backend,
        }
    }

    pub fn scope(&self) -> EventScope {
        match self {
            PlayerEvent::Join(e) => e.scope,
            PlayerEvent::Leave(e) => e.scope,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            PlayerEvent::Join(e) => e.timestamp,
            PlayerEvent::Leave(e) => e.timestamp,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            PlayerEvent::Join(e) => e.sequence,
            PlayerEvent::Leave(e) => e.sequence,
        }
    }
}

/// Per-process monotonic counter for event and replication sequence numbers.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns the next sequence number, starting at 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Resolved Context
// ============================================================================

/// Everything the template resolver needs for one event. Produced by the
/// coordinator, consumed once, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    pub identity: PlayerIdentity,
    pub kind: EventKind,
    /// Computed from the pre-update absence observed by the winning
    /// compare-and-swap, never from the post-update record.
    pub is_first_join_ever: bool,
    pub backend: String,
    pub previous_backend: Option<String>,
    /// Override template key carried by the record, if any.
    pub template_key: Option<String>,
    /// How long the player had been offline before this join.
    pub absent_for: Option<chrono::Duration>,
    pub leave_reason: Option<LeaveReason>,
    pub online_count: usize,
    pub timestamp: Timestamp,
    /// Record version after the event (0 when nothing was persisted).
    pub version: u64,
    /// Set when the store could not be used and the default was chosen.
    pub degraded: bool,
}

impl ResolvedContext {
    /// Skeleton context for `event` with every optional decision off.
    pub fn for_event(event: &PlayerEvent) -> Self {
        let (previous_backend, leave_reason) = match event {
            PlayerEvent::Join(e) => (e.previous_backend.clone(), None),
            PlayerEvent::Leave(e) => (None, Some(e.reason)),
        };
        Self {
            identity: event.identity().clone(),
            kind: event.kind(),
            is_first_join_ever: false,
            backend: event.backend().to_string(),
            previous_backend,
            template_key: None,
            absent_for: None,
            leave_reason,
            online_count: 0,
            timestamp: event.timestamp(),
            version: 0,
            degraded: false,
        }
    }

    /// Fail-closed context: default template, no first-join, no override.
    pub fn degraded(event: &PlayerEvent, online_count: usize) -> Self {
        Self {
            online_count,
            degraded: true,
            ..Self::for_event(event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_join_record() {
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let record = PlayerRecord::first_join(&nova, "survival", at(0));
        assert_eq!(record.version, 1);
        assert_eq!(record.first_seen_at, record.last_seen_at);
        assert_eq!(record.last_backend, "survival");
        assert!(record.online);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_join_keeps_first_seen_and_bumps_version() {
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let first = PlayerRecord::first_join(&nova, "survival", at(0));
        let second = first.left(at(10)).joined(&nova, "creative", at(20));
        assert_eq!(second.version, 3);
        assert_eq!(second.first_seen_at, at(0));
        assert_eq!(second.last_seen_at, at(20));
        assert_eq!(second.last_backend, "creative");
    }

    #[test]
    fn test_skewed_clock_never_breaks_invariant() {
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let first = PlayerRecord::first_join(&nova, "survival", at(100));
        let skewed = first.joined(&nova, "creative", at(5));
        assert!(skewed.is_consistent());
        assert_eq!(skewed.last_seen_at, at(100));
    }

    #[test]
    fn test_sequence_counter_starts_at_one() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_player_id_parse_roundtrip() {
        let id = PlayerId::new();
        let parsed: PlayerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}

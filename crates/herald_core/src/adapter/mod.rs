//! # Event Adapters
//!
//! Normalize host platform callbacks into [`PlayerEvent`]s.
//!
//! Every adapter stamps the originating process, a wall-clock timestamp, and
//! a per-process sequence number. The [`EventScope`] it assigns decides
//! whether the event is authoritative: proxy events always are; backend
//! events are only when no proxy sits in front of the backend.

mod backend;
mod mode;
mod proxy;

pub use backend::BackendAdapter;
pub use mode::{PlatformKind, PluginMode};
pub use proxy::ProxyAdapter;

use crate::types::{
    EventScope, JoinEvent, LeaveEvent, LeaveReason, PlayerEvent, PlayerIdentity, ProcessId,
    SequenceCounter,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Raw callback as delivered by the host, before normalization.
///
/// Proxy platforms produce `ServerConnected`/`Disconnect`; backend platforms
/// produce `PlayerJoin`/`PlayerQuit`/`PlayerKick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformEvent {
    ServerConnected {
        player: PlayerIdentity,
        server: String,
        #[serde(default)]
        previous_server: Option<String>,
    },
    Disconnect {
        player: PlayerIdentity,
        #[serde(default)]
        last_server: Option<String>,
        #[serde(default)]
        reason: LeaveReason,
    },
    PlayerJoin {
        player: PlayerIdentity,
    },
    PlayerQuit {
        player: PlayerIdentity,
        #[serde(default)]
        reason: LeaveReason,
    },
    PlayerKick {
        player: PlayerIdentity,
    },
}

impl PlatformEvent {
    pub fn player(&self) -> &PlayerIdentity {
        match self {
            PlatformEvent::ServerConnected { player, .. }
            | PlatformEvent::Disconnect { player, .. }
            | PlatformEvent::PlayerJoin { player }
            | PlatformEvent::PlayerQuit { player, .. }
            | PlatformEvent::PlayerKick { player } => player,
        }
    }
}

/// Host-platform capability: turns a callback into a normalized event.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> PlatformKind;

    /// `None` for callbacks that carry no join/leave meaning on this
    /// platform (for example a disconnect before any server was reached).
    fn normalize(&self, event: PlatformEvent) -> Option<PlayerEvent>;
}

/// Origin, clock and sequence shared by every event one adapter emits.
#[derive(Debug)]
struct Stamper {
    origin: ProcessId,
    scope: EventScope,
    sequence: SequenceCounter,
}

impl Stamper {
    fn new(origin: ProcessId, scope: EventScope) -> Self {
        Self {
            origin,
            scope,
            sequence: SequenceCounter::new(),
        }
    }

    fn join(&self, identity: PlayerIdentity, backend: String, previous_backend: Option<String>) -> PlayerEvent {
        PlayerEvent::Join(JoinEvent {
            identity,
            backend,
            previous_backend,
            origin: self.origin.clone(),
            timestamp: Utc::now(),
            sequence: self.sequence.next(),
            scope: self.scope,
        })
    }

    fn leave(&self, identity: PlayerIdentity, backend: String, reason: LeaveReason) -> PlayerEvent {
        PlayerEvent::Leave(LeaveEvent {
            identity,
            backend,
            reason,
            origin: self.origin.clone(),
            timestamp: Utc::now(),
            sequence: self.sequence.next(),
            scope: self.scope,
        })
    }
}

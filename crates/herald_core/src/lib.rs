//! # Herald Core
//!
//! Cross-process player-state synchronization and join/leave message
//! resolution for a proxy + backend Minecraft network.
//!
//! ## Architecture Overview
//!
//! ```text
//! host callback -> adapter -> StateCoordinator -> templates::resolve -> MessageSink
//!                                  |    ^
//!                         PlayerStore  ReplicationLink <-> peers
//! ```
//!
//! * [`store`] - durable per-player records with compare-and-swap
//! * [`replication`] - versioned snapshot/delta envelopes over the host channel
//! * [`coordinator`] - single writer; first-join detection and conflict rules
//! * [`templates`] - pure template selection and placeholder rendering
//! * [`adapter`] - platform callback normalization and plugin modes
//! * [`announcer`] - the facade a host embeds
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use herald_core::prelude::*;
//! use std::sync::Arc;
//!
//! struct Chat;
//! impl MessageSink for Chat {
//!     fn deliver(&self, audience: Audience, text: &str) {
//!         println!("{:?}: {}", audience, text);
//!     }
//! }
//!
//! struct Channel;
//! impl ReplicationTransport for Channel {
//!     fn send_frame(&self, _target: &ProcessId, _frame: Vec<u8>) {}
//! }
//!
//! let config = HeraldConfig::default();
//! let (link, _inbound, _stream) =
//!     ReplicationLink::new(ProcessId::new("lobby"), Vec::new(), Arc::new(Channel));
//! let coordinator = Arc::new(StateCoordinator::new(Arc::new(MemoryStore::new()), Arc::new(link)));
//! let announcer = Announcer::from_config(&config, coordinator, Arc::new(Chat)).unwrap();
//! ```

pub mod adapter;
pub mod announcer;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod replication;
pub mod store;
pub mod templates;
pub mod types;

pub use announcer::{Announcement, Announcer, Audience, MessageSink};
pub use config::HeraldConfig;
pub use consumer::{ConsumerReport, ReplicationConsumer};
pub use coordinator::{ApplyOutcome, CoordinatorStats, StateCoordinator};
pub use error::{ConfigError, CoordinatorError, ReplicationError, StoreError};
pub use types::*;

/// Everything a host integration usually needs.
pub mod prelude {
    pub use crate::adapter::{PlatformAdapter, PlatformEvent, PlatformKind, PluginMode};
    pub use crate::announcer::{Announcement, Announcer, Audience, MessageSink};
    pub use crate::config::HeraldConfig;
    pub use crate::consumer::ReplicationConsumer;
    pub use crate::coordinator::StateCoordinator;
    pub use crate::replication::{InboundSender, ReplicationLink, ReplicationStream, ReplicationTransport};
    pub use crate::store::{FileStore, MemoryStore, PlayerStore};
    pub use crate::templates::{Resolution, TemplateCatalog};
    pub use crate::types::{PlayerId, PlayerIdentity, ProcessId};
}

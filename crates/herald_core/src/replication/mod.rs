//! Replication between proxy and backend processes.
//!
//! The host channel is unreliable and unordered across senders, so nothing
//! here depends on delivery order or on delivery at all: every envelope is
//! either a full snapshot or a versioned delta, and receivers decide on the
//! version alone. Periodic snapshots bound the staleness after a drop.

mod link;
mod protocol;

pub use link::{
    InboundFrame, InboundSender, LinkStats, LinkStatsSnapshot, ReplicationLink, ReplicationStream,
    ReplicationTransport,
};
pub use protocol::{
    apply_delta, diff, FieldChange, Payload, ReplicationMessage, CHANNEL, PROTOCOL_VERSION,
};

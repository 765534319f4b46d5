//! Wire format for replication envelopes.
//!
//! Every frame is a self-contained JSON document:
//!
//! ```json
//! {"protocol":1,"origin":"proxy-1","sequence":42,
//!  "identity":"5f1c...","version":3,
//!  "payload":{"kind":"delta","changes":[{"field":"online","value":false}]}}
//! ```
//!
//! A frame carries either the full record or a versioned delta, so a receiver
//! can decide what to do with it without having seen any earlier frame.

use crate::error::ReplicationError;
use crate::types::{PlayerId, PlayerRecord, ProcessId, Timestamp};
use serde::{Deserialize, Serialize};

/// Current envelope format version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name of the host plugin channel the frames travel on.
pub const CHANNEL: &str = "herald:sync";

/// One replicated field and its new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldChange {
    LastSeenAt(Timestamp),
    LastBackend(String),
    OverrideMessageKey(Option<String>),
    LastName(String),
    Online(bool),
}

impl FieldChange {
    fn apply(&self, record: &mut PlayerRecord) {
        match self {
            FieldChange::LastSeenAt(at) => record.last_seen_at = *at,
            FieldChange::LastBackend(backend) => record.last_backend = backend.clone(),
            FieldChange::OverrideMessageKey(key) => record.override_message_key = key.clone(),
            FieldChange::LastName(name) => record.last_name = name.clone(),
            FieldChange::Online(online) => record.online = *online,
        }
    }
}

/// Changed fields between two versions of a record. `first_seen_at` never
/// changes and so never appears in a delta.
pub fn diff(old: &PlayerRecord, new: &PlayerRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.last_seen_at != new.last_seen_at {
        changes.push(FieldChange::LastSeenAt(new.last_seen_at));
    }
    if old.last_backend != new.last_backend {
        changes.push(FieldChange::LastBackend(new.last_backend.clone()));
    }
    if old.override_message_key != new.override_message_key {
        changes.push(FieldChange::OverrideMessageKey(new.override_message_key.clone()));
    }
    if old.last_name != new.last_name {
        changes.push(FieldChange::LastName(new.last_name.clone()));
    }
    if old.online != new.online {
        changes.push(FieldChange::Online(new.online));
    }
    changes
}

/// Applies `changes` on top of `base`, producing version `version`.
/// Returns `None` if the result would violate the record invariants.
pub fn apply_delta(base: &PlayerRecord, changes: &[FieldChange], version: u64) -> Option<PlayerRecord> {
    let mut next = base.clone();
    for change in changes {
        change.apply(&mut next);
    }
    next.version = version;
    next.is_consistent().then_some(next)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Full record at the envelope's version.
    Snapshot { record: PlayerRecord },
    /// Field changes producing the envelope's version from `version - 1`.
    Delta { changes: Vec<FieldChange> },
    /// Administrative reset of the incarnation first seen at `first_seen_at`,
    /// covering every version up to the envelope's version.
    Forget { first_seen_at: Timestamp },
}

/// Replication envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    pub protocol: u32,
    pub origin: ProcessId,
    /// Per-origin monotonic sequence number.
    pub sequence: u64,
    pub identity: PlayerId,
    pub version: u64,
    pub payload: Payload,
}

impl ReplicationMessage {
    pub fn snapshot(origin: ProcessId, sequence: u64, identity: PlayerId, record: PlayerRecord) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            origin,
            sequence,
            identity,
            version: record.version,
            payload: Payload::Snapshot { record },
        }
    }

    pub fn delta(
        origin: ProcessId,
        sequence: u64,
        identity: PlayerId,
        version: u64,
        changes: Vec<FieldChange>,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            origin,
            sequence,
            identity,
            version,
            payload: Payload::Delta { changes },
        }
    }

    pub fn forget(
        origin: ProcessId,
        sequence: u64,
        identity: PlayerId,
        version: u64,
        first_seen_at: Timestamp,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            origin,
            sequence,
            identity,
            version,
            payload: Payload::Forget { first_seen_at },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Snapshot { .. } => "snapshot",
            Payload::Delta { .. } => "delta",
            Payload::Forget { .. } => "forget",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ReplicationError> {
        serde_json::to_vec(self).map_err(|e| ReplicationError::Encode(self.identity, e))
    }

    /// Decodes and validates a frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ReplicationError> {
        let message: ReplicationMessage = serde_json::from_slice(frame)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ReplicationError> {
        if self.protocol != PROTOCOL_VERSION {
            return Err(ReplicationError::UnsupportedProtocol(self.protocol));
        }
        if self.version == 0 {
            return Err(ReplicationError::Malformed("version 0".to_string()));
        }
        if self.origin.as_str().is_empty() {
            return Err(ReplicationError::Malformed("empty origin".to_string()));
        }
        match &self.payload {
            Payload::Snapshot { record } if record.version != self.version => {
                Err(ReplicationError::Malformed(format!(
                    "snapshot v{} in envelope v{}",
                    record.version, self.version
                )))
            }
            Payload::Snapshot { record } if !record.is_consistent() => Err(ReplicationError::Malformed(
                "snapshot violates first_seen_at <= last_seen_at".to_string(),
            )),
            Payload::Delta { changes } if changes.is_empty() => {
                Err(ReplicationError::Malformed("empty delta".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerIdentity;
    use chrono::{Duration, Utc};

    fn record() -> (PlayerId, PlayerRecord) {
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        (nova.id, PlayerRecord::first_join(&nova, "survival", Utc::now()))
    }

    #[test]
    fn test_snapshot_frame_decodes() {
        let (id, record) = record();
        let message = ReplicationMessage::snapshot("proxy-1".into(), 7, id, record.clone());
        let decoded = ReplicationMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.kind(), "snapshot");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            ReplicationMessage::decode(b"\x00\x01garbage"),
            Err(ReplicationError::Decode(_))
        ));
        assert!(ReplicationMessage::decode(br#"{"protocol":1}"#).is_err());
    }

    #[test]
    fn test_future_protocol_is_rejected() {
        let (id, record) = record();
        let mut message = ReplicationMessage::snapshot("proxy-1".into(), 1, id, record);
        message.protocol = 99;
        let frame = serde_json::to_vec(&message).unwrap();
        assert!(matches!(
            ReplicationMessage::decode(&frame),
            Err(ReplicationError::UnsupportedProtocol(99))
        ));
    }

    #[test]
    fn test_snapshot_version_mismatch_is_malformed() {
        let (id, record) = record();
        let mut message = ReplicationMessage::snapshot("proxy-1".into(), 1, id, record);
        message.version = 5;
        let frame = serde_json::to_vec(&message).unwrap();
        assert!(matches!(
            ReplicationMessage::decode(&frame),
            Err(ReplicationError::Malformed(_))
        ));
    }

    #[test]
    fn test_diff_and_apply_delta() {
        let (_, base) = record();
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova_2");
        let next = base.left(base.last_seen_at + Duration::seconds(30));
        let next = next.joined(&nova, "creative", next.last_seen_at + Duration::seconds(60));

        let changes = diff(&base, &next);
        assert!(changes.contains(&FieldChange::LastBackend("creative".to_string())));
        assert!(changes.contains(&FieldChange::LastName("Nova_2".to_string())));
        assert!(!changes.iter().any(|c| matches!(c, FieldChange::Online(_))));

        let rebuilt = apply_delta(&base, &changes, next.version).unwrap();
        assert_eq!(rebuilt, next);
    }

    #[test]
    fn test_delta_breaking_invariant_is_refused() {
        let (_, base) = record();
        let changes = vec![FieldChange::LastSeenAt(base.first_seen_at - Duration::days(1))];
        assert!(apply_delta(&base, &changes, 2).is_none());
    }
}

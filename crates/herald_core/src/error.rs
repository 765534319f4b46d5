//! Error types for the synchronization core.
//!
//! None of these ever reach the host's connection path: the announcer turns
//! every failure into a logged, degraded message instead.

use crate::types::PlayerId;
use std::path::PathBuf;
use thiserror::Error;

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure or lock contention. Callers may retry.
    #[error("store unavailable for {key}: {reason}")]
    Unavailable { key: String, reason: String },

    #[error("failed to serialize record {0}: {1}")]
    Serialization(PlayerId, serde_json::Error),

    #[error("corrupt record file {0}: {1}")]
    Corrupt(PathBuf, serde_json::Error),
}

impl StoreError {
    pub fn unavailable(key: impl ToString, reason: impl ToString) -> Self {
        StoreError::Unavailable {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether repeating the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Replication envelope failures. Always dropped and logged by the receiver.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("malformed replication message: {0}")]
    Malformed(String),

    #[error("unsupported replication protocol {0}")]
    UnsupportedProtocol(u32),

    #[error("failed to decode replication frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to encode replication message for {0}: {1}")]
    Encode(PlayerId, serde_json::Error),
}

/// Coordinator operation failures surfaced to administrative callers.
/// Event handling never returns these; it degrades instead.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("gave up on {identity} after {attempts} attempts")]
    RetriesExhausted { identity: PlayerId, attempts: u32 },

    #[error("no record for player {0}")]
    UnknownPlayer(PlayerId),
}

/// Configuration errors, reported at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("process id cannot be empty")]
    EmptyProcessId,

    #[error("process {0} lists itself as a peer")]
    SelfPeer(String),

    #[error("invalid duration '{0}' (expected e.g. 90, 30m, 1d12h)")]
    InvalidDuration(String),

    #[error("invalid {field} format '{format}'")]
    InvalidTimeFormat { field: &'static str, format: String },

    #[error("invalid player id '{0}' in overrides table")]
    InvalidOverrideId(String),

    #[error("file store requires a data directory")]
    MissingDataDir,

    #[error("mode {mode} cannot run on a {platform} platform")]
    ModeMismatch { mode: String, platform: String },
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

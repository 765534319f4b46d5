//! Durable player-record storage.
//!
//! The [`PlayerStore`] trait is the key-value durability interface the
//! coordinator writes through. Two implementations ship with the crate:
//!
//! * [`MemoryStore`] - in-process map; also the shared CAS point when several
//!   coordinators live in one process
//! * [`FileStore`] - one JSON file per player with atomic rewrites and a
//!   lock-file based compare-and-swap that works across processes sharing
//!   the directory

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::{PlayerId, PlayerRecord};

/// Result of a [`PlayerStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The new record was written.
    Swapped,
    /// The stored version did not match; carries what is stored now.
    Conflict { current: Option<PlayerRecord> },
}

/// Key-value durability interface, keyed by the player's UUID.
///
/// Implementations must never drop a write silently: a failed write is an
/// `Err`, and `StoreError::Unavailable` signals that a retry may succeed.
pub trait PlayerStore: Send + Sync + std::fmt::Debug {
    /// Most recent successfully written record for `id`.
    fn get(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError>;

    /// Unconditional, idempotent overwrite.
    fn put(&self, id: &PlayerId, record: &PlayerRecord) -> Result<(), StoreError>;

    /// Writes `record` only if the stored version equals `expected_version`,
    /// where `0` means "no record stored".
    fn compare_and_swap(
        &self,
        id: &PlayerId,
        expected_version: u64,
        record: &PlayerRecord,
    ) -> Result<CasOutcome, StoreError>;

    /// Administrative reset. Returns the removed record.
    fn remove(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError>;

    /// Every stored record.
    fn all(&self) -> Result<Vec<(PlayerId, PlayerRecord)>, StoreError>;

    /// Makes every completed write durable. Called at shutdown.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Stored version of `record`, `0` when absent.
pub fn version_of(record: Option<&PlayerRecord>) -> u64 {
    record.map_or(0, |r| r.version)
}

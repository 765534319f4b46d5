use super::{version_of, CasOutcome, PlayerStore};
use crate::error::StoreError;
use crate::types::{PlayerId, PlayerRecord};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-process store.
///
/// Durable only for the lifetime of the process; used by tests and as the
/// shared compare-and-swap point for coordinators that live side by side.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<PlayerId, PlayerRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl PlayerStore for MemoryStore {
    fn get(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn put(&self, id: &PlayerId, record: &PlayerRecord) -> Result<(), StoreError> {
        self.records.lock().insert(*id, record.clone());
        Ok(())
    }

    fn compare_and_swap(
        &self,
        id: &PlayerId,
        expected_version: u64,
        record: &PlayerRecord,
    ) -> Result<CasOutcome, StoreError> {
        let mut records = self.records.lock();
        let current = records.get(id);
        if version_of(current) != expected_version {
            return Ok(CasOutcome::Conflict {
                current: current.cloned(),
            });
        }
        records.insert(*id, record.clone());
        Ok(CasOutcome::Swapped)
    }

    fn remove(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.records.lock().remove(id))
    }

    fn all(&self) -> Result<Vec<(PlayerId, PlayerRecord)>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerIdentity;
    use chrono::Utc;

    #[test]
    fn test_cas_create_then_conflict() {
        let store = MemoryStore::new();
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let record = PlayerRecord::first_join(&nova, "survival", Utc::now());

        assert_eq!(
            store.compare_and_swap(&nova.id, 0, &record).unwrap(),
            CasOutcome::Swapped
        );

        // A second create against "absent" must lose.
        match store.compare_and_swap(&nova.id, 0, &record).unwrap() {
            CasOutcome::Conflict { current } => assert_eq!(current, Some(record.clone())),
            CasOutcome::Swapped => panic!("second create should conflict"),
        }

        let next = record.left(Utc::now());
        assert_eq!(
            store.compare_and_swap(&nova.id, 1, &next).unwrap(),
            CasOutcome::Swapped
        );
        assert_eq!(store.get(&nova.id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_put_remove_all() {
        let store = MemoryStore::new();
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let record = PlayerRecord::first_join(&nova, "survival", Utc::now());

        store.put(&nova.id, &record).unwrap();
        store.put(&nova.id, &record).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.all().unwrap(), vec![(nova.id, record.clone())]);

        assert_eq!(store.remove(&nova.id).unwrap(), Some(record));
        assert!(store.is_empty());
        assert_eq!(store.remove(&nova.id).unwrap(), None);
    }
}

//! Flat-file player store.
//!
//! Layout: `<dir>/<uuid>.json` holds the record, `<uuid>.json.tmp` is the
//! in-flight rewrite and `<uuid>.lock` is the writer lock. Every write goes
//! temp file -> fsync -> rename while holding the lock, so readers see either
//! the old or the new record, and processes sharing the directory get a real
//! compare-and-swap.

use super::{version_of, CasOutcome, PlayerStore};
use crate::error::StoreError;
use crate::types::{PlayerId, PlayerRecord};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(50);

/// JSON-file backed [`PlayerStore`].
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// A lock file older than this is assumed to belong to a dead writer.
    stale_lock_after: Duration,
    /// How long to wait for a contended lock before reporting unavailability.
    lock_wait: Duration,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::unavailable(dir.display(), e))?;
        info!("📂 Player store opened at {}", dir.display());
        Ok(Self {
            dir,
            stale_lock_after: DEFAULT_STALE_LOCK,
            lock_wait: DEFAULT_LOCK_WAIT,
        })
    }

    pub fn with_stale_lock_after(mut self, stale_lock_after: Duration) -> Self {
        self.stale_lock_after = stale_lock_after;
        self
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &PlayerId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_path(&self, id: &PlayerId) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    fn read_record(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        read_record_file(&self.record_path(id), id)
    }

    fn write_record(&self, id: &PlayerId, record: &PlayerRecord) -> Result<(), StoreError> {
        let path = self.record_path(id);
        let temp_path = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(*id, e))?;

        let mut file = fs::File::create(&temp_path)
            .map_err(|e| StoreError::unavailable(id, format!("create {}: {e}", temp_path.display())))?;
        file.write_all(&json)
            .map_err(|e| StoreError::unavailable(id, format!("write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .map_err(|e| StoreError::unavailable(id, format!("sync {}: {e}", temp_path.display())))?;

        // Atomic rename
        fs::rename(&temp_path, &path)
            .map_err(|e| StoreError::unavailable(id, format!("rename to {}: {e}", path.display())))?;
        Ok(())
    }

    fn lock(&self, id: &PlayerId) -> Result<RecordLock, StoreError> {
        let path = self.lock_path(id);
        let deadline = Instant::now() + self.lock_wait;
        let mut broke_stale = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Owner pid is informational only.
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(RecordLock { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !broke_stale && self.is_stale(&path) {
                        warn!("🔓 Breaking stale lock {}", path.display());
                        broke_stale = true;
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::unavailable(id, "record is locked by another writer"));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(StoreError::unavailable(id, format!("lock {}: {e}", path.display()))),
            }
        }
    }

    fn is_stale(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= self.stale_lock_after)
    }
}

impl PlayerStore for FileStore {
    #[instrument(skip(self))]
    fn get(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        self.read_record(id)
    }

    #[instrument(skip(self, record), fields(version = record.version))]
    fn put(&self, id: &PlayerId, record: &PlayerRecord) -> Result<(), StoreError> {
        let _lock = self.lock(id)?;
        self.write_record(id, record)
    }

    #[instrument(skip(self, record), fields(version = record.version))]
    fn compare_and_swap(
        &self,
        id: &PlayerId,
        expected_version: u64,
        record: &PlayerRecord,
    ) -> Result<CasOutcome, StoreError> {
        let _lock = self.lock(id)?;
        let current = self.read_record(id)?;
        if version_of(current.as_ref()) != expected_version {
            debug!(
                "CAS conflict for {}: expected v{}, found v{}",
                id,
                expected_version,
                version_of(current.as_ref())
            );
            return Ok(CasOutcome::Conflict { current });
        }
        self.write_record(id, record)?;
        Ok(CasOutcome::Swapped)
    }

    #[instrument(skip(self))]
    fn remove(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        let _lock = self.lock(id)?;
        let path = self.record_path(id);
        // A corrupt record is still removable; reset is the way out of it.
        let current = match self.read_record(id) {
            Ok(current) => current,
            Err(StoreError::Corrupt(_, e)) => {
                warn!("🗑️ Discarding corrupt record {}: {}", path.display(), e);
                None
            }
            Err(e) => return Err(e),
        };
        match fs::remove_file(&path) {
            Ok(()) => info!("Removed player record {}", id),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::unavailable(id, format!("delete {}: {e}", path.display())))
            }
        }
        Ok(current)
    }

    #[instrument(skip(self))]
    fn all(&self) -> Result<Vec<(PlayerId, PlayerRecord)>, StoreError> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| StoreError::unavailable(self.dir.display(), e))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StoreError::unavailable(self.dir.display(), e))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<PlayerId>().ok())
            else {
                continue;
            };
            match read_record_file(&path, &id) {
                Ok(Some(record)) => records.push((id, record)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    fn flush(&self) -> Result<(), StoreError> {
        // Record files are fsynced on write; persist the renames too.
        #[cfg(unix)]
        fs::File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| StoreError::unavailable(self.dir.display(), e))?;
        Ok(())
    }
}

fn read_record_file(path: &Path, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(path.to_path_buf(), e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::unavailable(id, format!("read {}: {e}", path.display()))),
    }
}

/// Held for the duration of one write; removes the lock file on drop.
struct RecordLock {
    path: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

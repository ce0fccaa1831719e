//! Session store implementations and the position checkpoint.
//!
//! `PositionCheckpoint` is the single in-memory copy of the resume record.
//! Navigation and the section timer mutate its fields synchronously and then
//! flush the whole struct; flushes are serialized and each writes the state
//! as of the moment it acquired the write lock, so a late timer flush can
//! never roll back a navigation that happened before it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::model::PersistedPosition;
use crate::traits::{SessionStore, IN_PROGRESS_KEY};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store that keeps the record in memory; useful for embedding and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<PersistedPosition>>,
    writes: Mutex<u32>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(position: PersistedPosition) -> Self {
        Self {
            record: Mutex::new(Some(position)),
            writes: Mutex::new(0),
        }
    }

    /// Current record, without going through the async API.
    pub fn snapshot(&self) -> Option<PersistedPosition> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `save` calls so far.
    pub fn write_count(&self) -> u32 {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<PersistedPosition>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, position: &PersistedPosition) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(position.clone());
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Store backed by `<dir>/topik_in_progress.json`.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the record, so a crash mid-write leaves either the old or the new record.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{IN_PROGRESS_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<PersistedPosition>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, position: &PersistedPosition) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(position).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Position checkpoint
// ---------------------------------------------------------------------------

/// In-memory resume record with serialized, whole-record flushes.
pub struct PositionCheckpoint {
    current: Mutex<Option<PersistedPosition>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    store: Arc<dyn SessionStore>,
}

impl PositionCheckpoint {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            current: Mutex::new(None),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Replace the in-memory record without writing it.
    pub fn install(&self, position: PersistedPosition) {
        *self.lock() = Some(position);
    }

    pub fn snapshot(&self) -> Option<PersistedPosition> {
        self.lock().clone()
    }

    /// Update the navigation fields in memory.
    pub fn set_position(&self, section_index: usize, question_index: usize) {
        if let Some(pos) = self.lock().as_mut() {
            pos.current_section_index = section_index;
            pos.current_question_index = question_index;
        }
    }

    /// Point the record at the start of `section_index` with no time recorded,
    /// so a resume there starts the section's full budget.
    pub fn enter_section(&self, section_index: usize) {
        if let Some(pos) = self.lock().as_mut() {
            pos.current_section_index = section_index;
            pos.current_question_index = 0;
            pos.time_left_seconds = None;
        }
    }

    /// Update the time field in memory.
    pub fn set_time_left(&self, seconds: u64) {
        if let Some(pos) = self.lock().as_mut() {
            pos.time_left_seconds = Some(seconds);
        }
    }

    /// Write the current record through to the store.
    ///
    /// The save runs on its own task which owns the write lock, so a caller
    /// that is cancelled mid-flush (an aborted timer tick) still keeps later
    /// flushes and `clear` queued behind the write until it has landed.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let Some(snapshot) = self.snapshot() else {
            return Ok(());
        };
        let store = Arc::clone(&self.store);
        let snapshot = tokio::spawn(async move {
            let _guard = guard;
            let saved = store.save(&snapshot).await;
            saved.map(|()| snapshot)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        debug!(
            section = snapshot.current_section_index,
            question = snapshot.current_question_index,
            time_left = ?snapshot.time_left_seconds,
            "position checkpointed"
        );
        Ok(())
    }

    /// Drop the in-memory record and delete the stored one.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        *self.lock() = None;
        self.store.clear().await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PersistedPosition>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::SlowSessionStore;
    use crate::model::AttemptId;

    fn record(id: u64) -> PersistedPosition {
        PersistedPosition::fresh(AttemptId::new(id), "Mock TOPIK I")
    }

    #[tokio::test]
    async fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());

        let mut pos = record(42);
        pos.current_section_index = 1;
        pos.current_question_index = 3;
        pos.time_left_seconds = Some(45);
        store.save(&pos).await.unwrap();
        assert!(store.path().ends_with("topik_in_progress.json"));
        assert_eq!(store.load().await.unwrap(), Some(pos));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        // Clearing twice is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn timer_update_does_not_clobber_navigation() {
        let store = Arc::new(MemorySessionStore::new());
        let checkpoint = PositionCheckpoint::new(store.clone());
        checkpoint.install(record(1));

        checkpoint.set_time_left(120);
        checkpoint.set_position(0, 4);
        checkpoint.flush().await.unwrap();
        // A timer tick after navigation only touches the time field.
        checkpoint.set_time_left(115);
        checkpoint.flush().await.unwrap();

        let saved = store.snapshot().unwrap();
        assert_eq!(saved.current_question_index, 4);
        assert_eq!(saved.time_left_seconds, Some(115));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn flush_without_record_is_noop() {
        let store = Arc::new(MemorySessionStore::new());
        let checkpoint = PositionCheckpoint::new(store.clone());
        checkpoint.set_position(1, 1);
        checkpoint.flush().await.unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn clear_removes_stored_record() {
        let store = Arc::new(MemorySessionStore::with_record(record(9)));
        let checkpoint = PositionCheckpoint::new(store.clone());
        checkpoint.install(record(9));
        checkpoint.clear().await.unwrap();
        assert!(store.snapshot().is_none());
        assert!(checkpoint.snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_waits_for_write_of_cancelled_flush() {
        let store = Arc::new(SlowSessionStore::new(Duration::from_millis(50)));
        let checkpoint = Arc::new(PositionCheckpoint::new(store.clone()));
        checkpoint.install(record(3));

        let flushing = {
            let checkpoint = Arc::clone(&checkpoint);
            tokio::spawn(async move { checkpoint.flush().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        flushing.abort();

        checkpoint.clear().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.inner().snapshot().is_none());
        assert_eq!(store.inner().write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_flush_lands_after_cancelled_one() {
        let store = Arc::new(SlowSessionStore::new(Duration::from_millis(50)));
        let checkpoint = Arc::new(PositionCheckpoint::new(store.clone()));
        checkpoint.install(record(3));

        let flushing = {
            let checkpoint = Arc::clone(&checkpoint);
            tokio::spawn(async move { checkpoint.flush().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        flushing.abort();

        checkpoint.set_position(1, 5);
        checkpoint.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let saved = store.inner().snapshot().unwrap();
        assert_eq!(saved.current_section_index, 1);
        assert_eq!(saved.current_question_index, 5);
    }
}

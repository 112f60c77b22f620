use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::mpsc;

use super::models::Settings;
use super::snapshot::Snapshot;
use crate::events::{EventBus, StoreEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not replace state file: {0}")]
    Persist(Box<tempfile::PersistError>),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
}

impl From<tempfile::PersistError> for StoreError {
    fn from(e: tempfile::PersistError) -> Self {
        StoreError::Persist(Box::new(e))
    }
}

/// The agent's single source of truth for files, directories and settings.
///
/// Cheap to clone; every clone shares the same state. All reads and writes go through
/// the lock, so scheduler workers, watch tasks and command handlers can call in
/// concurrently.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    state: RwLock<Snapshot>,
    /// Serializes snapshot + rename so a slower save never overwrites a newer one.
    save_lock: Mutex<()>,
    events: EventBus,
}

impl Store {
    /// Create a store backed by `path` with default state. Nothing is read or written.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.as_ref().to_path_buf(),
                state: RwLock::new(Snapshot::default()),
                save_lock: Mutex::new(()),
                events: EventBus::default(),
            }),
        }
    }

    /// Create the parent directory if needed and load any existing state file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let store = Self::new(path);
        if let Some(parent) = store.path().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Shorthand for registering the single observer on this store's bus.
    pub fn register_observer(&self) -> mpsc::Receiver<StoreEvent> {
        self.inner.events.register_observer()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, event: StoreEvent) {
        self.inner.events.publish(event);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Replace in-memory state with the state file, if there is one.
    pub fn load(&self) -> Result<(), StoreError> {
        let data = match std::fs::read(self.path()) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path().display(), "No state file, starting fresh");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut snapshot: Snapshot = rmp_serde::from_slice(&data)?;
        snapshot.normalize();

        tracing::info!(
            path = %self.path().display(),
            files = snapshot.files.len(),
            directories = snapshot.directories.len(),
            "Loaded state file"
        );

        *self.write() = snapshot;
        Ok(())
    }

    /// Write the whole store to disk.
    ///
    /// The snapshot goes to a temporary file next to the state file which is then
    /// renamed over it, so a failed save leaves the previous snapshot intact.
    pub fn save(&self) -> Result<(), StoreError> {
        let _guard = self
            .inner
            .save_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let data = rmp_serde::to_vec_named(&*self.read())?;

        let dir = match self.path().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path())?;

        tracing::trace!(path = %self.path().display(), bytes = data.len(), "Saved state file");
        Ok(())
    }

    /// A copy of the full state, as it would be saved.
    pub fn snapshot(&self) -> Snapshot {
        self.read().clone()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn settings(&self) -> Settings {
        self.read().settings.clone()
    }

    /// Apply an explicit configuration change.
    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        update(&mut self.write().settings);
    }
}

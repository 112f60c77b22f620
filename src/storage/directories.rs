use std::path::Path;

use chrono::Utc;

use super::models::DirectoryRecord;
use super::store::Store;
use crate::events::StoreEvent;

impl Store {
    // ========================================================================
    // Directory operations
    // ========================================================================

    pub fn get_directory(&self, path: &Path) -> Option<DirectoryRecord> {
        self.read().directories.get(path).cloned()
    }

    /// Insert or replace a directory record, stamping the update time.
    ///
    /// This only records the flag. Callers that change `watch` must reconcile the
    /// watch manager before saving.
    pub fn set_directory(&self, mut directory: DirectoryRecord) {
        directory.updated_at = Utc::now();
        let path = directory.path.clone();
        self.write().directories.insert(path.clone(), directory);

        self.publish(StoreEvent::DirectoryUpdate(path));
    }

    /// Remove a directory record. Returns whether it existed.
    pub fn delete_directory(&self, path: &Path) -> bool {
        let removed = self.write().directories.remove(path).is_some();
        if removed {
            self.publish(StoreEvent::DirectoryDelete(path.to_path_buf()));
        }
        removed
    }

    /// All directory records, ordered by path.
    pub fn directories(&self) -> Vec<DirectoryRecord> {
        self.read().directories.values().cloned().collect()
    }

    /// Directories flagged for watching.
    pub fn watched_directories(&self) -> Vec<DirectoryRecord> {
        self.read()
            .directories
            .values()
            .filter(|dir| dir.watch)
            .cloned()
            .collect()
    }
}

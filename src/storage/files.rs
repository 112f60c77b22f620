use chrono::Utc;

use super::models::{FileRecord, FileStatus};
use super::store::Store;
use crate::events::StoreEvent;

impl Store {
    // ========================================================================
    // File operations
    // ========================================================================

    pub fn get_file(&self, signature: &str) -> Option<FileRecord> {
        self.read().files.get(signature).cloned()
    }

    /// Insert or supersede the record for `file.signature`, stamping the update time.
    pub fn set_file(&self, mut file: FileRecord) {
        debug_assert!(!file.signature.is_empty(), "file signature must not be empty");

        file.updated_at = Utc::now();
        let signature = file.signature.clone();
        self.write().files.insert(signature.clone(), file);

        self.publish(StoreEvent::FileUpdate(signature));
    }

    /// Store the result of an upload attempt that last saw the record as `claimed`.
    ///
    /// A retry requested while the attempt was running wins: the record keeps
    /// `retrying` so the queued retry still forces a fresh upload. Returns whether it did.
    pub fn settle_file(&self, mut file: FileRecord, claimed: FileStatus) -> bool {
        file.updated_at = Utc::now();
        let signature = file.signature.clone();

        let retry_requested = {
            let mut state = self.write();
            let retry_requested = claimed != FileStatus::Retrying
                && state
                    .files
                    .get(&signature)
                    .is_some_and(|stored| stored.status == FileStatus::Retrying);
            if retry_requested {
                file.status = FileStatus::Retrying;
            }
            state.files.insert(signature.clone(), file);
            retry_requested
        };

        self.publish(StoreEvent::FileUpdate(signature));
        retry_requested
    }

    /// All file records, ordered by signature.
    pub fn files(&self) -> Vec<FileRecord> {
        self.read().files.values().cloned().collect()
    }
}

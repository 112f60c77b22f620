use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::models::{DirectoryRecord, FileRecord, FileStatus, Settings};

/// Everything the agent persists, written as one MessagePack document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// signature -> file
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    /// absolute path -> directory
    #[serde(default)]
    pub directories: BTreeMap<PathBuf, DirectoryRecord>,
    #[serde(default)]
    pub settings: Settings,
}

impl Snapshot {
    /// Repair a freshly decoded snapshot.
    ///
    /// Files are re-keyed by the signature stored inside each record, records without a
    /// signature are dropped, and uploads interrupted by a shutdown go back to `pending`.
    pub(crate) fn normalize(&mut self) {
        let files = std::mem::take(&mut self.files);
        self.files = files
            .into_values()
            .filter(|file| !file.signature.is_empty())
            .map(|mut file| {
                if file.status == FileStatus::Uploading {
                    file.status = FileStatus::Pending;
                }
                (file.signature.clone(), file)
            })
            .collect();

        let directories = std::mem::take(&mut self.directories);
        self.directories = directories
            .into_values()
            .map(|dir| (dir.path.clone(), dir))
            .collect();
    }
}

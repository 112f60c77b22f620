use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{CommandOutput, ControlError, ControlPlane};
use crate::storage::models::extension_of;
use crate::storage::{DirectoryRecord, Store};

/// One entry of a local directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalEntry {
    pub full_path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub is_media: bool,
    /// Only meaningful for directories the store knows about.
    pub watch: bool,
    pub recursive: bool,
    pub size: u64,
    /// Media files among the immediate children (directories only).
    pub media_contained: usize,
    /// Subdirectories among the immediate children (directories only).
    pub directories_contained: usize,
}

fn absolute(path: &Path) -> Result<PathBuf, ControlError> {
    std::path::absolute(path).map_err(|source| ControlError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ControlPlane {
    pub(super) async fn get_directory_contents(
        &self,
        path: PathBuf,
    ) -> Result<CommandOutput, ControlError> {
        let path = absolute(&path)?;
        let store = self.store.clone();
        let listed = path.clone();

        let entries = tokio::task::spawn_blocking(move || list_directory(&store, &listed))
            .await
            .map_err(|source| ControlError::Listing { path, source })??;

        Ok(CommandOutput::Entries(entries))
    }

    pub(super) async fn retry_upload(&self, signature: &str) -> Result<CommandOutput, ControlError> {
        self.discoverer.retry(signature).await?;
        Ok(CommandOutput::Message("Retrying upload.".to_string()))
    }

    pub(super) async fn upload_file_or_directory(
        &self,
        path: &Path,
    ) -> Result<CommandOutput, ControlError> {
        let path = absolute(path)?;
        let queued = self.discoverer.queue_path(&path).await?;
        Ok(CommandOutput::Message(format!("Queued {queued} file(s) for upload.")))
    }

    pub(super) async fn watch_and_upload_directory(
        &self,
        path: &Path,
    ) -> Result<CommandOutput, ControlError> {
        let path = absolute(path)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|source| ControlError::Io {
                path: path.clone(),
                source,
            })?;
        if !meta.is_dir() {
            return Err(ControlError::NotADirectory);
        }

        let mut dir = self
            .store
            .get_directory(&path)
            .unwrap_or_else(|| DirectoryRecord::new(&path));
        dir.watch = true;
        dir.recursive = false;
        dir.missing_on_filesystem = false;
        self.apply_directory(dir).await?;

        let queued = self.discoverer.queue_directory(&path, false).await?;
        Ok(CommandOutput::Message(format!(
            "Watching directory; queued {queued} file(s) for upload."
        )))
    }

    pub(super) async fn unwatch_directory(
        &self,
        path: &Path,
    ) -> Result<CommandOutput, ControlError> {
        let path = absolute(path)?;
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);

        let mut dir = self
            .store
            .get_directory(&path)
            .unwrap_or_else(|| DirectoryRecord::new(&path));
        dir.watch = false;
        dir.recursive = false;
        dir.missing_on_filesystem = !is_dir;
        self.apply_directory(dir).await?;

        Ok(CommandOutput::Message("Stopped watching directory.".to_string()))
    }

    pub(super) async fn forget_directory(
        &self,
        path: &Path,
    ) -> Result<CommandOutput, ControlError> {
        let path = absolute(path)?;
        if !self.store.delete_directory(&path) {
            return Err(ControlError::DirectoryNotFound);
        }
        self.watches.reconcile().await;
        self.store.save()?;

        Ok(CommandOutput::Message("Forgot directory.".to_string()))
    }

    /// Record a directory change, bring the watches in line with it, then persist.
    async fn apply_directory(&self, dir: DirectoryRecord) -> Result<(), ControlError> {
        self.store.set_directory(dir);
        self.watches.reconcile().await;
        self.store.save()?;
        Ok(())
    }
}

fn list_directory(store: &Store, path: &Path) -> Result<Vec<LocalEntry>, ControlError> {
    let io_error = |source| ControlError::Io {
        path: path.to_path_buf(),
        source,
    };
    let settings = store.settings();

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let full_path = entry.path();
        // Follow symlinks; dangling ones are skipped.
        let Ok(meta) = std::fs::metadata(&full_path) else {
            continue;
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let mut local = LocalEntry {
            is_dir: meta.is_dir(),
            is_media: !meta.is_dir() && settings.is_media(&extension_of(&full_path)),
            watch: false,
            recursive: false,
            size: meta.len(),
            media_contained: 0,
            directories_contained: 0,
            name,
            full_path,
        };

        if local.is_dir {
            if let Some(known) = store.get_directory(&local.full_path) {
                local.watch = known.watch;
                local.recursive = known.recursive;
            }
            if let Ok(children) = std::fs::read_dir(&local.full_path) {
                for child in children.flatten() {
                    match child.file_type() {
                        Ok(kind) if kind.is_dir() => local.directories_contained += 1,
                        Ok(_) if settings.is_media(&extension_of(&child.path())) => {
                            local.media_contained += 1
                        }
                        _ => {}
                    }
                }
            }
        }

        entries.push(local);
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

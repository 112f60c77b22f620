//! Discovery events and the direct (non-watch) ways of producing them.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::signer::{self, SignError};
use crate::storage::{FileRecord, FileStatus, Store};

/// A file found on disk, ready for the upload scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub path: PathBuf,
    pub signature: String,
}

pub type DiscoverySender = mpsc::UnboundedSender<Discovery>;
pub type DiscoveryReceiver = mpsc::UnboundedReceiver<Discovery>;

/// Producer halves of the scheduler's two inputs.
#[derive(Debug, Clone)]
pub struct DiscoveryQueues {
    pub watch: DiscoverySender,
    pub direct: DiscoverySender,
}

/// Consumer halves, handed to [`crate::scheduler::Scheduler::run`].
#[derive(Debug)]
pub struct DiscoveryInputs {
    pub watch: DiscoveryReceiver,
    pub direct: DiscoveryReceiver,
}

pub fn discovery_channels() -> (DiscoveryQueues, DiscoveryInputs) {
    let (watch_tx, watch_rx) = mpsc::unbounded_channel();
    let (direct_tx, direct_rx) = mpsc::unbounded_channel();
    (
        DiscoveryQueues {
            watch: watch_tx,
            direct: direct_tx,
        },
        DiscoveryInputs {
            watch: watch_rx,
            direct: direct_rx,
        },
    )
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Could not read path {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Expected a file but found a directory: {0}")]
    IsADirectory(PathBuf),
    #[error("Could not find file to retry in local library.")]
    UnknownSignature(String),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("Upload queue is closed")]
    QueueClosed,
}

/// Signs files and feeds them into the scheduler's direct input.
#[derive(Clone)]
pub struct Discoverer {
    direct: DiscoverySender,
    store: Store,
}

impl Discoverer {
    pub fn new(store: Store, direct: DiscoverySender) -> Self {
        Self { direct, store }
    }

    /// Queue a single file, or every file below a directory. Returns the number queued.
    pub async fn queue_path(&self, path: &Path) -> Result<usize, DiscoveryError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| DiscoveryError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        if meta.is_dir() {
            self.queue_directory(path, true).await
        } else {
            self.queue_file(path).await.map(|()| 1)
        }
    }

    pub async fn queue_file(&self, path: &Path) -> Result<(), DiscoveryError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| DiscoveryError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        if meta.is_dir() {
            return Err(DiscoveryError::IsADirectory(path.to_path_buf()));
        }

        let signature = signer::sign_async(path.to_path_buf()).await?;
        self.send(path.to_path_buf(), signature)
    }

    /// Walk `path` and queue every regular file found. Files that can't be read are
    /// logged and skipped.
    pub async fn queue_directory(
        &self,
        path: &Path,
        recursive: bool,
    ) -> Result<usize, DiscoveryError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| DiscoveryError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        if !meta.is_dir() {
            return Err(DiscoveryError::NotADirectory(path.to_path_buf()));
        }

        let root = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk_files(&root, recursive))
            .await
            .unwrap_or_default();

        tracing::info!(path = %path.display(), files = files.len(), recursive, "Walked directory");

        let mut queued = 0;
        for file in files {
            match signer::sign_async(file.clone()).await {
                Ok(signature) => {
                    self.send(file, signature)?;
                    queued += 1;
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable file"),
            }
        }
        Ok(queued)
    }

    /// Mark the file recorded under `signature` as `retrying` and queue it again.
    pub async fn retry(&self, signature: &str) -> Result<(), DiscoveryError> {
        let mut file = self
            .store
            .get_file(signature)
            .ok_or_else(|| DiscoveryError::UnknownSignature(signature.to_string()))?;

        let current = match signer::sign_async(file.path.clone()).await {
            Ok(current) => current,
            Err(e) => {
                file.missing_on_filesystem = true;
                self.store.set_file(file);
                return Err(e.into());
            }
        };

        if current != signature {
            // The file changed on disk; its new content is a different file.
            tracing::info!(path = %file.path.display(), "Content changed since last attempt");
            return self.send(file.path, current);
        }

        tracing::info!(path = %file.path.display(), signature, "Retrying upload");
        file.status = FileStatus::Retrying;
        file.missing_on_filesystem = false;
        let path = file.path.clone();
        self.store.set_file(file);
        self.send(path, current)
    }

    /// Queue the contents of every directory flagged for watching.
    pub async fn queue_watched_directories(&self) -> usize {
        let mut queued = 0;
        for dir in self.store.watched_directories() {
            match self.queue_directory(&dir.path, dir.recursive).await {
                Ok(n) => queued += n,
                Err(e) => tracing::warn!(path = %dir.path.display(), error = %e, "Could not queue watched directory"),
            }
        }
        queued
    }

    fn send(&self, path: PathBuf, signature: String) -> Result<(), DiscoveryError> {
        if self.store.get_file(&signature).is_none() {
            self.store.set_file(FileRecord::discovered(&signature, &path));
        }
        self.direct
            .send(Discovery { path, signature })
            .map_err(|_| DiscoveryError::QueueClosed)
    }
}

fn walk_files(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

//! Directory watches.
//!
//! The [`WatchManager`] keeps exactly one running watch per directory record with
//! `watch` set. Every change to those records is followed by [`WatchManager::reconcile`],
//! which tears down every running watch and starts fresh ones from the store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::discovery::{Discovery, DiscoverySender};
use crate::signer;
use crate::storage::Store;

/// Events for the same path arriving within this window are handled once.
const SETTLE_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Could not watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A running watch on one directory.
pub struct WatchHandle {
    path: PathBuf,
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Start watching `path`, sending a discovery for every file created or modified
    /// below it. Must be called from within a tokio runtime.
    pub fn start(
        path: PathBuf,
        recursive: bool,
        discoveries: DiscoverySender,
    ) -> Result<Self, WatchError> {
        let notify_error = |source| WatchError::Notify {
            path: path.clone(),
            source,
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = event_tx.send(res);
        })
        .map_err(notify_error)?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&path, mode).map_err(notify_error)?;

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let root = path.clone();

        let task = tokio::spawn(async move {
            // Dropping the watcher ends the notifications.
            let _watcher = watcher;
            let mut pending: HashSet<PathBuf> = HashSet::new();

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    received = event_rx.recv() => match received {
                        Some(res) => collect_paths(&mut pending, res),
                        None => break,
                    },
                }

                let settle = tokio::time::sleep(SETTLE_WINDOW);
                tokio::pin!(settle);
                loop {
                    tokio::select! {
                        _ = &mut settle => break,
                        received = event_rx.recv() => match received {
                            Some(res) => collect_paths(&mut pending, res),
                            None => break,
                        },
                    }
                }

                for changed in pending.drain() {
                    discover(changed, &discoveries).await;
                }
            }

            tracing::debug!(path = %root.display(), "Watch stopped");
        });

        Ok(Self {
            path,
            stop: stop_tx,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the watch to stop. Never blocks; repeated calls are harmless.
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn collect_paths(pending: &mut HashSet<PathBuf>, res: notify::Result<notify::Event>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Watch error");
            return;
        }
    };

    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        pending.extend(event.paths);
    }
}

async fn discover(path: PathBuf, discoveries: &DiscoverySender) {
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return,
    }

    match signer::sign_async(path.clone()).await {
        Ok(signature) => {
            tracing::debug!(path = %path.display(), "Watched file changed");
            if discoveries.send(Discovery { path, signature }).is_err() {
                tracing::debug!("Upload scheduler is gone; dropping discovery");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not sign watched file"),
    }
}

pub struct WatchManager {
    discoveries: DiscoverySender,
    handles: Mutex<HashMap<PathBuf, WatchHandle>>,
    store: Store,
}

impl WatchManager {
    pub fn new(store: Store, discoveries: DiscoverySender) -> Self {
        Self {
            discoveries,
            handles: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Make the running watches match the store's watch-enabled directories.
    ///
    /// Directories that can't be watched are logged and left without a watch; their
    /// records are not changed.
    pub async fn reconcile(&self) {
        let mut handles = self.handles.lock().await;

        for (_, handle) in handles.drain() {
            handle.stop();
        }

        for dir in self.store.watched_directories() {
            match WatchHandle::start(dir.path.clone(), dir.recursive, self.discoveries.clone()) {
                Ok(handle) => {
                    tracing::info!(path = %dir.path.display(), recursive = dir.recursive, "Watching directory");
                    handles.insert(dir.path, handle);
                }
                Err(e) => tracing::warn!(error = %e, "Could not start watch"),
            }
        }
    }

    /// Directories with a running watch, sorted.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.handles.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn stop_all(&self) {
        let mut handles = self.handles.lock().await;
        for (path, handle) in handles.drain() {
            tracing::debug!(path = %path.display(), "Stopping watch");
            handle.stop();
        }
    }
}

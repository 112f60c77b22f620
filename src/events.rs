//! Change notifications published by the state store.
//!
//! There is a single observer slot. Publishing never blocks: events are pushed into a
//! bounded queue with `try_send` and dropped when the observer falls behind. An event
//! carries only the identity of what changed, so observers re-read the store.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

pub const DEFAULT_OBSERVER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StoreEvent {
    FileUpdate(String),
    DirectoryUpdate(PathBuf),
    DirectoryDelete(PathBuf),
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::FileUpdate(_) => "fileUpdate",
            StoreEvent::DirectoryUpdate(_) => "directoryUpdate",
            StoreEvent::DirectoryDelete(_) => "directoryDelete",
        }
    }

    /// The identity string carried by the event.
    pub fn identity(&self) -> String {
        match self {
            StoreEvent::FileUpdate(signature) => signature.clone(),
            StoreEvent::DirectoryUpdate(path) | StoreEvent::DirectoryDelete(path) => {
                path.to_string_lossy().into_owned()
            }
        }
    }
}

pub struct EventBus {
    capacity: usize,
    observer: Mutex<Option<mpsc::Sender<StoreEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            observer: Mutex::new(None),
        }
    }

    /// Register the observer, replacing (and disconnecting) any previous one.
    pub fn register_observer(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let previous = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if previous.is_some() {
            tracing::info!("Replaced state observer");
        } else {
            tracing::info!("Registered state observer");
        }
        rx
    }

    pub fn has_observer(&self) -> bool {
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn publish(&self, event: StoreEvent) {
        let mut slot = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = slot.as_ref() else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!(event = event.name(), "Observer is behind, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Observer went away");
                *slot = None;
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_CAPACITY)
    }
}

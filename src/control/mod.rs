//! Control plane: typed commands from the single registered controller.
//!
//! The controller submits [`Request`]s over a channel. Each request is handled on its
//! own task and answered exactly once through its reply channel. When the controller
//! hangs up, the serve loop waits for the handlers still running before it returns.

mod handlers;

pub use handlers::LocalEntry;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::discovery::{Discoverer, DiscoveryError};
use crate::storage::{DirectoryRecord, FileRecord, Settings, Store, StoreError};
use crate::watch::WatchManager;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Unable to handle request type: {0}")]
    UnknownCommand(String),
    #[error("A controller is already registered")]
    ControllerRegistered,
    #[error("Could not read path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Listing {path} did not finish: {source}")]
    Listing {
        path: PathBuf,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("Can only watch directories.")]
    NotADirectory,
    #[error("Directory not found.")]
    DirectoryNotFound,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Every command the control plane understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetDirectoryContents(PathBuf),
    RetryUpload(String),
    ListSettings,
    GetLocalFiles,
    UploadFileOrDirectory(PathBuf),
    WatchAndUploadDirectory(PathBuf),
    GetLocalDirectories,
    UnwatchDirectory(PathBuf),
    ForgetDirectory(PathBuf),
}

impl Command {
    /// Build a command from its wire name and string payload.
    pub fn parse(kind: &str, data: &str) -> Result<Self, ControlError> {
        let command = match kind {
            "getDirectoryContents" => Command::GetDirectoryContents(PathBuf::from(data)),
            "retryUpload" => Command::RetryUpload(data.to_string()),
            "listSettings" => Command::ListSettings,
            "getLocalFiles" => Command::GetLocalFiles,
            "uploadFileOrDirectory" => Command::UploadFileOrDirectory(PathBuf::from(data)),
            "watchAndUploadDirectory" => Command::WatchAndUploadDirectory(PathBuf::from(data)),
            "getLocalDirectories" => Command::GetLocalDirectories,
            "unwatchDirectory" => Command::UnwatchDirectory(PathBuf::from(data)),
            "forgetDirectory" => Command::ForgetDirectory(PathBuf::from(data)),
            other => return Err(ControlError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::GetDirectoryContents(_) => "getDirectoryContents",
            Command::RetryUpload(_) => "retryUpload",
            Command::ListSettings => "listSettings",
            Command::GetLocalFiles => "getLocalFiles",
            Command::UploadFileOrDirectory(_) => "uploadFileOrDirectory",
            Command::WatchAndUploadDirectory(_) => "watchAndUploadDirectory",
            Command::GetLocalDirectories => "getLocalDirectories",
            Command::UnwatchDirectory(_) => "unwatchDirectory",
            Command::ForgetDirectory(_) => "forgetDirectory",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Entries(Vec<LocalEntry>),
    Settings(Settings),
    Files(Vec<FileRecord>),
    Directories(Vec<DirectoryRecord>),
    Message(String),
}

pub struct Request {
    pub id: String,
    pub command: Command,
    pub reply: oneshot::Sender<Response>,
}

#[derive(Debug)]
pub struct Response {
    pub request_id: String,
    pub result: Result<CommandOutput, String>,
}

pub struct ControlPlane {
    controller: AtomicBool,
    discoverer: Discoverer,
    store: Store,
    watches: Arc<WatchManager>,
}

impl ControlPlane {
    pub fn new(store: Store, watches: Arc<WatchManager>, discoverer: Discoverer) -> Self {
        Self {
            controller: AtomicBool::new(false),
            discoverer,
            store,
            watches,
        }
    }

    /// Claim the controller slot. Returns the request sender and the serve task, which
    /// ends once every sender is dropped and in-flight requests are answered.
    pub fn register_controller(
        self: &Arc<Self>,
        capacity: usize,
    ) -> Result<(mpsc::Sender<Request>, JoinHandle<()>), ControlError> {
        if self.controller.swap(true, Ordering::SeqCst) {
            return Err(ControlError::ControllerRegistered);
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(Arc::clone(self).serve(rx));
        tracing::info!("Registered controller");
        Ok((tx, task))
    }

    async fn serve(self: Arc<Self>, mut requests: mpsc::Receiver<Request>) {
        let mut handlers = JoinSet::new();

        while let Some(request) = requests.recv().await {
            let Request { id, command, reply } = request;
            tracing::info!(request_id = %id, command = command.name(), "Handling request");

            let plane = Arc::clone(&self);
            handlers.spawn(async move {
                let result = plane.execute(command).await.map_err(|e| {
                    tracing::warn!(request_id = %id, error = %e, "Request failed");
                    e.to_string()
                });
                if reply
                    .send(Response {
                        request_id: id,
                        result,
                    })
                    .is_err()
                {
                    tracing::debug!("Controller stopped waiting for a response");
                }
            });

            while handlers.try_join_next().is_some() {}
        }

        tracing::info!("Waiting for controller request processing to complete");
        while handlers.join_next().await.is_some() {}
        self.controller.store(false, Ordering::SeqCst);
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutput, ControlError> {
        match command {
            Command::GetDirectoryContents(path) => self.get_directory_contents(path).await,
            Command::RetryUpload(signature) => self.retry_upload(&signature).await,
            Command::ListSettings => Ok(CommandOutput::Settings(self.store.settings())),
            Command::GetLocalFiles => Ok(CommandOutput::Files(self.store.files())),
            Command::UploadFileOrDirectory(path) => self.upload_file_or_directory(&path).await,
            Command::WatchAndUploadDirectory(path) => self.watch_and_upload_directory(&path).await,
            Command::GetLocalDirectories => {
                Ok(CommandOutput::Directories(self.store.directories()))
            }
            Command::UnwatchDirectory(path) => self.unwatch_directory(&path).await,
            Command::ForgetDirectory(path) => self.forget_directory(&path).await,
        }
    }
}

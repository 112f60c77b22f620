//! media-uploader - A local agent that keeps a media library in sync with a remote service
//!
//! This crate discovers media files on disk and uploads them with:
//! - Content signatures (SHA-256) as the identity of every file
//! - Remote deduplication before any bytes are sent
//! - Resumable transfers that pick up where a previous attempt stopped
//! - Directory watches that upload new and modified files as they appear
//! - A bounded scheduler so only a fixed number of uploads run at once
//! - A control plane (commands + change notifications) served over HTTP

pub mod api;
pub mod config;
pub mod control;
pub mod discovery;
pub mod events;
pub mod remote;
pub mod scheduler;
pub mod signer;
pub mod storage;
pub mod uploader;
pub mod watch;

use tokio::sync::mpsc;

use config::Config;
use storage::Store;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub store: Store,
    /// Request channel of the registered controller.
    pub commands: mpsc::Sender<control::Request>,
}

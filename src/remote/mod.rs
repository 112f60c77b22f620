mod http;
mod local;
pub mod transfer;

pub use http::HttpRemote;
pub use local::LocalRemote;
pub use transfer::{upload_resumable, TransferError, TransferReceipt, SIGNATURE_MISMATCH_STATUS};

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Remote call failed with status {0}")]
    Status(i64),
}

/// A remote media item whose content matches a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMatch {
    pub signature: String,
    pub media_id: String,
    pub deleted: bool,
}

/// A stored upload to register as media.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub signature: String,
    pub location: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedMedia {
    /// Set while the remote is still processing the upload.
    pub pending_media_id: Option<String>,
    /// Set once the media is fully materialized.
    pub media_id: Option<String>,
}

impl CreatedMedia {
    pub fn is_empty(&self) -> bool {
        self.pending_media_id.as_deref().unwrap_or_default().is_empty()
            && self.media_id.as_deref().unwrap_or_default().is_empty()
    }
}

/// Signature lookup and media creation.
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Entries for every remote media matching any of `signatures`. A signature with no
    /// remote media simply has no entry.
    async fn check_signatures(&self, signatures: &[String])
        -> Result<Vec<RemoteMatch>, RemoteError>;

    async fn create_media(&self, media: &NewMedia, force: bool)
        -> Result<CreatedMedia, RemoteError>;
}

/// Identity of a resumable upload on the transfer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    /// Provisional name: the signature followed by the original extension.
    pub filename: String,
    pub signature: String,
}

impl TransferTarget {
    pub fn new(signature: &str, extension: &str) -> Self {
        Self {
            filename: format!("{signature}{extension}"),
            signature: signature.to_string(),
        }
    }
}

/// Byte range `[start, end)` of a file of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` header value (inclusive end, as HTTP expects).
    pub fn content_range(&self) -> String {
        if self.is_empty() {
            format!("bytes */{}", self.total)
        } else {
            format!("bytes {}-{}/{}", self.start, self.end - 1, self.total)
        }
    }
}

/// The bytes of one write to the transfer endpoint.
pub struct TransferBody {
    /// Present when appending to a partial upload.
    pub range: Option<ByteRange>,
    pub length: u64,
    pub content_type: String,
    pub reader: Pin<Box<dyn AsyncRead + Send + Sync>>,
}

/// What the transfer endpoint answers to a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    #[serde(default, alias = "Status")]
    pub status: i64,
    #[serde(default, alias = "Location")]
    pub location: String,
    #[serde(default, alias = "Error")]
    pub error: String,
    #[serde(default, alias = "Signature")]
    pub signature: String,
}

/// Resumable upload endpoint.
#[async_trait]
pub trait TransferEndpoint: Send + Sync {
    /// Bytes of `target` the endpoint already holds.
    async fn probe(&self, target: &TransferTarget) -> Result<u64, RemoteError>;

    /// Discard any partial upload for `target`.
    async fn reset(&self, target: &TransferTarget) -> Result<(), RemoteError>;

    async fn write(
        &self,
        target: &TransferTarget,
        body: TransferBody,
    ) -> Result<TransferResponse, RemoteError>;
}

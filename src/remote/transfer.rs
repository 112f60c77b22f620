//! Resumable transfer protocol.
//!
//! A transfer asks the endpoint how much of the file it already holds and sends only
//! the rest, declaring the range when resuming. If the endpoint ends up with content
//! whose signature differs from the declared one, the partial upload is no longer
//! trustworthy and the next attempt must reset and start from byte 0.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{ByteRange, RemoteError, TransferBody, TransferEndpoint, TransferTarget};
use crate::storage::models::extension_of;

/// Status the endpoint answers with when its signature disagrees with ours.
pub const SIGNATURE_MISMATCH_STATUS: i64 = 519256;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Remote computed a different signature; the upload must be restarted")]
    SignatureMismatch,
    #[error("Remote holds {accepted} bytes but the file only has {size}")]
    OffsetBeyondEnd { accepted: u64, size: u64 },
    #[error("Transfer rejected ({status}): {message}")]
    Rejected { status: i64, message: String },
    #[error("Transfer response is missing the storage location")]
    MissingLocation,
}

impl TransferError {
    /// The partial upload can't be resumed; reset before the next attempt.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            TransferError::SignatureMismatch | TransferError::OffsetBeyondEnd { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub location: String,
    /// Signature as computed by the endpoint.
    pub signature: String,
    /// Offset the transfer resumed from (0 for a full send).
    pub resumed_from: u64,
    pub bytes_sent: u64,
}

/// Upload `path` to `endpoint`, resuming a previous partial upload unless `restart`.
pub async fn upload_resumable(
    endpoint: &dyn TransferEndpoint,
    path: &Path,
    signature: &str,
    restart: bool,
) -> Result<TransferReceipt, TransferError> {
    let read_error = |source| TransferError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(read_error)?;
    let size = file.metadata().await.map_err(read_error)?.len();
    let target = TransferTarget::new(signature, &extension_of(path));

    if restart {
        tracing::info!(path = %path.display(), "Restarting transfer");
        endpoint.reset(&target).await?;
    }

    let accepted = endpoint.probe(&target).await?;
    if accepted > size {
        return Err(TransferError::OffsetBeyondEnd { accepted, size });
    }

    let range = if accepted > 0 {
        tracing::info!(
            path = %path.display(),
            offset = accepted,
            size,
            "Resuming partial transfer"
        );
        file.seek(SeekFrom::Start(accepted))
            .await
            .map_err(read_error)?;
        Some(ByteRange {
            start: accepted,
            end: size,
            total: size,
        })
    } else {
        None
    };

    let length = size - accepted;
    let body = TransferBody {
        range,
        length,
        content_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
        reader: Box::pin(file.take(length)),
    };

    let response = endpoint.write(&target, body).await?;

    if response.status == SIGNATURE_MISMATCH_STATUS {
        tracing::warn!(path = %path.display(), "Remote computed a different signature");
        return Err(TransferError::SignatureMismatch);
    }

    if !response.error.is_empty() {
        return Err(TransferError::Rejected {
            status: response.status,
            message: response.error,
        });
    }

    if response.location.is_empty() {
        return Err(TransferError::MissingLocation);
    }

    if !response.signature.is_empty() && response.signature != signature {
        tracing::warn!(
            path = %path.display(),
            remote = %response.signature,
            "Stored content has a different signature"
        );
        return Err(TransferError::SignatureMismatch);
    }

    tracing::debug!(
        path = %path.display(),
        location = %response.location,
        bytes = length,
        "Transfer complete"
    );

    Ok(TransferReceipt {
        location: response.location,
        signature: response.signature,
        resumed_from: accepted,
        bytes_sent: length,
    })
}

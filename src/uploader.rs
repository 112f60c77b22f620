//! Per-file upload state machine.
//!
//! Each discovery runs through classification, the skip rules, the remote signature
//! lookup, the resumable transfer and media creation. Whatever happens, the resulting
//! record is written to the store and the store is saved before the discovery counts
//! as processed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use crate::discovery::Discovery;
use crate::remote::{
    upload_resumable, MediaApi, NewMedia, RemoteMatch, TransferEndpoint, TransferError,
    TransferReceipt,
};
use crate::storage::{FileRecord, FileStatus, Store, StoreError};

/// How one discovery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// No signature; nothing was recorded.
    Malformed,
    /// The same content is already being processed by another worker.
    InFlight,
    RejectedFormat,
    AlreadyUploaded,
    /// The remote already had a live copy; nothing was transferred.
    Deduplicated,
    /// The remote copy was deleted remotely and the upload wasn't forced.
    RemoteDeleted,
    Uploaded,
    Errored,
}

/// What the remote knows about a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Absent,
    Present(String),
    Deleted(String),
}

/// Resolve lookup results for `signature`.
///
/// Entries for other signatures or without a media id are ignored. The first live
/// entry wins; otherwise the first deleted one.
pub fn resolve_remote_state(signature: &str, matches: &[RemoteMatch]) -> RemoteState {
    let relevant = || {
        matches
            .iter()
            .filter(|m| m.signature == signature && !m.media_id.is_empty())
    };

    if let Some(live) = relevant().find(|m| !m.deleted) {
        return RemoteState::Present(live.media_id.clone());
    }
    match relevant().next() {
        Some(deleted) => RemoteState::Deleted(deleted.media_id.clone()),
        None => RemoteState::Absent,
    }
}

pub struct FileUploader {
    in_flight: Claims,
    media: Arc<dyn MediaApi>,
    store: Store,
    transfer: Arc<dyn TransferEndpoint>,
}

impl FileUploader {
    pub fn new(store: Store, media: Arc<dyn MediaApi>, transfer: Arc<dyn TransferEndpoint>) -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            media,
            store,
            transfer,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Drive one discovery to a terminal state.
    ///
    /// Only a failure to persist the store is returned as an error; every other
    /// failure ends up as an `errored` record. A retry requested while the content is
    /// in flight is picked up by the worker holding it once the current attempt ends.
    #[tracing::instrument(skip_all, fields(path = %discovery.path.display()))]
    pub async fn process(&self, discovery: Discovery) -> Result<UploadOutcome, StoreError> {
        let Discovery { mut path, signature } = discovery;
        if signature.is_empty() {
            tracing::warn!("Discovered file has no signature");
            return Ok(UploadOutcome::Malformed);
        }

        let Some(mut claim) = InFlightClaim::acquire(&self.in_flight, &signature, &path) else {
            tracing::debug!(%signature, "Same content is already being processed");
            return Ok(UploadOutcome::InFlight);
        };

        loop {
            let outcome = self.attempt(&path, &signature).await?;
            match claim.release_unless_retried(&self.store) {
                Some(next) => {
                    tracing::info!(%signature, "Retry requested during upload, processing again");
                    path = next;
                }
                None => return Ok(outcome),
            }
        }
    }

    async fn attempt(&self, path: &Path, signature: &str) -> Result<UploadOutcome, StoreError> {
        let existing = self.store.get_file(signature);
        let mut file = existing
            .clone()
            .unwrap_or_else(|| FileRecord::discovered(signature, path));
        let mut claimed = file.status;
        file.relocate(path);

        let mut force = false;
        if let Some(existing) = &existing {
            match existing.status {
                FileStatus::Retrying => force = true,
                FileStatus::Uploaded | FileStatus::UploadedDeleted if existing.has_remote_id() => {
                    tracing::debug!(status = %existing.status, "Already handled, skipping");
                    return Ok(UploadOutcome::AlreadyUploaded);
                }
                // Uploaded but the remote never handed back an id.
                FileStatus::Uploaded => force = true,
                _ => {}
            }
        }

        if !self.store.settings().is_uploadable(&file.extension) {
            tracing::info!(extension = %file.extension, "Unrecognized or disabled format");
            file.status = FileStatus::RejectedFormat;
            return self.finish(file, claimed, UploadOutcome::RejectedFormat);
        }

        file.status = FileStatus::Uploading;
        claimed = FileStatus::Uploading;
        self.store.set_file(file.clone());

        let matches = match self.media.check_signatures(&[signature.to_string()]).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!(error = %e, "Signature lookup failed");
                file.status = FileStatus::Errored;
                return self.finish(file, claimed, UploadOutcome::Errored);
            }
        };

        match resolve_remote_state(signature, &matches) {
            RemoteState::Present(media_id) => {
                tracing::info!(%media_id, "Already on the remote");
                file.media_id = Some(media_id);
                file.status = FileStatus::Uploaded;
                file.uploaded_at.get_or_insert_with(Utc::now);
                return self.finish(file, claimed, UploadOutcome::Deduplicated);
            }
            RemoteState::Deleted(media_id) if !force => {
                tracing::info!(%media_id, "Deleted on the remote, not uploading again");
                file.media_id = Some(media_id);
                file.status = FileStatus::UploadedDeleted;
                return self.finish(file, claimed, UploadOutcome::RemoteDeleted);
            }
            RemoteState::Deleted(_) | RemoteState::Absent => {}
        }

        let restart = force || file.restart_transfer;
        let receipt = match self.transfer(path, signature, restart).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(error = %e, "Transfer failed");
                file.restart_transfer = e.requires_restart();
                file.status = FileStatus::Errored;
                return self.finish(file, claimed, UploadOutcome::Errored);
            }
        };
        file.restart_transfer = false;

        let new_media = NewMedia {
            signature: signature.to_string(),
            location: receipt.location,
            local_path: path.to_path_buf(),
        };
        let created = match self.media.create_media(&new_media, force).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!(error = %e, "Could not create media");
                file.status = FileStatus::Errored;
                return self.finish(file, claimed, UploadOutcome::Errored);
            }
        };

        if created.is_empty() {
            tracing::error!("Remote returned neither a pending media id nor a media id");
            file.status = FileStatus::Errored;
            return self.finish(file, claimed, UploadOutcome::Errored);
        }

        tracing::info!(
            pending_media_id = ?created.pending_media_id,
            media_id = ?created.media_id,
            "Uploaded"
        );
        file.pending_media_id = created.pending_media_id;
        file.media_id = created.media_id;
        file.status = FileStatus::Uploaded;
        file.uploaded_at = Some(Utc::now());
        self.finish(file, claimed, UploadOutcome::Uploaded)
    }

    /// Resume where the endpoint left off, restarting once from byte 0 if the
    /// endpoint's copy turns out to be unusable.
    async fn transfer(
        &self,
        path: &Path,
        signature: &str,
        restart: bool,
    ) -> Result<TransferReceipt, TransferError> {
        match upload_resumable(self.transfer.as_ref(), path, signature, restart).await {
            Err(e) if e.requires_restart() && !restart => {
                tracing::warn!(error = %e, "Restarting transfer from the beginning");
                upload_resumable(self.transfer.as_ref(), path, signature, true).await
            }
            other => other,
        }
    }

    fn finish(
        &self,
        file: FileRecord,
        claimed: FileStatus,
        outcome: UploadOutcome,
    ) -> Result<UploadOutcome, StoreError> {
        if self.store.settle_file(file, claimed) {
            tracing::info!("Retry requested during upload, keeping it queued");
        }
        self.store.save()?;
        Ok(outcome)
    }
}

type Claims = Mutex<HashMap<String, Option<PathBuf>>>;

/// Marks a signature as being processed until released or dropped.
///
/// A discovery of the same signature arriving meanwhile is remembered so a retry can
/// be run by the holder instead of being lost.
struct InFlightClaim<'a> {
    claims: &'a Claims,
    signature: String,
    released: bool,
}

impl<'a> InFlightClaim<'a> {
    fn acquire(claims: &'a Claims, signature: &str, path: &Path) -> Option<Self> {
        let mut claims_guard = claims.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queued) = claims_guard.get_mut(signature) {
            *queued = Some(path.to_path_buf());
            return None;
        }
        claims_guard.insert(signature.to_string(), None);
        drop(claims_guard);

        Some(Self {
            claims,
            signature: signature.to_string(),
            released: false,
        })
    }

    /// Release the claim, unless a retry of this signature was queued behind it; then
    /// keep the claim and return the path to process next.
    fn release_unless_retried(&mut self, store: &Store) -> Option<PathBuf> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = claims.get_mut(&self.signature).and_then(Option::take);

        if let Some(path) = queued {
            let retrying = store
                .get_file(&self.signature)
                .is_some_and(|f| f.status == FileStatus::Retrying);
            if retrying {
                return Some(path);
            }
        }

        claims.remove(&self.signature);
        self.released = true;
        None
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.claims
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.signature);
        }
    }
}

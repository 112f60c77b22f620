use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::transfer::SIGNATURE_MISMATCH_STATUS;
use super::{
    CreatedMedia, MediaApi, NewMedia, RemoteError, RemoteMatch, TransferBody, TransferEndpoint,
    TransferResponse, TransferTarget,
};
use crate::signer;

const INDEX_FILE: &str = "media.json";

/// Directory-backed remote for development and testing.
///
/// Partial uploads accumulate under `partial/`, completed uploads move to `objects/`,
/// and registered media are listed in `media.json`.
pub struct LocalRemote {
    base_path: PathBuf,
    index_lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MediaIndex {
    media: Vec<MediaEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaEntry {
    id: String,
    signature: String,
    location: String,
    local_path: PathBuf,
    deleted: bool,
}

impl LocalRemote {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(base_path.join("partial"))?;
        std::fs::create_dir_all(base_path.join("objects"))?;
        Ok(Self {
            base_path,
            index_lock: Mutex::new(()),
        })
    }

    fn partial_path(&self, target: &TransferTarget) -> PathBuf {
        self.base_path.join("partial").join(&target.filename)
    }

    fn object_path(&self, target: &TransferTarget) -> PathBuf {
        self.base_path.join("objects").join(&target.filename)
    }

    async fn read_index(&self) -> Result<MediaIndex, RemoteError> {
        let path = self.base_path.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| RemoteError::InvalidResponse(format!("{INDEX_FILE}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MediaIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &MediaIndex) -> Result<(), RemoteError> {
        let data = serde_json::to_vec_pretty(index)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let base = self.base_path.clone();

        // Write-then-rename so a crash never leaves a truncated index.
        tokio::task::spawn_blocking(move || -> Result<(), RemoteError> {
            let mut tmp = NamedTempFile::new_in(&base)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(base.join(INDEX_FILE))
                .map_err(|e| RemoteError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| RemoteError::Io(std::io::Error::other(e)))?
    }

    /// Soft-delete a media item. Returns whether it existed.
    pub async fn mark_deleted(&self, media_id: &str) -> Result<bool, RemoteError> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        let mut found = false;
        for entry in index.media.iter_mut().filter(|m| m.id == media_id) {
            entry.deleted = true;
            found = true;
        }
        if found {
            self.write_index(&index).await?;
        }
        Ok(found)
    }

    async fn len_of(path: &Path) -> Result<u64, std::io::Error> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }
}

fn rejection(status: i64, message: String) -> TransferResponse {
    TransferResponse {
        status,
        error: message,
        ..Default::default()
    }
}

#[async_trait]
impl MediaApi for LocalRemote {
    async fn check_signatures(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RemoteMatch>, RemoteError> {
        let _guard = self.index_lock.lock().await;
        let index = self.read_index().await?;

        Ok(index
            .media
            .into_iter()
            .filter(|m| signatures.contains(&m.signature))
            .map(|m| RemoteMatch {
                signature: m.signature,
                media_id: m.id,
                deleted: m.deleted,
            })
            .collect())
    }

    async fn create_media(
        &self,
        media: &NewMedia,
        force: bool,
    ) -> Result<CreatedMedia, RemoteError> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;

        if !force {
            if let Some(existing) = index
                .media
                .iter()
                .find(|m| m.signature == media.signature && !m.deleted)
            {
                return Ok(CreatedMedia {
                    pending_media_id: None,
                    media_id: Some(existing.id.clone()),
                });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        index.media.push(MediaEntry {
            id: id.clone(),
            signature: media.signature.clone(),
            location: media.location.clone(),
            local_path: media.local_path.clone(),
            deleted: false,
        });
        self.write_index(&index).await?;

        Ok(CreatedMedia {
            pending_media_id: None,
            media_id: Some(id),
        })
    }
}

#[async_trait]
impl TransferEndpoint for LocalRemote {
    async fn probe(&self, target: &TransferTarget) -> Result<u64, RemoteError> {
        Ok(Self::len_of(&self.partial_path(target)).await?)
    }

    async fn reset(&self, target: &TransferTarget) -> Result<(), RemoteError> {
        match tokio::fs::remove_file(self.partial_path(target)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(
        &self,
        target: &TransferTarget,
        mut body: TransferBody,
    ) -> Result<TransferResponse, RemoteError> {
        let partial = self.partial_path(target);

        let (mut file, total) = match body.range {
            Some(range) => {
                let held = Self::len_of(&partial).await?;
                if held != range.start {
                    return Ok(rejection(
                        416,
                        format!("holding {held} bytes, cannot append at {}", range.start),
                    ));
                }
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&partial)
                    .await?;
                (file, range.total)
            }
            None => (tokio::fs::File::create(&partial).await?, body.length),
        };

        tokio::io::copy(&mut body.reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let held = Self::len_of(&partial).await?;
        if held != total {
            return Ok(rejection(
                400,
                format!("incomplete upload: holding {held} of {total} bytes"),
            ));
        }

        let computed = signer::sign_async(partial.clone())
            .await
            .map_err(|e| RemoteError::Provider(e.to_string()))?;

        if computed != target.signature {
            tokio::fs::remove_file(&partial).await?;
            return Ok(TransferResponse {
                status: SIGNATURE_MISMATCH_STATUS,
                error: "signature mismatch".to_string(),
                signature: computed,
                ..Default::default()
            });
        }

        let object = self.object_path(target);
        tokio::fs::rename(&partial, &object).await?;

        Ok(TransferResponse {
            status: 200,
            location: format!("file://{}", object.display()),
            error: String::new(),
            signature: computed,
        })
    }
}

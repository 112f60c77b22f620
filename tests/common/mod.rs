#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;

use media_uploader::discovery::Discovery;
use media_uploader::remote::{
    ByteRange, CreatedMedia, MediaApi, NewMedia, RemoteError, RemoteMatch, TransferBody,
    TransferEndpoint, TransferResponse, TransferTarget, SIGNATURE_MISMATCH_STATUS,
};
use media_uploader::signer;
use media_uploader::storage::Store;
use media_uploader::uploader::FileUploader;

/// One write as the endpoint received it.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub filename: String,
    pub range: Option<ByteRange>,
    pub length: u64,
    pub content_type: String,
    pub body: Bytes,
}

/// In-memory remote that records every call made against it.
#[derive(Default)]
pub struct RecordingRemote {
    /// Call log in order: "lookup", "probe", "reset", "write", "create".
    calls: Mutex<Vec<&'static str>>,
    media: Mutex<Vec<RemoteMatch>>,
    partials: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<Vec<RecordedWrite>>,
    next_id: AtomicUsize,

    pub fail_lookups: AtomicBool,
    /// Answer `create` with a pending id instead of a final id.
    pub pending_only: AtomicBool,
    /// Answer `create` with no ids at all.
    pub empty_create: AtomicBool,
    /// Number of upcoming writes to answer with a signature mismatch.
    pub mismatches: AtomicUsize,
    /// Omit the location from successful writes.
    pub drop_location: AtomicBool,
    pub write_delay_ms: AtomicUsize,

    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
}

impl RecordingRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_media(&self, signature: &str, media_id: &str, deleted: bool) {
        self.media.lock().unwrap().push(RemoteMatch {
            signature: signature.to_string(),
            media_id: media_id.to_string(),
            deleted,
        });
    }

    /// Pretend an earlier attempt left `bytes` on the endpoint.
    pub fn hold_partial(&self, filename: &str, bytes: &[u8]) {
        self.partials
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
    }

    pub fn partial(&self, filename: &str) -> Option<Vec<u8>> {
        self.partials.lock().unwrap().get(filename).cloned()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn peak_writes(&self) -> usize {
        self.peak_writes.load(Ordering::SeqCst)
    }

    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaApi for RecordingRemote {
    async fn check_signatures(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RemoteMatch>, RemoteError> {
        self.log("lookup");
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RemoteError::Status(500));
        }
        Ok(self
            .media
            .lock()
            .unwrap()
            .iter()
            .filter(|m| signatures.contains(&m.signature))
            .cloned()
            .collect())
    }

    async fn create_media(
        &self,
        media: &NewMedia,
        _force: bool,
    ) -> Result<CreatedMedia, RemoteError> {
        self.log("create");
        if self.empty_create.load(Ordering::SeqCst) {
            return Ok(CreatedMedia::default());
        }

        let id = format!("media-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        if self.pending_only.load(Ordering::SeqCst) {
            return Ok(CreatedMedia {
                pending_media_id: Some(id),
                media_id: None,
            });
        }

        self.add_media(&media.signature, &id, false);
        Ok(CreatedMedia {
            pending_media_id: None,
            media_id: Some(id),
        })
    }
}

#[async_trait]
impl TransferEndpoint for RecordingRemote {
    async fn probe(&self, target: &TransferTarget) -> Result<u64, RemoteError> {
        self.log("probe");
        Ok(self
            .partial(&target.filename)
            .map(|p| p.len() as u64)
            .unwrap_or(0))
    }

    async fn reset(&self, target: &TransferTarget) -> Result<(), RemoteError> {
        self.log("reset");
        self.partials.lock().unwrap().remove(&target.filename);
        Ok(())
    }

    async fn write(
        &self,
        target: &TransferTarget,
        mut body: TransferBody,
    ) -> Result<TransferResponse, RemoteError> {
        self.log("write");
        let now = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes.fetch_max(now, Ordering::SeqCst);

        let mut data = Vec::new();
        body.reader.read_to_end(&mut data).await?;

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        self.writes.lock().unwrap().push(RecordedWrite {
            filename: target.filename.clone(),
            range: body.range,
            length: body.length,
            content_type: body.content_type.clone(),
            body: Bytes::from(data.clone()),
        });
        self.active_writes.fetch_sub(1, Ordering::SeqCst);

        let mismatch = self
            .mismatches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if mismatch {
            // Keep the corrupt partial: only a reset clears it.
            self.partials
                .lock()
                .unwrap()
                .entry(target.filename.clone())
                .or_default()
                .extend_from_slice(&data);
            return Ok(TransferResponse {
                status: SIGNATURE_MISMATCH_STATUS,
                error: "signature mismatch".to_string(),
                signature: "0".repeat(64),
                ..Default::default()
            });
        }

        self.partials.lock().unwrap().remove(&target.filename);
        let location = if self.drop_location.load(Ordering::SeqCst) {
            String::new()
        } else {
            format!("mem://{}", target.filename)
        };

        Ok(TransferResponse {
            status: 200,
            location,
            error: String::new(),
            signature: target.signature.clone(),
        })
    }
}

/// Deterministic, non-repeating-looking content of `len` bytes.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn test_store(dir: &Path) -> Store {
    Store::open(dir.join("state").join("state_test.msgpack")).unwrap()
}

pub fn uploader(store: &Store, remote: &Arc<RecordingRemote>) -> FileUploader {
    FileUploader::new(store.clone(), remote.clone(), remote.clone())
}

pub fn discovery(path: &Path) -> Discovery {
    Discovery {
        path: path.to_path_buf(),
        signature: signer::sign(path).unwrap(),
    }
}

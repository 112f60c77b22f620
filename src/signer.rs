//! Content signatures: a streaming SHA-256 over the file bytes, hex encoded.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ring::digest::{Context, SHA256};
use thiserror::Error;

/// Bytes fed to the hasher per read.
pub const BLOCK_SIZE: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Compute the content signature of the file at `path`.
///
/// The file is streamed in [`BLOCK_SIZE`] blocks, so memory use does not grow with the
/// file. The result depends only on the bytes, never on the path or metadata.
pub fn sign(path: &Path) -> Result<String, SignError> {
    let read_error = |source| SignError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_error)?;
    let mut context = Context::new(&SHA256);
    let mut block = vec![0u8; BLOCK_SIZE];

    loop {
        let read = file.read(&mut block).map_err(read_error)?;
        if read == 0 {
            break;
        }
        context.update(&block[..read]);
    }

    Ok(hex::encode(context.finish()))
}

/// Sign on the blocking pool so hashing large files never stalls the runtime.
pub async fn sign_async(path: PathBuf) -> Result<String, SignError> {
    let for_error = path.clone();
    tokio::task::spawn_blocking(move || sign(&path))
        .await
        .unwrap_or_else(|e| {
            Err(SignError::Read {
                path: for_error,
                source: std::io::Error::other(e),
            })
        })
}

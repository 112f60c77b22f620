mod common;

use media_uploader::signer::{self, SignError, BLOCK_SIZE};
use ring::digest::{digest, SHA256};

use common::{patterned, write_file};

#[test]
fn test_sign_known_digest() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "hello.txt", b"hello world");

    assert_eq!(
        signer::sign(&path).unwrap(),
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
}

#[test]
fn test_sign_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "empty.jpg", b"");

    assert_eq!(
        signer::sign(&path).unwrap(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn test_sign_spans_multiple_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let content = patterned(BLOCK_SIZE * 2 + 17);
    let path = write_file(dir.path(), "big.mov", &content);

    let expected = hex::encode(digest(&SHA256, &content));
    assert_eq!(signer::sign(&path).unwrap(), expected);
}

#[test]
fn test_sign_depends_only_on_content() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a/IMG_0001.JPG", b"same bytes");
    let b = write_file(dir.path(), "b/renamed.png", b"same bytes");
    let c = write_file(dir.path(), "c.jpg", b"other bytes");

    let sig_a = signer::sign(&a).unwrap();
    assert_eq!(sig_a, signer::sign(&b).unwrap());
    assert_ne!(sig_a, signer::sign(&c).unwrap());
    assert_eq!(sig_a.len(), 64);
    assert!(sig_a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_sign_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.jpg");

    let err = signer::sign(&missing).unwrap_err();
    let SignError::Read { path, source } = err;
    assert_eq!(path, missing);
    assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
}

#[tokio::test]
async fn test_sign_async_matches_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "photo.jpg", &patterned(4096));

    let sync = signer::sign(&path).unwrap();
    let async_sig = signer::sign_async(path).await.unwrap();
    assert_eq!(sync, async_sig);
}

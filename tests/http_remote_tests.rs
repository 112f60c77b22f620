mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

use media_uploader::remote::{
    upload_resumable, HttpRemote, MediaApi, NewMedia, RemoteError, TransferEndpoint,
    TransferError, TransferTarget,
};
use media_uploader::signer;

use common::{patterned, write_file};

const TOKEN: &str = "secret-token";

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Seen {
    fn form(&self) -> HashMap<String, String> {
        let body = std::str::from_utf8(&self.body).unwrap();
        reqwest::Url::parse(&format!("http://form.invalid/?{body}"))
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.to_str().unwrap())
    }
}

#[derive(Clone)]
struct Canned {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: String,
}

/// Media API and transfer endpoint answering from canned replies keyed by
/// `"METHOD /path"`, recording every request it receives.
#[derive(Default)]
struct FakeServer {
    seen: Mutex<Vec<Seen>>,
    replies: Mutex<HashMap<String, Canned>>,
}

impl FakeServer {
    fn reply(&self, route: &str, status: StatusCode, headers: &[(&'static str, &str)], body: &str) {
        self.replies.lock().unwrap().insert(
            route.to_string(),
            Canned {
                status,
                headers: headers.iter().map(|(k, v)| (*k, v.to_string())).collect(),
                body: body.to_string(),
            },
        );
    }

    fn json(&self, route: &str, body: serde_json::Value) {
        self.reply(route, StatusCode::OK, &[], &body.to_string());
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn methods(&self) -> Vec<Method> {
        self.seen().into_iter().map(|s| s.method).collect()
    }
}

async fn handle(
    State(server): State<Arc<FakeServer>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = format!("{} {}", method, uri.path());
    server.seen.lock().unwrap().push(Seen {
        method,
        path: uri.path().to_string(),
        query,
        headers,
        body,
    });

    let canned = server.replies.lock().unwrap().get(&route).cloned();
    match canned {
        Some(canned) => {
            let mut headers = HeaderMap::new();
            for (name, value) in canned.headers {
                headers.insert(name, value.parse().unwrap());
            }
            (canned.status, headers, canned.body).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start(server: Arc<FakeServer>) -> HttpRemote {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(handle).with_state(server);
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let base = format!("http://{addr}");
    HttpRemote::new(&base, &format!("{base}/"), TOKEN).unwrap()
}

fn target() -> TransferTarget {
    TransferTarget::new("abc123", ".JPG")
}

fn assert_transfer_query(seen: &Seen) {
    assert_eq!(seen.path, "/ruler");
    assert_eq!(seen.query["access_token"], TOKEN);
    assert_eq!(seen.query["filename"], "abc123.JPG");
    assert_eq!(seen.query["signature"], "abc123");
}

#[tokio::test]
async fn test_check_signatures_posts_form() {
    let server = Arc::new(FakeServer::default());
    server.json(
        "POST /medias/check_signatures",
        serde_json::json!({
            "status": 20000,
            "signatures": {
                "def": { "media_id": "m-2", "deleted": true },
                "abc": { "media_id": "m-1", "deleted": false }
            }
        }),
    );
    let remote = start(server.clone()).await;

    let matches = remote
        .check_signatures(&["abc".to_string(), "def".to_string()])
        .await
        .unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].signature, "abc");
    assert_eq!(matches[0].media_id, "m-1");
    assert!(!matches[0].deleted);
    assert!(matches[1].deleted);

    let seen = server.seen();
    assert_eq!(seen[0].method, Method::POST);
    let form = seen[0].form();
    assert_eq!(form["signatures"], "abc,def");
    assert_eq!(form["access_token"], TOKEN);
}

#[tokio::test]
async fn test_api_failure_status_is_an_error() {
    let server = Arc::new(FakeServer::default());
    server.json(
        "POST /medias/check_signatures",
        serde_json::json!({ "status": 40100 }),
    );
    let remote = start(server).await;

    let err = remote
        .check_signatures(&["abc".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Status(40100)));
}

#[tokio::test]
async fn test_create_media_sends_force_and_reads_ids() {
    let server = Arc::new(FakeServer::default());
    server.json(
        "POST /medias/create",
        serde_json::json!({
            "status": 200,
            "pending_media": { "id": "" },
            "media": { "id": "m-9" }
        }),
    );
    let remote = start(server.clone()).await;

    let created = remote
        .create_media(
            &NewMedia {
                signature: "abc123".to_string(),
                location: "https://cdn.invalid/abc123.JPG".to_string(),
                local_path: "/photos/IMG_0001.JPG".into(),
            },
            true,
        )
        .await
        .unwrap();

    assert_eq!(created.pending_media_id, None);
    assert_eq!(created.media_id.as_deref(), Some("m-9"));

    let form = server.seen()[0].form();
    assert_eq!(form["signature"], "abc123");
    assert_eq!(form["url"], "https://cdn.invalid/abc123.JPG");
    assert_eq!(form["local_path"], "/photos/IMG_0001.JPG");
    assert_eq!(form["force"], "true");
}

#[tokio::test]
async fn test_size_header_reports_partial() {
    let server = Arc::new(FakeServer::default());
    server.reply("HEAD /ruler", StatusCode::OK, &[("x-ruler-size", "1234")], "");
    let remote = start(server.clone()).await;

    assert_eq!(remote.probe(&target()).await.unwrap(), 1234);

    let seen = server.seen();
    assert_eq!(seen[0].method, Method::HEAD);
    assert_transfer_query(&seen[0]);
}

#[tokio::test]
async fn test_missing_partial_reads_as_zero() {
    let server = Arc::new(FakeServer::default());
    let remote = start(server).await;

    // Nothing canned: the endpoint answers 404.
    assert_eq!(remote.probe(&target()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_error_header_aborts_size_check() {
    let server = Arc::new(FakeServer::default());
    server.reply(
        "HEAD /ruler",
        StatusCode::OK,
        &[("x-ruler-error", "bucket unavailable"), ("x-ruler-size", "10")],
        "",
    );
    let remote = start(server).await;

    let err = remote.probe(&target()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Provider(ref m) if m.contains("bucket unavailable")));
}

#[tokio::test]
async fn test_reset_sends_delete() {
    let server = Arc::new(FakeServer::default());
    server.reply("DELETE /ruler", StatusCode::NO_CONTENT, &[], "");
    let remote = start(server.clone()).await;

    remote.reset(&target()).await.unwrap();

    let seen = server.seen();
    assert_eq!(seen[0].method, Method::DELETE);
    assert_transfer_query(&seen[0]);

    // No partial to discard is fine; a server failure is not.
    server.reply("DELETE /ruler", StatusCode::NOT_FOUND, &[], "");
    remote.reset(&target()).await.unwrap();
    server.reply("DELETE /ruler", StatusCode::INTERNAL_SERVER_ERROR, &[], "");
    assert!(matches!(
        remote.reset(&target()).await.unwrap_err(),
        RemoteError::Status(500)
    ));
}

#[tokio::test]
async fn test_resumed_upload_sends_range() {
    let dir = tempfile::tempdir().unwrap();
    let content = patterned(4_000);
    let path = write_file(dir.path(), "IMG_0001.jpg", &content);
    let signature = signer::sign(&path).unwrap();

    let server = Arc::new(FakeServer::default());
    server.reply("HEAD /ruler", StatusCode::OK, &[("x-ruler-size", "1000")], "");
    server.json(
        "PUT /ruler",
        serde_json::json!({
            "status": 200,
            "location": "https://cdn.invalid/object",
            "signature": signature,
        }),
    );
    let remote = start(server.clone()).await;

    let receipt = upload_resumable(&remote, &path, &signature, false)
        .await
        .unwrap();
    assert_eq!(receipt.location, "https://cdn.invalid/object");
    assert_eq!(receipt.resumed_from, 1_000);

    assert_eq!(server.methods(), vec![Method::HEAD, Method::PUT]);
    let put = &server.seen()[1];
    assert_eq!(put.header("content-range"), Some("bytes 1000-3999/4000"));
    assert_eq!(put.header("content-length"), Some("3000"));
    assert_eq!(put.header("content-type"), Some("image/jpeg"));
    assert_eq!(put.query["filename"], format!("{signature}.JPG"));
    assert_eq!(&put.body[..], &content[1_000..]);
}

#[tokio::test]
async fn test_full_upload_has_no_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clip.mov", &patterned(500));
    let signature = signer::sign(&path).unwrap();

    let server = Arc::new(FakeServer::default());
    server.json(
        "PUT /ruler",
        serde_json::json!({ "Status": 20000, "Location": "https://cdn.invalid/clip" }),
    );
    let remote = start(server.clone()).await;

    upload_resumable(&remote, &path, &signature, false)
        .await
        .unwrap();

    let put = &server.seen()[1];
    assert_eq!(put.header("content-range"), None);
    assert_eq!(put.header("content-length"), Some("500"));
}

#[tokio::test]
async fn test_mismatch_status_from_body() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.png", &patterned(800));
    let signature = signer::sign(&path).unwrap();

    let server = Arc::new(FakeServer::default());
    server.json(
        "PUT /ruler",
        serde_json::json!({ "status": 519256, "error": "signature mismatch" }),
    );
    let remote = start(server).await;

    let err = upload_resumable(&remote, &path, &signature, false)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::SignatureMismatch));
    assert!(err.requires_restart());
}

#[tokio::test]
async fn test_confirmed_signature_must_match() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.png", &patterned(800));
    let signature = signer::sign(&path).unwrap();

    let server = Arc::new(FakeServer::default());
    server.json(
        "PUT /ruler",
        serde_json::json!({
            "status": 200,
            "location": "https://cdn.invalid/a",
            "signature": "0".repeat(64),
        }),
    );
    let remote = start(server).await;

    let err = upload_resumable(&remote, &path, &signature, false)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::SignatureMismatch));
}

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::{
    CreatedMedia, MediaApi, NewMedia, RemoteError, RemoteMatch, TransferBody, TransferEndpoint,
    TransferResponse, TransferTarget,
};

/// Set by the transfer endpoint when a probe can't be answered.
const ERROR_HEADER: &str = "X-Ruler-Error";
/// Bytes of the partial upload the transfer endpoint already holds.
const SIZE_HEADER: &str = "X-Ruler-Size";
const TRANSFER_PATH: &str = "ruler";

/// The remote media service over HTTP.
pub struct HttpRemote {
    access_token: String,
    api_base: String,
    client: Client,
    transfer_base: String,
}

#[derive(Deserialize)]
struct CheckSignaturesResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    signatures: HashMap<String, SignatureEntry>,
}

#[derive(Deserialize)]
struct SignatureEntry {
    #[serde(default)]
    media_id: String,
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct CreateMediaResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    pending_media: Option<IdOnly>,
    #[serde(default)]
    media: Option<IdOnly>,
}

#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: String,
}

trait ApiStatus {
    fn status(&self) -> i64;
}

impl ApiStatus for CheckSignaturesResponse {
    fn status(&self) -> i64 {
        self.status
    }
}

impl ApiStatus for CreateMediaResponse {
    fn status(&self) -> i64 {
        self.status
    }
}

impl HttpRemote {
    pub fn new(
        api_base: &str,
        transfer_base: &str,
        access_token: &str,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder().build()?;

        Ok(Self {
            access_token: access_token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
            transfer_base: transfer_base.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn transfer_url(&self) -> String {
        format!("{}/{}", self.transfer_base, TRANSFER_PATH)
    }

    fn transfer_query<'a>(&'a self, target: &'a TransferTarget) -> [(&'static str, &'a str); 3] {
        [
            ("access_token", self.access_token.as_str()),
            ("filename", target.filename.as_str()),
            ("signature", target.signature.as_str()),
        ]
    }

    /// POST a form to the API and decode the JSON reply, rejecting non-success statuses.
    async fn call<T>(&self, path: &str, params: &[(&str, &str)]) -> Result<T, RemoteError>
    where
        T: DeserializeOwned + ApiStatus,
    {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("access_token", self.access_token.as_str()));

        let started = std::time::Instant::now();
        let resp = self.client.post(self.api_url(path)).form(&form).send().await?;
        let body = resp.bytes().await?;
        tracing::trace!(path, elapsed_ms = started.elapsed().as_millis() as u64, "API call");

        let parsed: T = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::InvalidResponse(format!("{path}: {e}")))?;

        if !is_success_status(parsed.status()) {
            return Err(RemoteError::Status(parsed.status()));
        }
        Ok(parsed)
    }
}

fn is_success_status(status: i64) -> bool {
    status == 200 || status == 20000
}

fn non_empty(id: Option<IdOnly>) -> Option<String> {
    id.map(|i| i.id).filter(|id| !id.is_empty())
}

#[async_trait]
impl MediaApi for HttpRemote {
    async fn check_signatures(
        &self,
        signatures: &[String],
    ) -> Result<Vec<RemoteMatch>, RemoteError> {
        let joined = signatures.join(",");
        let resp: CheckSignaturesResponse = self
            .call("medias/check_signatures", &[("signatures", joined.as_str())])
            .await?;

        let mut matches: Vec<RemoteMatch> = resp
            .signatures
            .into_iter()
            .map(|(signature, entry)| RemoteMatch {
                signature,
                media_id: entry.media_id,
                deleted: entry.deleted,
            })
            .collect();
        // The reply is a JSON object; keep the order stable for callers.
        matches.sort_by(|a, b| a.signature.cmp(&b.signature));
        Ok(matches)
    }

    async fn create_media(
        &self,
        media: &NewMedia,
        force: bool,
    ) -> Result<CreatedMedia, RemoteError> {
        let local_path = media.local_path.to_string_lossy();
        let mut params = vec![
            ("signature", media.signature.as_str()),
            ("url", media.location.as_str()),
            ("local_path", local_path.as_ref()),
        ];
        if force {
            params.push(("force", "true"));
        }

        let resp: CreateMediaResponse = self.call("medias/create", &params).await?;

        Ok(CreatedMedia {
            pending_media_id: non_empty(resp.pending_media),
            media_id: non_empty(resp.media),
        })
    }
}

#[async_trait]
impl TransferEndpoint for HttpRemote {
    async fn probe(&self, target: &TransferTarget) -> Result<u64, RemoteError> {
        let resp = self
            .client
            .head(self.transfer_url())
            .query(&self.transfer_query(target))
            .send()
            .await?;

        if let Some(error) = resp.headers().get(ERROR_HEADER) {
            let message = error.to_str().unwrap_or("unreadable error header");
            return Err(RemoteError::Provider(format!("probe failed: {message}")));
        }

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }

        let size = resp
            .headers()
            .get(SIZE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        match size {
            Some(size) => Ok(size),
            None => {
                tracing::debug!(filename = %target.filename, "No partial upload size reported");
                Ok(0)
            }
        }
    }

    async fn reset(&self, target: &TransferTarget) -> Result<(), RemoteError> {
        let resp = self
            .client
            .delete(self.transfer_url())
            .query(&self.transfer_query(target))
            .send()
            .await?;

        // 404 is fine -- nothing to discard
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(RemoteError::Status(i64::from(resp.status().as_u16())));
        }
        Ok(())
    }

    async fn write(
        &self,
        target: &TransferTarget,
        body: TransferBody,
    ) -> Result<TransferResponse, RemoteError> {
        let mut request = self
            .client
            .put(self.transfer_url())
            .query(&self.transfer_query(target))
            .header(CONTENT_LENGTH, body.length)
            .header(CONTENT_TYPE, body.content_type.as_str());

        if let Some(range) = body.range {
            request = request.header(CONTENT_RANGE, range.content_range());
        }

        let resp = request
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body.reader)))
            .send()
            .await?;

        let status = resp.status();
        let data = resp.bytes().await?;

        serde_json::from_slice(&data).map_err(|e| {
            RemoteError::InvalidResponse(format!("transfer endpoint ({status}): {e}"))
        })
    }
}

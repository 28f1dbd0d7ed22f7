// Push/pull transport to the sync server.
//
// Abstracted via `SyncTransport` so the sync engine can be driven by an
// in-process fake in tests; `HttpTransport` is the reqwest implementation.

use futures_util::future::BoxFuture;
use serde::Deserialize;
use url::Url;

use liqua_common::protocol::push::{GuestSession, PushRequest, PushResponse, ReplicaQuery, ReplicaSnapshot};
use liqua_common::protocol::{API_GUEST_AUTH_PATH, API_PUSH_PATH, API_REPLICA_PATH};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to sync server failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sync server rejected request ({status} {code}): {message}")]
    Rejected { status: u16, code: String, message: String, retryable: bool },
    #[error("invalid sync server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl TransportError {
    /// The bearer token is no longer accepted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { status: 401, .. })
    }
}

pub trait SyncTransport: Send + Sync {
    fn push<'a>(
        &'a self,
        token: &'a str,
        request: &'a PushRequest,
    ) -> BoxFuture<'a, Result<PushResponse, TransportError>>;

    fn pull<'a>(&'a self, token: &'a str, client_id: &'a str) -> BoxFuture<'a, Result<ReplicaSnapshot, TransportError>>;

    fn sign_in_guest(&self) -> BoxFuture<'_, Result<GuestSession, TransportError>>;
}

// ── HTTP implementation ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base: Url,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    retryable: bool,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        Ok(Self { http: reqwest::Client::new(), base: Url::parse(server_url)? })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base.join(path)?)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => TransportError::Rejected {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
            retryable: envelope.error.retryable,
        },
        Err(_) => TransportError::Rejected {
            status: status.as_u16(),
            code: "UNKNOWN".to_owned(),
            message: body,
            retryable: status.is_server_error(),
        },
    })
}

impl SyncTransport for HttpTransport {
    fn push<'a>(
        &'a self,
        token: &'a str,
        request: &'a PushRequest,
    ) -> BoxFuture<'a, Result<PushResponse, TransportError>> {
        Box::pin(async move {
            let response =
                self.http.post(self.url(API_PUSH_PATH)?).bearer_auth(token).json(request).send().await?;
            decode(response).await
        })
    }

    fn pull<'a>(&'a self, token: &'a str, client_id: &'a str) -> BoxFuture<'a, Result<ReplicaSnapshot, TransportError>> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url(API_REPLICA_PATH)?)
                .bearer_auth(token)
                .query(&ReplicaQuery { client_id: client_id.to_owned() })
                .send()
                .await?;
            decode(response).await
        })
    }

    fn sign_in_guest(&self) -> BoxFuture<'_, Result<GuestSession, TransportError>> {
        Box::pin(async move {
            let response = self.http.post(self.url(API_GUEST_AUTH_PATH)?).send().await?;
            decode(response).await
        })
    }
}

use std::pin::Pin;

use bytes::Bytes;
use futures::{StreamExt as _, TryStreamExt as _, stream};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::request::RunRequest;

/// Raw response body chunks.
pub type ByteStream = Pin<Box<dyn futures::Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Opens the streaming response for one run.
///
/// Implementations only move bytes; framing and decoding happen in the
/// session.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    /// Sends `request` and returns the response body as a chunk stream.
    ///
    /// A non-success status must be reported here, before any chunk.
    async fn open(&self, request: RunRequest) -> Result<ByteStream, ClientError>;
}

/// Posts the run request over HTTP and streams the response body.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.endpoint.trim().is_empty() {
            return Err(ClientError::Config("endpoint must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport from [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self, request: RunRequest) -> Result<ByteStream, ClientError> {
        debug!(endpoint = %self.config.endpoint, thread_id = ?request.thread_id, messages = request.messages.len(), "posting run request");
        let mut http_req = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);
        if let Some(token) = &self.config.bearer_token {
            http_req = http_req.bearer_auth(token);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes_stream()
            .map_err(|e| ClientError::transport(format!("stream read failed: {e}")));
        Ok(Box::pin(body))
    }
}

/// Replays recorded chunks instead of talking to a server.
///
/// Every `open` yields the same chunks, so one transport can serve several
/// runs of a demo or test.
#[derive(Clone, Debug, Default)]
pub struct ReplayTransport {
    chunks: Vec<Bytes>,
}

impl ReplayTransport {
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self { chunks }
    }

    /// Cuts `body` into chunks of at most `chunk_size` bytes.
    pub fn from_body(body: impl Into<Bytes>, chunk_size: usize) -> Self {
        let body: Bytes = body.into();
        let size = chunk_size.max(1);
        let chunks = (0..body.len())
            .step_by(size)
            .map(|start| body.slice(start..(start + size).min(body.len())))
            .collect();
        Self { chunks }
    }
}

#[async_trait::async_trait]
impl EventTransport for ReplayTransport {
    async fn open(&self, _request: RunRequest) -> Result<ByteStream, ClientError> {
        Ok(stream::iter(self.chunks.clone().into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_request() -> RunRequest {
        RunRequest {
            thread_id: None,
            run_id: None,
            messages: Vec::new(),
            state: None,
        }
    }

    #[tokio::test]
    async fn replay_transport_rechunks_body() {
        let transport = ReplayTransport::from_body("abcdefg", 3);
        let chunks: Vec<Bytes> = transport
            .open(empty_request())
            .await
            .expect("open")
            .try_collect()
            .await
            .expect("collect");
        assert_eq!(
            chunks,
            vec![
                Bytes::from("abc"),
                Bytes::from("def"),
                Bytes::from("g")
            ]
        );
    }

    #[test]
    fn http_transport_rejects_empty_endpoint() {
        let err = HttpTransport::new(ClientConfig::new(" ")).err().expect("should fail");
        assert!(matches!(err, ClientError::Config(_)));
    }
}

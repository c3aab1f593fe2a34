//! Production transport using reqwest.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use indexmap::IndexMap;
use reqwest::{Body, Client, Method};
use tokio_util::io::ReaderStream;

use hoist_core::ports::UploadManagerConfig;
use hoist_core::upload::{HttpMethod, TaskId, TransportFailure};

use super::{ProgressSink, ReattachedTransfer, Transfer, TransferResponse, UploadTransport};
use crate::request::BodySource;

/// Chunk size for streamed bodies.
const CHUNK_SIZE: usize = 64 * 1024;

/// HTTP transport backed by a shared `reqwest::Client`.
///
/// Transfers live inside this process, so nothing can be re-associated
/// after a restart.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with the given timeout and User-Agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Build a transport from manager configuration.
    pub fn from_config(config: &UploadManagerConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            Duration::from_secs(config.request_timeout_secs),
            &config.user_agent,
        )
    }

    /// Wrap an existing client.
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Open the body as a stream that reports progress as chunks go out.
    ///
    /// A temporary artifact is deleted as soon as it is open.
    async fn open_body(
        task_id: &TaskId,
        mut body: BodySource,
        total: u64,
        progress: ProgressSink,
    ) -> Result<Body, TransportFailure> {
        let artifact = body.take_artifact();

        let chunks: std::pin::Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>> = match body {
            BodySource::Memory(bytes) => {
                let pieces: Vec<io::Result<Bytes>> = (0..bytes.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(bytes.slice(start..bytes.len().min(start + CHUNK_SIZE))))
                    .collect();
                Box::pin(stream::iter(pieces))
            }
            BodySource::File { path, .. } => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    TransportFailure::from_error("io_error", &e)
                        .with_details(vec![format!("path: {}", path.display())])
                })?;
                Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE))
            }
        };

        if let Some(artifact) = artifact {
            let path = artifact.to_path_buf();
            if let Err(e) = artifact.close() {
                tracing::warn!(
                    target: "hoist.upload",
                    task_id = %task_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove multipart artifact"
                );
            }
        }

        let mut sent = 0u64;
        let counted = chunks.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                progress.report(sent, total);
            }
            chunk
        });
        Ok(Body::wrap_stream(counted))
    }
}

const fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// Classify a reqwest error into a transport failure.
fn map_error(err: &reqwest::Error) -> TransportFailure {
    let code = if err.is_timeout() {
        "request_timeout"
    } else if err.is_connect() {
        "connection_failed"
    } else {
        "upload_error"
    };
    TransportFailure::from_error(code, err)
}

#[async_trait]
impl UploadTransport for ReqwestTransport {
    async fn send(&self, transfer: Transfer) -> Result<TransferResponse, TransportFailure> {
        let Transfer {
            task_id,
            request,
            progress,
        } = transfer;

        let body = Self::open_body(&task_id, request.body, request.content_length, progress).await?;

        let mut builder = self
            .client
            .request(method(request.method), request.url.as_str())
            .body(body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::debug!(
            target: "hoist.upload",
            task_id = %task_id,
            method = %request.method,
            url = %request.url,
            content_length = request.content_length,
            timeout_secs = request.timeout.map(|t| t.as_secs()),
            "Sending upload"
        );

        let response = builder.send().await.map_err(|e| map_error(&e))?;
        let status_code = response.status().as_u16();
        let headers: IndexMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| map_error(&e))?;

        Ok(TransferResponse {
            status_code,
            headers,
            body,
        })
    }

    fn reattach(&self, _task_id: &TaskId) -> Option<ReattachedTransfer> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mapping() {
        assert_eq!(method(HttpMethod::Post), Method::POST);
        assert_eq!(method(HttpMethod::Put), Method::PUT);
        assert_eq!(method(HttpMethod::Patch), Method::PATCH);
    }

    #[test]
    fn test_from_config() {
        let config = UploadManagerConfig::default();
        assert!(ReqwestTransport::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_artifact_removed_once_opened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.req");
        std::fs::write(&path, b"encoded").unwrap();
        let artifact = tempfile::TempPath::from_path(&path);
        let body = BodySource::File {
            path: path.clone(),
            artifact: Some(artifact),
        };

        let (sink, _rx) = ProgressSink::channel();
        let opened = ReqwestTransport::open_body(&TaskId::new("t"), body, 7, sink).await;
        assert!(opened.is_ok());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_body_file_is_io_failure() {
        let body = BodySource::File {
            path: "/no/such/body.bin".into(),
            artifact: None,
        };
        let (sink, _rx) = ProgressSink::channel();
        let err = ReqwestTransport::open_body(&TaskId::new("t"), body, 1, sink)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, "io_error");
        assert_eq!(err.status_code, 500);
    }

    #[tokio::test]
    async fn test_connection_refused_is_classified() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        let transport = ReqwestTransport::new(Duration::from_secs(5), "hoist-test").unwrap();
        let (sink, _rx) = ProgressSink::channel();
        let request = crate::request::PreparedRequest {
            method: HttpMethod::Post,
            url: url::Url::parse(&format!("http://{addr}/upload")).unwrap(),
            headers: crate::request::build_headers("application/octet-stream", 3, &IndexMap::new()),
            body: BodySource::File { path, artifact: None },
            content_type: "application/octet-stream".to_string(),
            content_length: 3,
            timeout: None,
        };
        let err = transport
            .send(Transfer {
                task_id: TaskId::new("t"),
                request,
                progress: sink,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, "connection_failed");
        assert_eq!(err.status_code, 500);
    }
}

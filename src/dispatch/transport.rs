use super::wire::{BlockRequest, TriangleResponse, WireError};
use crate::mesh::surface::{respond, SurfaceExtractor};
use reqwest::header::CONTENT_TYPE;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("status code {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("bad reply from {url}: {source}")]
    Wire {
        url: String,
        #[source]
        source: WireError,
    },

    #[error("worker task for {url} did not complete: {reason}")]
    Aborted { url: String, reason: String },
}

/// Delivers one block to a worker and returns its reply.
///
/// Implementations are shared across concurrently running dispatch tasks.
pub trait WorkerTransport: Send + Sync + 'static {
    fn send(
        &self,
        url: &str,
        request: BlockRequest,
    ) -> impl Future<Output = Result<TriangleResponse, TransportError>> + Send;
}

/// Posts form-encoded blocks to worker nodes over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl WorkerTransport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        request: BlockRequest,
    ) -> Result<TriangleResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.to_form_body())
            .send()
            .await
            .map_err(|source| TransportError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<TriangleResponse>()
            .await
            .map_err(|source| TransportError::Http {
                url: url.to_string(),
                source,
            })
    }
}

/// Runs the worker handler in-process on the blocking pool.
///
/// Requests still go through the full wire encoding, so this behaves like a
/// remote worker without the network.
#[derive(Debug)]
pub struct LocalTransport<E> {
    extractor: Arc<E>,
}

impl<E> Clone for LocalTransport<E> {
    fn clone(&self) -> Self {
        Self {
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<E: SurfaceExtractor + 'static> LocalTransport<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor: Arc::new(extractor),
        }
    }
}

impl<E: SurfaceExtractor + 'static> WorkerTransport for LocalTransport<E> {
    async fn send(
        &self,
        url: &str,
        request: BlockRequest,
    ) -> Result<TriangleResponse, TransportError> {
        let extractor = Arc::clone(&self.extractor);
        let body = request.to_form_body();

        tokio::task::spawn_blocking(move || respond(&body, extractor.as_ref()))
            .await
            .map_err(|e| TransportError::Aborted {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|source| TransportError::Wire {
                url: url.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FaceExtractor;
    use crate::volume::Volume;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one connection, reads the whole request and answers with
    /// `status_line` and `body`. Returns the URL to post to.
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let reply = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/mesh/generate/", addr)
    }

    fn direct_transport() -> HttpTransport {
        HttpTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    fn cube_request() -> BlockRequest {
        let mut block = Volume::zeros([4, 4, 4]);
        block.fill_region([1, 1, 1], [2, 2, 2], 1);
        BlockRequest::from_volume(&block, [0, 0, 0])
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let url = serve_once("HTTP/1.1 500 Internal Server Error", String::new()).await;

        let err = direct_transport()
            .send(&url, cube_request())
            .await
            .unwrap_err();
        match err {
            TransportError::Status { url: got, status } => {
                assert_eq!(status, 500);
                assert_eq!(got, url);
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_reply_is_parsed() {
        let tris = vec![[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]];
        let body = serde_json::to_string(&TriangleResponse::from_triangles(&tris)).unwrap();
        let url = serve_once("HTTP/1.1 200 OK", body).await;

        let reply = direct_transport().send(&url, cube_request()).await.unwrap();
        assert_eq!(reply.into_triangles().unwrap(), Some(tris));
    }

    #[tokio::test]
    async fn test_local_transport_meshes_block() {
        let transport = LocalTransport::new(FaceExtractor);
        let mut block = Volume::zeros([4, 4, 4]);
        block.fill_region([1, 1, 1], [2, 2, 2], 1);

        let reply = transport
            .send("local://0", BlockRequest::from_volume(&block, [0, 0, 0]))
            .await
            .unwrap();
        let triangles = reply.into_triangles().unwrap().unwrap();
        // 2x2x2 cube: 24 unit faces, 2 triangles each
        assert_eq!(triangles.len(), 48);
    }

    #[tokio::test]
    async fn test_local_transport_reports_bad_request() {
        let transport = LocalTransport::new(FaceExtractor);
        let mut request = BlockRequest::from_volume(&Volume::zeros([2, 2, 2]), [0, 0, 0]);
        request.dtype = "int64".to_string();

        let err = transport.send("local://0", request).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Wire {
                source: WireError::UnsupportedDtype(_),
                ..
            }
        ));
    }
}

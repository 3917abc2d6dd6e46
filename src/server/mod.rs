pub mod registry;

pub use registry::{MediaRegistry, MediaState, PublishedMedia};

use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::constants::{DLNA_FLAGS, DLNA_OP};

const GROWING_READ_BUF: usize = 64 * 1024;
const GROWING_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Best-guess LAN address, used to build URLs a renderer can reach.
/// Routing lookup only; nothing is sent.
pub fn local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("239.255.255.250:1900").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// HTTP server exposing published media files at `/<id>` with byte-range
/// support for finalized files and chunked streaming for growing ones.
pub struct StreamingServer {
    registry: Arc<MediaRegistry>,
    configured_port: u16,
    bound: OnceLock<SocketAddr>,
    shutdown: CancellationToken,
}

impl StreamingServer {
    pub fn new(registry: Arc<MediaRegistry>, port: u16) -> Self {
        Self {
            registry,
            configured_port: port,
            bound: OnceLock::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<MediaRegistry> {
        &self.registry
    }

    /// Bind and start serving in the background; returns the bound address
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let addr = format!("0.0.0.0:{}", self.configured_port);
        let listener = TcpListener::bind(&addr)
            .await
            .context("Failed to bind streaming server")?;
        let actual = listener.local_addr()?;
        self.bound
            .set(actual)
            .map_err(|_| anyhow::anyhow!("Streaming server already started"))?;
        info!("Streaming server listening on {}", actual);

        let app = Router::new()
            .route("/:id", get(Self::serve_media))
            .with_state(self.clone());
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Streaming server error: {}", e);
            }
        });

        Ok(actual)
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Port actually bound, once started
    pub fn port(&self) -> Option<u16> {
        self.bound.get().map(|addr| addr.port())
    }

    /// URL under which the given id is reachable from the LAN
    pub fn media_url(&self, id: &str) -> Option<String> {
        let port = self.port()?;
        let ip = local_ip()?;
        Some(format!("http://{}:{}/{}", ip, port, id))
    }

    async fn serve_media(
        Path(id): Path<String>,
        State(server): State<Arc<StreamingServer>>,
        headers: HeaderMap,
    ) -> Response {
        debug!("Request headers for /{}: {:?}", id, headers);

        // snapshot at request start; a concurrent republish does not
        // affect this response
        let Some(entry) = server.registry.get(&id).await else {
            return plain_response(
                StatusCode::NOT_FOUND,
                format!("Video with id {} not found!", id),
            );
        };

        match entry.state {
            MediaState::Growing => server.serve_growing(entry).await,
            MediaState::Finalized => server.serve_finalized(entry, &headers).await,
        }
    }

    /// Stream a file that is still being written: unbounded chunked 200
    /// that keeps reading as the file grows and finishes once the entry is
    /// finalized and drained.
    async fn serve_growing(&self, entry: PublishedMedia) -> Response {
        info!("Serving growing file {:?}", entry.file_path);
        let file = match tokio::fs::File::open(&entry.file_path).await {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open {:?}: {}", entry.file_path, e);
                return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string());
            }
        };

        struct Grow {
            file: tokio::fs::File,
            registry: Arc<MediaRegistry>,
            id: String,
            finalized_seen: bool,
        }

        let state = Grow {
            file,
            registry: self.registry.clone(),
            id: entry.id.clone(),
            finalized_seen: false,
        };

        let stream = futures::stream::try_unfold(state, |mut s| async move {
            loop {
                let mut buf = vec![0u8; GROWING_READ_BUF];
                let n = s.file.read(&mut buf).await?;
                if n > 0 {
                    buf.truncate(n);
                    return Ok::<_, std::io::Error>(Some((Bytes::from(buf), s)));
                }

                if s.finalized_seen {
                    return Ok(None);
                }
                match s.registry.get(&s.id).await {
                    Some(current) if current.state == MediaState::Growing => {
                        tokio::time::sleep(GROWING_POLL_INTERVAL).await;
                    }
                    // finalized or unpublished: one more read pass to drain
                    _ => s.finalized_seen = true,
                }
            }
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .unwrap()
    }

    async fn serve_finalized(&self, entry: PublishedMedia, headers: &HeaderMap) -> Response {
        let metadata = match tokio::fs::metadata(&entry.file_path).await {
            Ok(m) => m,
            Err(e) => {
                error!("Failed to stat {:?}: {}", entry.file_path, e);
                return plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("IO error: {}", e),
                );
            }
        };
        let file_length = metadata.len();

        let mut file = match tokio::fs::File::open(&entry.file_path).await {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open {:?}: {}", entry.file_path, e);
                return plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("IO error: {}", e),
                );
            }
        };

        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_range_header(v, file_length));

        match range {
            Some((start, end)) => {
                let length = end - start + 1;
                if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
                    error!("Failed to seek in {:?}: {}", entry.file_path, e);
                    return plain_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("IO error: {}", e),
                    );
                }
                debug!(
                    "Serving range {}-{}/{} of {}",
                    start, end, file_length, entry.id
                );
                let body = Body::from_stream(ReaderStream::new(file.take(length)));
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, "video/mp4")
                    .header(header::CONTENT_LENGTH, length.to_string())
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, file_length),
                    )
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONNECTION, "keep-alive")
                    .body(body)
                    .unwrap()
            }
            None => {
                debug!("Serving full file {} ({} bytes)", entry.id, file_length);
                let content_features = format!(
                    "DLNA.ORG_PN={};DLNA.ORG_OP={};DLNA.ORG_CI=0;DLNA.ORG_FLAGS={}",
                    entry.quality.dlna_profile(),
                    DLNA_OP,
                    DLNA_FLAGS
                );
                let body = Body::from_stream(ReaderStream::new(file));
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "video/mp4")
                    .header(header::CONTENT_LENGTH, file_length.to_string())
                    .header("contentFeatures.dlna.org", content_features)
                    .header("transferMode.dlna.org", "Streaming")
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONNECTION, "keep-alive")
                    .body(body)
                    .unwrap()
            }
        }
    }
}

fn plain_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Parse a `bytes=start-end` header against a known file length, clamping
/// both bounds into the file. Returns None for unusable ranges or empty
/// files.
fn parse_range_header(value: &str, file_length: u64) -> Option<(u64, u64)> {
    if file_length == 0 {
        return None;
    }
    let spec = value.strip_prefix("bytes=")?;
    let (start_raw, end_raw) = spec.split_once('-')?;

    let start = if start_raw.is_empty() {
        // suffix range: last N bytes
        let suffix: u64 = end_raw.parse().ok()?;
        return if suffix == 0 {
            None
        } else {
            Some((file_length.saturating_sub(suffix), file_length - 1))
        };
    } else {
        start_raw.parse::<u64>().ok()?
    };

    let end = if end_raw.is_empty() {
        file_length - 1
    } else {
        end_raw.parse::<u64>().ok()?
    };

    let start = start.min(file_length - 1);
    let end = end.min(file_length - 1);
    if start > end {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_within_bounds() {
        assert_eq!(parse_range_header("bytes=100-199", 1000), Some((100, 199)));
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        assert_eq!(parse_range_header("bytes=500-", 1000), Some((500, 999)));
    }

    #[test]
    fn suffix_range_takes_tail() {
        assert_eq!(parse_range_header("bytes=-200", 1000), Some((800, 999)));
    }

    #[test]
    fn bounds_are_clamped_to_file() {
        assert_eq!(parse_range_header("bytes=0-5000", 1000), Some((0, 999)));
        assert_eq!(parse_range_header("bytes=2000-3000", 1000), Some((999, 999)));
    }

    #[test]
    fn unusable_ranges_are_rejected() {
        assert_eq!(parse_range_header("bytes=garbage", 1000), None);
        assert_eq!(parse_range_header("items=0-5", 1000), None);
        assert_eq!(parse_range_header("bytes=0-10", 0), None);
        assert_eq!(parse_range_header("bytes=-0", 1000), None);
    }
}

use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::download::chunk::Chunk;
use crate::error::{Error, Result};

/// How a range fetch ended. Cancellation is a normal outcome, not an error;
/// the partial file is already gone when it is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    Cancelled,
}

/// Fetch one byte range of `url` into the file at `dest`.
///
/// Issues a single GET with a `Range: bytes=start-end` header and streams
/// the body to disk, reporting the cumulative byte count through `on_bytes`
/// after every read. A non-success status or a mid-body transport error
/// tears the file down and fails with a network error.
pub async fn fetch_range(
    client: &Client,
    url: &str,
    chunk: &Chunk,
    dest: &Path,
    mut on_bytes: impl FnMut(u64) + Send,
    cancel: &CancellationToken,
) -> Result<FetchOutcome> {
    let response = client
        .get(url)
        .header("Range", format!("bytes={}-{}", chunk.start, chunk.end))
        .send()
        .await
        .map_err(Error::network)?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Network(format!(
            "range {}-{} of {} returned status {}",
            chunk.start, chunk.end, url, status
        )));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Range {}-{} cancelled after {} bytes", chunk.start, chunk.end, written);
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Ok(FetchOutcome::Cancelled);
            }
            next = stream.next() => {
                match next {
                    Some(Ok(bytes)) => {
                        if let Err(e) = file.write_all(&bytes).await {
                            drop(file);
                            let _ = tokio::fs::remove_file(dest).await;
                            return Err(e.into());
                        }
                        written += bytes.len() as u64;
                        on_bytes(written);
                    }
                    Some(Err(e)) => {
                        drop(file);
                        let _ = tokio::fs::remove_file(dest).await;
                        return Err(Error::network(e));
                    }
                    None => break,
                }
            }
        }
    }

    file.flush().await?;
    debug!(
        "Range {}-{} complete ({} bytes)",
        chunk.start, chunk.end, written
    );
    Ok(FetchOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fetches_requested_range() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/file")
            .match_header("range", "bytes=2-5")
            .with_status(206)
            .with_body("cdef")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("part");
        let chunk = Chunk {
            start: 2,
            end: 5,
            total_bytes: 4,
        };

        let mut last = 0u64;
        let outcome = fetch_range(
            &Client::new(),
            &format!("{}/file", server.url()),
            &chunk,
            &dest,
            |n| last = n,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome, FetchOutcome::Completed);
        assert_eq!(last, 4);
        assert_eq!(std::fs::read(&dest).unwrap(), b"cdef");
    }

    #[tokio::test]
    async fn error_status_fails_and_removes_partial() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("part");
        let chunk = Chunk {
            start: 0,
            end: 9,
            total_bytes: 10,
        };

        let result = fetch_range(
            &Client::new(),
            &format!("{}/missing", server.url()),
            &chunk,
            &dest,
            |_| {},
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn pre_cancelled_fetch_discards_output() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/file")
            .with_status(206)
            .with_body(vec![0u8; 1024])
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("part");
        let chunk = Chunk {
            start: 0,
            end: 1023,
            total_bytes: 1024,
        };

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fetch_range(
            &Client::new(),
            &format!("{}/file", server.url()),
            &chunk,
            &dest,
            |_| {},
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(!dest.exists());
    }
}

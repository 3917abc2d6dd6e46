use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinSet;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TrackBudget;
use crate::download::chunk;
use crate::download::fetcher::{self, FetchOutcome};
use crate::error::{Error, Result};

/// How a whole-resource download ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// All chunks merged into the destination file
    Complete,
    /// The parent token was cancelled; no output remains
    Cancelled,
}

/// Determine the total byte length of a remote resource.
///
/// Tries a HEAD request first; servers that refuse HEAD get a one-byte
/// range GET instead, whose `Content-Range` header carries the total.
pub async fn probe_content_length(client: &Client, url: &str) -> Result<u64> {
    // read the header directly; the body-based length is empty for HEAD
    if let Ok(response) = client.head(url).send().await
        && response.status().is_success()
        && let Some(len) = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        && len > 0
    {
        return Ok(len);
    }

    debug!("HEAD probe failed for {}, falling back to range probe", url);
    let response = client
        .get(url)
        .header("Range", "bytes=0-0")
        .send()
        .await
        .map_err(Error::network)?;

    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "length probe of {} returned status {}",
            url,
            response.status()
        )));
    }

    let total = response
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total);

    match total {
        Some(len) if len > 0 => Ok(len),
        _ => Err(Error::Download(format!(
            "could not determine content length of {}",
            url
        ))),
    }
}

/// Extract the total from a `bytes 0-0/12345` style header value
fn parse_content_range_total(value: &str) -> Option<u64> {
    let total = value.rsplit('/').next()?;
    total.trim().parse().ok()
}

/// Downloads one remote resource through N concurrent ranged fetches into
/// per-chunk temporary files, then concatenates them in order.
pub struct ParallelDownloader {
    client: Client,
    budget: TrackBudget,
}

impl ParallelDownloader {
    pub fn new(client: Client, budget: TrackBudget) -> Self {
        Self { client, budget }
    }

    /// Download `url` (of known `total_size` bytes) to `dest`.
    ///
    /// Summed per-chunk progress is published through `progress` on every
    /// read. Any chunk failure cancels the remaining fetches, removes all
    /// temporaries and fails the operation; parent cancellation does the
    /// same cleanup but is reported as `Cancelled`, not an error.
    pub async fn download(
        &self,
        url: &str,
        total_size: u64,
        dest: &Path,
        progress: watch::Sender<u64>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let chunks = chunk::plan(total_size, self.budget.max_threads, self.budget.min_chunk_bytes)?;
        let chunk_files: Vec<PathBuf> = (0..chunks.len())
            .map(|i| chunk_path(dest, i))
            .collect();

        info!(
            "Downloading {:?} with {} chunks, total {} bytes",
            dest.file_name().unwrap_or_default(),
            chunks.len(),
            total_size
        );

        let slots: Arc<Vec<AtomicU64>> =
            Arc::new((0..chunks.len()).map(|_| AtomicU64::new(0)).collect());
        let fetch_token = cancel.child_token();

        let mut tasks = JoinSet::new();
        for (index, chunk) in chunks.iter().copied().enumerate() {
            let client = self.client.clone();
            let url = url.to_string();
            let path = chunk_files[index].clone();
            let slots = slots.clone();
            let progress = progress.clone();
            let token = fetch_token.clone();

            tasks.spawn(async move {
                fetcher::fetch_range(&client, &url, &chunk, &path, |bytes| {
                    slots[index].store(bytes, Ordering::Relaxed);
                    let sum: u64 = slots.iter().map(|s| s.load(Ordering::Relaxed)).sum();
                    progress.send_replace(sum);
                }, &token)
                .await
            });
        }

        let mut failure: Option<Error> = None;
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(FetchOutcome::Completed)) => {}
                Ok(Ok(FetchOutcome::Cancelled)) => cancelled = true,
                Ok(Err(e)) => {
                    if failure.is_none() {
                        warn!("Chunk fetch failed, aborting download: {}", e);
                        failure = Some(e);
                    }
                    fetch_token.cancel();
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(Error::Download(format!("chunk task panicked: {}", e)));
                    }
                    fetch_token.cancel();
                }
            }
        }

        if let Some(e) = failure {
            remove_files(&chunk_files).await;
            return Err(Error::Download(e.to_string()));
        }

        if cancelled || cancel.is_cancelled() {
            remove_files(&chunk_files).await;
            return Ok(DownloadOutcome::Cancelled);
        }

        let merge_result = merge_chunks(&chunk_files, dest).await;
        remove_files(&chunk_files).await;
        merge_result?;

        info!("Completed download of {:?}", dest.file_name().unwrap_or_default());
        Ok(DownloadOutcome::Complete)
    }
}

fn chunk_path(dest: &Path, index: usize) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(format!(".chunk{}.tmp", index));
    PathBuf::from(name)
}

async fn merge_chunks(chunk_files: &[PathBuf], dest: &Path) -> Result<()> {
    let mut output = tokio::fs::File::create(dest).await?;
    for path in chunk_files {
        let mut input = tokio::fs::File::open(path).await?;
        tokio::io::copy(&mut input, &mut output).await?;
    }
    tokio::io::AsyncWriteExt::flush(&mut output).await?;
    Ok(())
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

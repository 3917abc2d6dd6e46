use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TrackBudget;
use crate::download::parallel::{self, DownloadOutcome, ParallelDownloader};
use crate::error::{Error, Result};
use crate::job::state::VideoJobState;

/// The two merged track files produced by a dual download
#[derive(Debug, Clone)]
pub struct StreamPair {
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl StreamPair {
    /// Remove both track files, ignoring files already gone
    pub async fn delete(&self) {
        let _ = tokio::fs::remove_file(&self.video).await;
        let _ = tokio::fs::remove_file(&self.audio).await;
    }
}

#[derive(Debug)]
pub enum DualOutcome {
    Complete(StreamPair),
    Cancelled,
}

fn format_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Coordinates a video and an audio download running concurrently with
/// independent thread budgets, plus a periodic reporter that folds the
/// combined progress into the job state and logs throughput.
pub struct DualStreamDownload {
    client: Client,
    video_budget: TrackBudget,
    audio_budget: TrackBudget,
    progress_interval: Duration,
}

impl DualStreamDownload {
    pub fn new(
        client: Client,
        video_budget: TrackBudget,
        audio_budget: TrackBudget,
        progress_interval: Duration,
    ) -> Self {
        Self {
            client,
            video_budget,
            audio_budget,
            progress_interval,
        }
    }

    /// Download both tracks into `cache_dir`, named after `id`.
    ///
    /// Cancelling `cancel` stops both downloads and the reporter and
    /// removes any partial output.
    pub async fn start(
        &self,
        id: &str,
        video_url: &str,
        audio_url: &str,
        cache_dir: &Path,
        state: &VideoJobState,
        cancel: &CancellationToken,
    ) -> Result<DualOutcome> {
        tokio::fs::create_dir_all(cache_dir).await?;

        let pair = StreamPair {
            video: cache_dir.join(format!("{}_video.tmp", id)),
            audio: cache_dir.join(format!("{}_audio.tmp", id)),
        };

        let video_total = parallel::probe_content_length(&self.client, video_url).await?;
        let audio_total = parallel::probe_content_length(&self.client, audio_url).await?;
        let combined_total = video_total + audio_total;
        info!(
            "Dual download for {}: video {:.1} MB, audio {:.1} MB",
            id,
            format_mb(video_total),
            format_mb(audio_total)
        );

        let (video_tx, video_rx) = watch::channel(0u64);
        let (audio_tx, audio_rx) = watch::channel(0u64);

        let track_token = cancel.child_token();
        let reporter_token = track_token.child_token();
        let reporter = self.spawn_reporter(
            combined_total,
            video_rx,
            audio_rx,
            state.clone(),
            reporter_token.clone(),
        );

        let mut tasks = JoinSet::new();
        {
            let downloader = ParallelDownloader::new(self.client.clone(), self.video_budget);
            let url = video_url.to_string();
            let dest = pair.video.clone();
            let token = track_token.clone();
            tasks.spawn(async move {
                let result = downloader
                    .download(&url, video_total, &dest, video_tx, &token)
                    .await;
                ("video", result)
            });
        }
        {
            let downloader = ParallelDownloader::new(self.client.clone(), self.audio_budget);
            let url = audio_url.to_string();
            let dest = pair.audio.clone();
            let token = track_token.clone();
            tasks.spawn(async move {
                let result = downloader
                    .download(&url, audio_total, &dest, audio_tx, &token)
                    .await;
                ("audio", result)
            });
        }

        let started = Instant::now();
        let mut failure: Option<Error> = None;
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(DownloadOutcome::Complete))) => {}
                Ok((_, Ok(DownloadOutcome::Cancelled))) => cancelled = true,
                Ok((track, Err(e))) => {
                    if failure.is_none() {
                        warn!("{} track failed: {}", track, e);
                        failure = Some(e);
                    }
                    track_token.cancel();
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(Error::Download(format!("track task panicked: {}", e)));
                    }
                    track_token.cancel();
                }
            }
        }

        reporter_token.cancel();
        let _ = reporter.await;

        if let Some(e) = failure {
            pair.delete().await;
            return Err(e);
        }

        if cancelled || cancel.is_cancelled() {
            pair.delete().await;
            return Ok(DualOutcome::Cancelled);
        }

        info!(
            "Download of {} completed in {}s: video -> {:?}, audio -> {:?}",
            id,
            started.elapsed().as_secs(),
            pair.video,
            pair.audio
        );
        Ok(DualOutcome::Complete(pair))
    }

    fn spawn_reporter(
        &self,
        combined_total: u64,
        video_rx: watch::Receiver<u64>,
        audio_rx: watch::Receiver<u64>,
        state: VideoJobState,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.progress_interval;
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            let mut last_total = 0u64;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let downloaded = *video_rx.borrow() + *audio_rx.borrow();
                let percent = (downloaded as f64 * 100.0 / combined_total as f64) as f32;
                state.update_progress(percent);

                let delta = downloaded.saturating_sub(last_total);
                let speed = format_mb(delta) / interval.as_secs_f64();
                let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                let average = format_mb(downloaded) / elapsed;
                debug!(
                    "Progress: {:.1}%, downloaded: {:.1} MB, speed: {:.2} MB/s, avg: {:.2} MB/s",
                    percent,
                    format_mb(downloaded),
                    speed,
                    average
                );
                last_total = downloaded;
            }
        })
    }
}

pub mod manifest;
pub mod monitor;
pub mod state;

pub use manifest::CacheManifest;
pub use monitor::{AlwaysConnected, ConnectivityProbe, LanRouteProbe};
pub use state::{JobSnapshot, JobStatus, VideoJobState};

use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::download::{DualOutcome, DualStreamDownload, StreamPair};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus, Notice};
use crate::mux::{MuxEngine, MuxRequest, MuxSessionId};
use crate::resolver::{SourceResolver, StreamVariant, VideoSource};
use crate::server::{MediaRegistry, MediaState, PublishedMedia, StreamingServer};
use crate::settings::{QualityStore, VideoQuality};

/// Book-keeping for the job currently in flight
struct ActiveJob {
    cancel: CancellationToken,
    mux_session: Option<MuxSessionId>,
    media_id: Option<String>,
}

enum PipelineOutcome {
    Ready,
    Cancelled,
}

/// Owns the preparation pipeline for one video at a time: resolve, check
/// the cache, download both tracks, mux, publish, and keep the job state
/// and event bus honest throughout. Also supervises connectivity while a
/// job is active.
pub struct JobController {
    config: EngineConfig,
    client: Client,
    cache_dir: PathBuf,
    resolver: Arc<dyn SourceResolver>,
    mux: Arc<dyn MuxEngine>,
    server: Arc<StreamingServer>,
    quality: Arc<dyn QualityStore>,
    probe: Arc<dyn ConnectivityProbe>,
    state: VideoJobState,
    events: EventBus,
    manifest: Mutex<CacheManifest>,
    active: Mutex<Option<ActiveJob>>,
}

impl JobController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        client: Client,
        cache_dir: PathBuf,
        resolver: Arc<dyn SourceResolver>,
        mux: Arc<dyn MuxEngine>,
        server: Arc<StreamingServer>,
        quality: Arc<dyn QualityStore>,
        probe: Arc<dyn ConnectivityProbe>,
        events: EventBus,
    ) -> Self {
        let manifest = CacheManifest::load(cache_dir.join("manifest.json"));
        Self {
            config,
            client,
            cache_dir,
            resolver,
            mux,
            server,
            quality,
            probe,
            state: VideoJobState::new(),
            events,
            manifest: Mutex::new(manifest),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &VideoJobState {
        &self.state
    }

    pub fn registry(&self) -> &Arc<MediaRegistry> {
        self.server.registry()
    }

    /// Id and published URL of the current job's media, once available
    pub async fn current_media_url(&self) -> Option<String> {
        let active = self.active.lock().await;
        let id = active.as_ref()?.media_id.clone()?;
        self.server.media_url(&id)
    }

    /// Prepare the video behind `url` for playback: resolve it, reuse a
    /// finalized file when one exists, otherwise download and mux, then
    /// publish the result. Terminal states: Ready, Error, or Idle after an
    /// explicit cancellation.
    pub async fn prepare(&self, url: &str) -> Result<()> {
        info!("Preparing {}", url);
        self.abort_active().await;

        self.set_status(|s| s.preparing());

        let token = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            *active = Some(ActiveJob {
                cancel: token.clone(),
                mux_session: None,
                media_id: None,
            });
        }

        let monitor = monitor::spawn_monitor(
            self.probe.clone(),
            Duration::from_millis(self.config.connectivity_poll_ms),
            token.clone(),
            {
                let state = self.state.clone();
                let events = self.events.clone();
                move || {
                    events.notice(Notice::ConnectionLost);
                    state.error();
                    events.emit(EngineEvent::StatusChanged(JobStatus::Error));
                }
            },
        );

        let result = self.run_pipeline(url, &token).await;

        token.cancel();
        let _ = monitor.await;

        match result {
            Ok(PipelineOutcome::Ready) => {
                self.set_status(|s| s.ready());
                Ok(())
            }
            Ok(PipelineOutcome::Cancelled) => {
                // connectivity loss already flipped the state to Error;
                // a user cancellation returns quietly to Idle
                if self.state.status() != JobStatus::Error {
                    self.set_status(|s| s.reset());
                }
                Ok(())
            }
            Err(e) => {
                warn!("Preparation failed: {}", e);
                self.set_status(|s| s.error());
                self.events.notice(Notice::JobFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, url: &str, token: &CancellationToken) -> Result<PipelineOutcome> {
        let source = self.resolver.resolve(url).await?;
        let quality = self.quality.current().await;
        info!(
            "Resolved \"{}\" ({}) at preferred quality {}",
            source.title,
            source.id,
            quality.title()
        );

        self.set_media_id(&source.id).await;

        // a previously finalized file short-circuits the whole pipeline
        let cached = {
            let mut manifest = self.manifest.lock().await;
            manifest.lookup(&source.id, quality)
        };
        if let Some(path) = cached {
            info!("Reusing finalized file {:?} for {}", path, source.id);
            self.server
                .registry()
                .publish(published(&source, quality, path, MediaState::Finalized))
                .await;
            return Ok(PipelineOutcome::Ready);
        }

        let (video, audio) = select_streams(&source, quality)?;
        debug!(
            "Selected video {:?} ({:?}) and audio {:?} ({:?})",
            video.height, video.codec, audio.average_bitrate, audio.codec
        );

        let dual = DualStreamDownload::new(
            self.client.clone(),
            self.config.video,
            self.config.audio,
            self.config.progress_interval(),
        );
        let pair = match dual
            .start(
                &source.id,
                &video.url,
                &audio.url,
                &self.cache_dir,
                &self.state,
                token,
            )
            .await?
        {
            DualOutcome::Complete(pair) => pair,
            DualOutcome::Cancelled => return Ok(PipelineOutcome::Cancelled),
        };

        self.set_status(|s| s.finalizing());
        let outcome = self.mux_and_publish(&source, quality, &pair, token).await;

        // track inputs are spent regardless of how the mux went
        pair.delete().await;
        outcome
    }

    async fn mux_and_publish(
        &self,
        source: &VideoSource,
        quality: VideoQuality,
        pair: &StreamPair,
        token: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let output = self
            .cache_dir
            .join(format!("{}_{}.mp4", source.id, quality.title()));

        let session = self
            .mux
            .start(MuxRequest {
                video_input: pair.video.clone(),
                audio_input: pair.audio.clone(),
                output: output.clone(),
                duration_ms: source.duration_ms,
            })
            .await?;
        {
            let mut active = self.active.lock().await;
            if let Some(job) = active.as_mut() {
                job.mux_session = Some(session.id);
            }
        }

        let mut stats = session.stats;
        let mut done = session.done;
        let mut stats_open = true;
        let mut published_growing = false;

        let result = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.mux.cancel(session.id).await;
                    // wait for the engine to acknowledge before cleanup
                    let _ = (&mut done).await;
                    break Ok(PipelineOutcome::Cancelled);
                }
                finished = &mut done => {
                    let result = finished
                        .unwrap_or_else(|_| Err(Error::Mux("mux session vanished".to_string())));
                    match result {
                        Ok(()) => break Ok(PipelineOutcome::Ready),
                        Err(e) => break Err(e),
                    }
                }
                changed = stats.changed(), if stats_open => {
                    match changed {
                        Ok(()) => {
                            let out_time_ms = stats.borrow_and_update().out_time_ms;
                            if !published_growing {
                                self.server
                                    .registry()
                                    .publish(published(
                                        source,
                                        quality,
                                        output.clone(),
                                        MediaState::Growing,
                                    ))
                                    .await;
                                self.set_status(|s| s.playable());
                                published_growing = true;
                            }
                            if source.duration_ms > 0 {
                                let percent =
                                    out_time_ms as f64 * 100.0 / source.duration_ms as f64;
                                self.state.update_progress(percent as f32);
                            }
                        }
                        Err(_) => stats_open = false,
                    }
                }
            }
        };

        {
            let mut active = self.active.lock().await;
            if let Some(job) = active.as_mut() {
                job.mux_session = None;
            }
        }

        match result {
            Ok(PipelineOutcome::Ready) => {
                if published_growing {
                    self.server.registry().finalize(&source.id).await;
                } else {
                    self.server
                        .registry()
                        .publish(published(source, quality, output.clone(), MediaState::Finalized))
                        .await;
                }
                let mut manifest = self.manifest.lock().await;
                manifest.record(&source.id, quality, output)?;
                Ok(PipelineOutcome::Ready)
            }
            Ok(PipelineOutcome::Cancelled) => {
                self.server.registry().remove(&source.id).await;
                let _ = tokio::fs::remove_file(&output).await;
                Ok(PipelineOutcome::Cancelled)
            }
            Err(e) => {
                self.server.registry().remove(&source.id).await;
                let _ = tokio::fs::remove_file(&output).await;
                Err(e)
            }
        }
    }

    /// Cooperatively stop all outstanding work and return to Idle
    pub async fn cancel_all(&self) {
        info!("Cancelling all outstanding work");
        self.abort_active().await;
        self.set_status(|s| s.reset());
    }

    /// Remove cached files that do not belong to the current job, and stop
    /// mux sessions the engine no longer tracks
    pub async fn clear_cache(&self) -> Result<()> {
        let current_session = {
            let active = self.active.lock().await;
            active.as_ref().and_then(|job| job.mux_session)
        };
        for session in self.mux.active_sessions().await {
            if current_session != Some(session) {
                info!("Cancelling stray mux session {}", session);
                self.mux.cancel(session).await;
            }
        }

        let mut keep: Vec<PathBuf> = self.server.registry().published_paths().await;
        {
            let manifest = self.manifest.lock().await;
            keep.push(manifest.as_ref().to_path_buf());
        }

        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if keep.contains(&path) {
                continue;
            }
            debug!("Removing cached file {:?}", path);
            let _ = tokio::fs::remove_file(&path).await;
        }

        {
            let mut manifest = self.manifest.lock().await;
            manifest.prune_missing()?;
        }
        self.events.notice(Notice::CacheCleared);
        Ok(())
    }

    async fn abort_active(&self) {
        let previous = {
            let mut active = self.active.lock().await;
            active.take()
        };
        if let Some(job) = previous {
            job.cancel.cancel();
            if let Some(session) = job.mux_session {
                self.mux.cancel(session).await;
            }
            if let Some(id) = job.media_id {
                self.server.registry().remove(&id).await;
            }
        }
    }

    async fn set_media_id(&self, id: &str) {
        let mut active = self.active.lock().await;
        if let Some(job) = active.as_mut() {
            job.media_id = Some(id.to_string());
        }
    }

    fn set_status(&self, apply: impl FnOnce(&VideoJobState)) {
        apply(&self.state);
        self.events
            .emit(EngineEvent::StatusChanged(self.state.status()));
    }
}

fn published(
    source: &VideoSource,
    quality: VideoQuality,
    file_path: PathBuf,
    state: MediaState,
) -> PublishedMedia {
    PublishedMedia {
        id: source.id.clone(),
        file_path,
        title: source.title.clone(),
        uploader: source.uploader.clone(),
        duration_ms: source.duration_ms,
        quality,
        state,
    }
}

/// Pick the best video stream not exceeding the preferred quality (the
/// smallest available one when everything is larger) and the audio stream
/// with the highest bitrate.
fn select_streams(
    source: &VideoSource,
    quality: VideoQuality,
) -> Result<(&StreamVariant, &StreamVariant)> {
    let video = source
        .video_streams
        .iter()
        .filter(|v| v.height.is_none_or(|h| h <= quality.height()))
        .max_by_key(|v| v.height.unwrap_or(0))
        .or_else(|| {
            source
                .video_streams
                .iter()
                .min_by_key(|v| v.height.unwrap_or(u32::MAX))
        })
        .ok_or_else(|| Error::StreamSelection("no video stream available".to_string()))?;

    let audio = source
        .audio_streams
        .iter()
        .max_by_key(|a| a.average_bitrate.unwrap_or(0))
        .ok_or_else(|| Error::StreamSelection("no audio stream available".to_string()))?;

    Ok((video, audio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{MuxSession, MuxStats};
    use crate::resolver::DirectSourceResolver;
    use crate::settings::StaticQualityStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn variant(height: Option<u32>, bitrate: Option<u32>) -> StreamVariant {
        StreamVariant {
            url: "http://example/stream".to_string(),
            mime_type: "video/mp4".to_string(),
            codec: None,
            height,
            average_bitrate: bitrate,
        }
    }

    fn source_with(video: Vec<StreamVariant>, audio: Vec<StreamVariant>) -> VideoSource {
        VideoSource {
            id: "vid1".to_string(),
            title: "A Title".to_string(),
            uploader: "A Channel".to_string(),
            duration_ms: 60_000,
            video_streams: video,
            audio_streams: audio,
        }
    }

    #[test]
    fn selection_respects_quality_ceiling() {
        let source = source_with(
            vec![
                variant(Some(360), None),
                variant(Some(720), None),
                variant(Some(1080), None),
            ],
            vec![variant(None, Some(128_000))],
        );

        let (video, _) = select_streams(&source, VideoQuality::P720).unwrap();
        assert_eq!(video.height, Some(720));
    }

    #[test]
    fn selection_falls_back_to_smallest_above_ceiling() {
        let source = source_with(
            vec![variant(Some(1080), None), variant(Some(2160), None)],
            vec![variant(None, Some(128_000))],
        );

        let (video, _) = select_streams(&source, VideoQuality::P360).unwrap();
        assert_eq!(video.height, Some(1080));
    }

    #[test]
    fn audio_picks_highest_bitrate() {
        let source = source_with(
            vec![variant(Some(720), None)],
            vec![
                variant(None, Some(64_000)),
                variant(None, Some(160_000)),
                variant(None, Some(128_000)),
            ],
        );

        let (_, audio) = select_streams(&source, VideoQuality::P720).unwrap();
        assert_eq!(audio.average_bitrate, Some(160_000));
    }

    #[test]
    fn empty_stream_lists_are_selection_errors() {
        let no_video = source_with(vec![], vec![variant(None, Some(128_000))]);
        assert!(matches!(
            select_streams(&no_video, VideoQuality::P720),
            Err(Error::StreamSelection(_))
        ));

        let no_audio = source_with(vec![variant(Some(720), None)], vec![]);
        assert!(matches!(
            select_streams(&no_audio, VideoQuality::P720),
            Err(Error::StreamSelection(_))
        ));
    }

    struct RejectingMux;

    #[async_trait]
    impl MuxEngine for RejectingMux {
        async fn start(&self, _request: MuxRequest) -> Result<MuxSession> {
            Err(Error::Mux("not expected in this test".to_string()))
        }

        async fn cancel(&self, _session: MuxSessionId) {}

        async fn active_sessions(&self) -> Vec<MuxSessionId> {
            Vec::new()
        }
    }

    fn controller(cache_dir: std::path::PathBuf, source: VideoSource) -> JobController {
        let registry = Arc::new(MediaRegistry::new());
        JobController::new(
            EngineConfig::default(),
            Client::new(),
            cache_dir,
            Arc::new(DirectSourceResolver::new(source)),
            Arc::new(RejectingMux),
            Arc::new(StreamingServer::new(registry, 0)),
            Arc::new(StaticQualityStore::new(VideoQuality::P720)),
            Arc::new(AlwaysConnected),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn cache_hit_publishes_without_downloading() {
        let dir = TempDir::new().unwrap();
        let finalized = dir.path().join("vid1_720p.mp4");
        std::fs::write(&finalized, b"muxed bytes").unwrap();

        // streams are deliberately empty: a hit must short-circuit before
        // stream selection can fail
        let ctl = controller(dir.path().to_path_buf(), source_with(vec![], vec![]));
        {
            let mut manifest = ctl.manifest.lock().await;
            manifest
                .record("vid1", VideoQuality::P720, finalized.clone())
                .unwrap();
        }

        ctl.prepare("http://example/watch?v=vid1").await.unwrap();

        assert_eq!(ctl.state().status(), JobStatus::Ready);
        assert_eq!(ctl.state().progress(), 100.0);
        let entry = ctl.registry().get("vid1").await.unwrap();
        assert_eq!(entry.state, MediaState::Finalized);
        assert_eq!(entry.file_path, finalized);
    }

    #[tokio::test]
    async fn selection_failure_lands_in_error_state() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(dir.path().to_path_buf(), source_with(vec![], vec![]));
        let mut events = ctl.events.subscribe();

        let result = ctl.prepare("http://example/watch?v=vid1").await;

        assert!(matches!(result, Err(Error::StreamSelection(_))));
        assert_eq!(ctl.state().status(), JobStatus::Error);

        // a notice about the failure must reach the side channel
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Notice(Notice::JobFailed(_))) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn cancel_all_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(dir.path().to_path_buf(), source_with(vec![], vec![]));

        ctl.cancel_all().await;
        assert_eq!(ctl.state().status(), JobStatus::Idle);
        assert_eq!(ctl.state().progress(), 0.0);
    }

    #[tokio::test]
    async fn clear_cache_keeps_published_files() {
        let dir = TempDir::new().unwrap();
        let published_file = dir.path().join("vid1_720p.mp4");
        std::fs::write(&published_file, b"keep me").unwrap();
        let stray = dir.path().join("stray.tmp");
        std::fs::write(&stray, b"drop me").unwrap();

        let source = source_with(vec![], vec![]);
        let ctl = controller(dir.path().to_path_buf(), source.clone());
        ctl.registry()
            .publish(published(
                &source,
                VideoQuality::P720,
                published_file.clone(),
                MediaState::Finalized,
            ))
            .await;

        ctl.clear_cache().await.unwrap();

        assert!(published_file.exists());
        assert!(!stray.exists());
    }

    #[test]
    fn mux_stats_percent_math() {
        // 30s of 60s written -> half way
        let stats = MuxStats { out_time_ms: 30_000 };
        let percent = stats.out_time_ms as f64 * 100.0 / 60_000.0;
        assert_eq!(percent as f32, 50.0);
    }
}

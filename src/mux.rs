use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of one running mux session
pub type MuxSessionId = Uuid;

/// What to mux: elementary stream inputs and the container output path
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub video_input: PathBuf,
    pub audio_input: PathBuf,
    pub output: PathBuf,
    /// Expected media duration, used by callers to turn time-position
    /// statistics into a percentage
    pub duration_ms: u64,
}

/// Periodic statistics emitted while a session runs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MuxStats {
    /// Position of the last written output frame, in milliseconds
    pub out_time_ms: u64,
}

/// Handle to one running mux session
pub struct MuxSession {
    pub id: MuxSessionId,
    /// Latest statistics; updated for as long as the session runs
    pub stats: watch::Receiver<MuxStats>,
    /// Resolves when the session finishes
    pub done: oneshot::Receiver<Result<()>>,
}

/// External muxing seam. The engine only relies on this contract: start a
/// session, watch its statistics, cancel it by id, enumerate what runs.
#[async_trait]
pub trait MuxEngine: Send + Sync {
    async fn start(&self, request: MuxRequest) -> Result<MuxSession>;

    /// Ask a running session to stop; unknown ids are ignored
    async fn cancel(&self, session: MuxSessionId);

    async fn active_sessions(&self) -> Vec<MuxSessionId>;
}

/// Mux engine backed by an ffmpeg child process. Copies the video stream,
/// re-encodes audio to AAC and writes a fragmented MP4 that is playable
/// while it grows.
pub struct FfmpegMuxEngine {
    ffmpeg_path: PathBuf,
    running: Arc<Mutex<HashMap<MuxSessionId, oneshot::Sender<()>>>>,
}

impl FfmpegMuxEngine {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for FfmpegMuxEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Parse one `key=value` line of ffmpeg progress output into milliseconds.
/// ffmpeg reports both `out_time_us` and (misleadingly named)
/// `out_time_ms` in microseconds.
fn parse_progress_line(line: &str) -> Option<u64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => {
            let micros: i64 = value.trim().parse().ok()?;
            Some((micros.max(0) as u64) / 1000)
        }
        _ => None,
    }
}

#[async_trait]
impl MuxEngine for FfmpegMuxEngine {
    async fn start(&self, request: MuxRequest) -> Result<MuxSession> {
        let id = Uuid::new_v4();
        info!("Starting mux session {} -> {:?}", id, request.output);

        let mut child = tokio::process::Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(&request.video_input)
            .arg("-i")
            .arg(&request.audio_input)
            .args(["-c:v", "copy", "-c:a", "aac"])
            .args(["-movflags", "+frag_keyframe+empty_moov+default_base_moof"])
            .arg("-shortest")
            .args(["-progress", "pipe:1", "-nostats"])
            .args(["-loglevel", "error"])
            .arg("-y")
            .arg(&request.output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Mux(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Mux("ffmpeg stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Mux("ffmpeg stderr not captured".to_string()))?;

        let (stats_tx, stats_rx) = watch::channel(MuxStats::default());
        let (done_tx, done_rx) = oneshot::channel();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        {
            let mut running = self.running.lock().await;
            running.insert(id, kill_tx);
        }

        // statistics pump
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(out_time_ms) = parse_progress_line(&line) {
                    stats_tx.send_replace(MuxStats { out_time_ms });
                }
            }
        });

        // stderr drain, keeping the last line for the failure message
        let (err_tx, err_rx) = oneshot::channel::<String>();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("ffmpeg[{}]: {}", id, line);
                tail = line;
            }
            let _ = err_tx.send(tail);
        });

        // completion watcher; owns the child so cancel never blocks on it
        let running = self.running.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        info!("Mux session {} completed", id);
                        Ok(())
                    }
                    Ok(status) => {
                        let tail = err_rx.await.unwrap_or_default();
                        error!("Mux session {} failed: {} ({})", id, status, tail);
                        Err(Error::Mux(format!("ffmpeg exited with {}: {}", status, tail)))
                    }
                    Err(e) => Err(Error::Mux(format!("failed to await ffmpeg: {}", e))),
                },
                _ = &mut kill_rx => {
                    warn!("Mux session {} cancelled", id);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    let _ = tokio::fs::remove_file(&request.output).await;
                    Err(Error::Mux("session cancelled".to_string()))
                }
            };

            let mut guard = running.lock().await;
            guard.remove(&id);
            drop(guard);
            let _ = done_tx.send(result);
        });

        Ok(MuxSession {
            id,
            stats: stats_rx,
            done: done_rx,
        })
    }

    async fn cancel(&self, session: MuxSessionId) {
        let mut running = self.running.lock().await;
        if let Some(kill) = running.remove(&session) {
            let _ = kill.send(());
        }
    }

    async fn active_sessions(&self) -> Vec<MuxSessionId> {
        let running = self.running.lock().await;
        running.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines_normalize_to_millis() {
        assert_eq!(parse_progress_line("out_time_us=1500000"), Some(1500));
        assert_eq!(parse_progress_line("out_time_ms=1500000"), Some(1500));
        assert_eq!(parse_progress_line("out_time_us=-42"), Some(0));
        assert_eq!(parse_progress_line("frame=42"), None);
        assert_eq!(parse_progress_line("progress=continue"), None);
        assert_eq!(parse_progress_line("garbage"), None);
    }

    #[tokio::test]
    async fn cancel_of_unknown_session_is_a_noop() {
        let engine = FfmpegMuxEngine::default();
        engine.cancel(Uuid::new_v4()).await;
        assert!(engine.active_sessions().await.is_empty());
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::debug;

/// Quality ladder offered to the user. Width/height bound the stream
/// selection; the DLNA profile name goes into content-feature headers and
/// DIDL metadata for the published file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    P360,
    P480,
    P720,
    P1080,
    P1440,
    P2160,
}

impl VideoQuality {
    pub fn title(&self) -> &'static str {
        match self {
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P1440 => "1440p",
            Self::P2160 => "2160p",
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::P360 => 640,
            Self::P480 => 854,
            Self::P720 => 1280,
            Self::P1080 => 1920,
            Self::P1440 => 2560,
            Self::P2160 => 3840,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::P360 => 360,
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
            Self::P1440 => 1440,
            Self::P2160 => 2160,
        }
    }

    /// DLNA media profile advertised for MP4 output at this quality
    pub fn dlna_profile(&self) -> &'static str {
        match self {
            Self::P360 | Self::P480 => "AVC_MP4_MP_SD_AAC_MULT5",
            Self::P720 => "AVC_MP4_MP_HD_720p_AAC",
            Self::P1080 | Self::P1440 | Self::P2160 => "AVC_MP4_MP_HD_1080i_AAC",
        }
    }
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self::P720
    }
}

/// Persisted quality preference. The engine reads the current value and
/// observes changes; storage itself lives outside the core.
#[async_trait]
pub trait QualityStore: Send + Sync {
    async fn current(&self) -> VideoQuality;

    /// Change notifications; the receiver always holds the latest value
    fn subscribe(&self) -> watch::Receiver<VideoQuality>;

    async fn set(&self, quality: VideoQuality) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct SettingsFile {
    #[serde(default)]
    video_quality: VideoQuality,
}

/// TOML-file-backed preference store
pub struct FileQualityStore {
    path: PathBuf,
    tx: watch::Sender<VideoQuality>,
}

impl FileQualityStore {
    /// Open the store, reading any previously saved preference
    pub fn open(path: PathBuf) -> Self {
        let initial = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| toml::from_str::<SettingsFile>(&s).ok())
            .map(|f| f.video_quality)
            .unwrap_or_default();
        debug!("Quality preference loaded: {}", initial.title());
        let (tx, _) = watch::channel(initial);
        Self { path, tx }
    }
}

#[async_trait]
impl QualityStore for FileQualityStore {
    async fn current(&self) -> VideoQuality {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<VideoQuality> {
        self.tx.subscribe()
    }

    async fn set(&self, quality: VideoQuality) -> Result<()> {
        let contents = toml::to_string(&SettingsFile {
            video_quality: quality,
        })
        .context("Failed to serialize settings")?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&self.path, contents)
            .await
            .with_context(|| format!("Failed to write settings to {:?}", self.path))?;
        self.tx.send_replace(quality);
        Ok(())
    }
}

/// Fixed in-memory preference, used by tests and the CLI driver
pub struct StaticQualityStore {
    tx: watch::Sender<VideoQuality>,
}

impl StaticQualityStore {
    pub fn new(quality: VideoQuality) -> Self {
        let (tx, _) = watch::channel(quality);
        Self { tx }
    }
}

#[async_trait]
impl QualityStore for StaticQualityStore {
    async fn current(&self) -> VideoQuality {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<VideoQuality> {
        self.tx.subscribe()
    }

    async fn set(&self, quality: VideoQuality) -> Result<()> {
        self.tx.send_replace(quality);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn profile_mapping() {
        assert_eq!(VideoQuality::P480.dlna_profile(), "AVC_MP4_MP_SD_AAC_MULT5");
        assert_eq!(VideoQuality::P720.dlna_profile(), "AVC_MP4_MP_HD_720p_AAC");
        assert_eq!(
            VideoQuality::P2160.dlna_profile(),
            "AVC_MP4_MP_HD_1080i_AAC"
        );
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");

        let store = FileQualityStore::open(path.clone());
        assert_eq!(store.current().await, VideoQuality::P720);

        store.set(VideoQuality::P1080).await.unwrap();
        assert_eq!(store.current().await, VideoQuality::P1080);

        // A fresh store sees the persisted value
        let reopened = FileQualityStore::open(path);
        assert_eq!(reopened.current().await, VideoQuality::P1080);
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let store = StaticQualityStore::new(VideoQuality::P720);
        let mut rx = store.subscribe();

        store.set(VideoQuality::P360).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), VideoQuality::P360);
    }
}

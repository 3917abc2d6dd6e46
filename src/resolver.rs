use async_trait::async_trait;

use crate::error::Result;

/// One fetchable elementary stream offered by the source site
#[derive(Debug, Clone)]
pub struct StreamVariant {
    /// Direct content URL, fetchable with plain ranged GETs
    pub url: String,
    pub mime_type: String,
    pub codec: Option<String>,
    /// Vertical resolution for video-only variants
    pub height: Option<u32>,
    /// Average bitrate in bits/s for audio-only variants
    pub average_bitrate: Option<u32>,
}

/// Everything the engine needs to know about a resolved page
#[derive(Debug, Clone)]
pub struct VideoSource {
    /// Stable id of the video, also used as the published media id
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_ms: u64,
    pub video_streams: Vec<StreamVariant>,
    pub audio_streams: Vec<StreamVariant>,
}

/// Page-extraction seam. Implementations turn a shared page URL into raw
/// stream URLs plus metadata; the engine selects among them but never
/// parses the page itself.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, page_url: &str) -> Result<VideoSource>;
}

/// Resolver for already-known direct stream URLs. Useful for testing the
/// pipeline and for callers that did their own extraction.
pub struct DirectSourceResolver {
    source: VideoSource,
}

impl DirectSourceResolver {
    pub fn new(source: VideoSource) -> Self {
        Self { source }
    }

    /// Build a single-variant source from one video and one audio URL
    pub fn from_urls(
        id: impl Into<String>,
        title: impl Into<String>,
        video_url: impl Into<String>,
        audio_url: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::new(VideoSource {
            id: id.into(),
            title: title.into(),
            uploader: "unknown".to_string(),
            duration_ms,
            video_streams: vec![StreamVariant {
                url: video_url.into(),
                mime_type: "video/mp4".to_string(),
                codec: None,
                height: None,
                average_bitrate: None,
            }],
            audio_streams: vec![StreamVariant {
                url: audio_url.into(),
                mime_type: "audio/mp4".to_string(),
                codec: None,
                height: None,
                average_bitrate: None,
            }],
        })
    }
}

#[async_trait]
impl SourceResolver for DirectSourceResolver {
    async fn resolve(&self, _page_url: &str) -> Result<VideoSource> {
        Ok(self.source.clone())
    }
}

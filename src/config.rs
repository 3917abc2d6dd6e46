use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Per-track download budget: how many parallel range requests a single
/// remote resource may be split into, and how small a chunk is allowed to get.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackBudget {
    /// Maximum number of concurrent range fetches
    pub max_threads: u32,

    /// Minimum chunk size in bytes; the planner shrinks the thread count
    /// until each chunk is at least this large
    pub min_chunk_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Budget for the video track (the heavy stream)
    #[serde(default = "default_video_budget")]
    pub video: TrackBudget,

    /// Budget for the audio track
    #[serde(default = "default_audio_budget")]
    pub audio: TrackBudget,

    /// HTTP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// HTTP read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Overall wall-clock budget for one discovery session in milliseconds
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,

    /// Per-receive timeout inside the discovery loop in milliseconds
    #[serde(default = "default_receive_timeout")]
    pub discovery_receive_timeout_ms: u64,

    /// How often each M-SEARCH datagram is repeated
    #[serde(default = "default_search_repeat")]
    pub search_repeat: u32,

    /// Delay between repeated M-SEARCH sends in milliseconds
    #[serde(default = "default_search_gap")]
    pub search_gap_ms: u64,

    /// Port for the streaming server; 0 picks an ephemeral port
    #[serde(default)]
    pub server_port: u16,

    /// Directory for downloaded and muxed files; platform default when unset
    #[serde(default)]
    pub cache_directory: Option<PathBuf>,

    /// Aggregate progress reporting interval in milliseconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Connectivity poll interval while a job is active, in milliseconds
    #[serde(default = "default_connectivity_poll")]
    pub connectivity_poll_ms: u64,
}

fn default_video_budget() -> TrackBudget {
    TrackBudget {
        max_threads: 24,
        min_chunk_bytes: 10 * 1024 * 1024,
    }
}

fn default_audio_budget() -> TrackBudget {
    TrackBudget {
        max_threads: 8,
        min_chunk_bytes: 4 * 1024 * 1024,
    }
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_read_timeout() -> u64 {
    15
}

fn default_discovery_timeout() -> u64 {
    5000
}

fn default_receive_timeout() -> u64 {
    1000
}

fn default_search_repeat() -> u32 {
    3
}

fn default_search_gap() -> u64 {
    300
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_connectivity_poll() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video: default_video_budget(),
            audio: default_audio_budget(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            discovery_timeout_ms: default_discovery_timeout(),
            discovery_receive_timeout_ms: default_receive_timeout(),
            search_repeat: default_search_repeat(),
            search_gap_ms: default_search_gap(),
            server_port: 0,
            cache_directory: None,
            progress_interval_ms: default_progress_interval(),
            connectivity_poll_ms: default_connectivity_poll(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields
    pub fn load(path: &std::path::Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path if it exists, otherwise return defaults
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                info!("Using default config ({})", e);
                Self::default()
            }
        }
    }

    /// Get the cache directory path, using a platform default if not set
    pub fn cache_directory(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_directory {
            Ok(dir.clone())
        } else {
            let cache_dir =
                dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Failed to get cache directory"))?;
            Ok(cache_dir.join("playdlna").join("media"))
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.video.max_threads == 0 || self.audio.max_threads == 0 {
            return Err(anyhow::anyhow!("max_threads must be greater than 0"));
        }

        if self.video.min_chunk_bytes == 0 || self.audio.min_chunk_bytes == 0 {
            return Err(anyhow::anyhow!("min_chunk_bytes must be greater than 0"));
        }

        if self.discovery_timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "discovery_timeout_ms must be greater than 0"
            ));
        }

        if self.search_repeat == 0 {
            return Err(anyhow::anyhow!("search_repeat must be greater than 0"));
        }

        if self.progress_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "progress_interval_ms must be greater than 0"
            ));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Build the shared HTTP client used by downloads, discovery fetches and
    /// control calls
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .read_timeout(self.read_timeout())
            .build()
            .context("Failed to build HTTP client")
    }
}

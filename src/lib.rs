// Engine crate for sharing web videos to DLNA renderers: parallel ranged
// downloads, SSDP discovery, a range-capable streaming server and the job
// pipeline tying them together. The CLI driver lives in src/main.rs.

pub mod config;
pub mod constants;
pub mod control;
pub mod discovery;
pub mod download;
pub mod error;
pub mod events;
pub mod job;
pub mod mux;
pub mod resolver;
pub mod server;
pub mod settings;

pub use config::EngineConfig;
pub use control::RemoteControlClient;
pub use discovery::{DiscoveryClient, DiscoveryOptions, DlnaDeviceDescription};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus, Notice};
pub use job::{JobController, JobStatus, VideoJobState};
pub use mux::{FfmpegMuxEngine, MuxEngine};
pub use resolver::{SourceResolver, VideoSource};
pub use server::{MediaRegistry, PublishedMedia, StreamingServer};
pub use settings::{QualityStore, VideoQuality};

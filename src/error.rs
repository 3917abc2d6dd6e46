//! Error types for the playdlna engine.
//!
//! Errors are categorized by the phase of the pipeline that produced them so
//! callers can distinguish, say, a renderer rejecting a SOAP command from the
//! multicast socket being unavailable.

use thiserror::Error;

/// Result type alias using the engine error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Connection failure, timeout, or non-success status during an HTTP fetch
    #[error("network error: {0}")]
    Network(String),

    /// The source resolver could not extract the shared page
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    /// No suitable video or audio track was found for the requested quality
    #[error("no suitable stream: {0}")]
    StreamSelection(String),

    /// A chunk or track download failed and aborted the whole operation
    #[error("download failed: {0}")]
    Download(String),

    /// The external mux engine reported failure
    #[error("mux failed: {0}")]
    Mux(String),

    /// Multicast search could not be performed on this network
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// A renderer control command was rejected
    #[error("{action} rejected with status {status}")]
    Playback { action: String, status: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a reqwest transport error as a network error
    pub fn network(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

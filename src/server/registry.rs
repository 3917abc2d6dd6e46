use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::settings::VideoQuality;

/// Whether a published file is still being written by the mux engine or
/// has reached its final length. Serving behavior branches on this tag,
/// never on file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    /// Mux in progress; the file grows while it is served
    Growing,
    /// Final length reached; range requests are honored
    Finalized,
}

/// One servable media entry, looked up by id at request time
#[derive(Debug, Clone)]
pub struct PublishedMedia {
    pub id: String,
    pub file_path: PathBuf,
    pub title: String,
    pub uploader: String,
    pub duration_ms: u64,
    pub quality: VideoQuality,
    pub state: MediaState,
}

/// Registry mapping media ids to published entries. Publishing replaces
/// any previous entry for the id wholesale; readers work from the snapshot
/// they took at request start, so a concurrent republish never corrupts an
/// in-flight response.
#[derive(Debug, Default)]
pub struct MediaRegistry {
    entries: RwLock<HashMap<String, PublishedMedia>>,
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or atomically replace the entry for `media.id`
    pub async fn publish(&self, media: PublishedMedia) {
        info!(
            "Publishing {} ({:?}, {:?})",
            media.id, media.state, media.file_path
        );
        let mut entries = self.entries.write().await;
        entries.insert(media.id.clone(), media);
    }

    /// Flip an entry to Finalized; returns false for unknown ids
    pub async fn finalize(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                debug!("Finalizing {}", id);
                entry.state = MediaState::Finalized;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<PublishedMedia> {
        let entries = self.entries.read().await;
        entries.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<PublishedMedia> {
        let mut entries = self.entries.write().await;
        entries.remove(id)
    }

    /// Paths of all currently published files
    pub async fn published_paths(&self) -> Vec<PathBuf> {
        let entries = self.entries.read().await;
        entries.values().map(|e| e.file_path.clone()).collect()
    }
}

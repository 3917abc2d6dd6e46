use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::settings::VideoQuality;

/// One finalized mux output the engine may reuse instead of re-downloading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub file_path: PathBuf,
    pub quality: VideoQuality,
    pub created_at: DateTime<Utc>,
}

/// Persistent index of finalized files in the cache directory, keyed by
/// source id and quality profile. Replaces directory scanning: a cache hit
/// exists iff the manifest has a matching entry whose file is still on
/// disk.
#[derive(Debug)]
pub struct CacheManifest {
    path: PathBuf,
    entries: HashMap<String, ManifestEntry>,
}

fn key(id: &str, quality: VideoQuality) -> String {
    format!("{}|{}", id, quality.title())
}

impl CacheManifest {
    /// Load the manifest at `path`, starting empty if absent or unreadable
    pub fn load(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        Self { path, entries }
    }

    /// Finalized file for this id and quality, if it still exists on disk.
    /// Entries whose file has vanished are dropped on the spot.
    pub fn lookup(&mut self, id: &str, quality: VideoQuality) -> Option<PathBuf> {
        let k = key(id, quality);
        match self.entries.get(&k) {
            Some(entry) if entry.file_path.exists() => {
                debug!("Cache hit for {} at {:?}", k, entry.file_path);
                Some(entry.file_path.clone())
            }
            Some(_) => {
                warn!("Manifest entry {} points at a missing file, dropping", k);
                self.entries.remove(&k);
                let _ = self.save();
                None
            }
            None => None,
        }
    }

    /// Record a newly finalized file and persist the manifest
    pub fn record(&mut self, id: &str, quality: VideoQuality, file_path: PathBuf) -> Result<()> {
        self.entries.insert(
            key(id, quality),
            ManifestEntry {
                id: id.to_string(),
                file_path,
                quality,
                created_at: Utc::now(),
            },
        );
        self.save()
    }

    /// Drop entries whose files no longer exist and persist
    pub fn prune_missing(&mut self) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.file_path.exists());
        if self.entries.len() != before {
            self.save()?;
        }
        Ok(())
    }

    /// Paths of all recorded files for the given id
    pub fn paths_for_id(&self, id: &str) -> Vec<PathBuf> {
        self.entries
            .values()
            .filter(|e| e.id == id)
            .map(|e| e.file_path.clone())
            .collect()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl AsRef<Path> for CacheManifest {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_and_lookup_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("vid1_720p.mp4");
        std::fs::write(&file, b"data").unwrap();

        let manifest_path = dir.path().join("manifest.json");
        let mut manifest = CacheManifest::load(manifest_path.clone());
        manifest
            .record("vid1", VideoQuality::P720, file.clone())
            .unwrap();

        assert_eq!(manifest.lookup("vid1", VideoQuality::P720), Some(file));
        assert_eq!(manifest.lookup("vid1", VideoQuality::P360), None);
        assert_eq!(manifest.lookup("other", VideoQuality::P720), None);

        // persisted state is visible to a fresh load
        let mut reloaded = CacheManifest::load(manifest_path);
        assert!(reloaded.lookup("vid1", VideoQuality::P720).is_some());
    }

    #[test]
    fn missing_file_invalidates_entry() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("vid1_720p.mp4");
        std::fs::write(&file, b"data").unwrap();

        let mut manifest = CacheManifest::load(dir.path().join("manifest.json"));
        manifest
            .record("vid1", VideoQuality::P720, file.clone())
            .unwrap();

        std::fs::remove_file(&file).unwrap();
        assert_eq!(manifest.lookup("vid1", VideoQuality::P720), None);
        // the stale entry is gone for good
        std::fs::write(&file, b"data").unwrap();
        assert_eq!(manifest.lookup("vid1", VideoQuality::P720), None);
    }

    #[test]
    fn prune_drops_only_stale_entries() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.mp4");
        std::fs::write(&kept, b"data").unwrap();

        let mut manifest = CacheManifest::load(dir.path().join("manifest.json"));
        manifest
            .record("kept", VideoQuality::P720, kept.clone())
            .unwrap();
        manifest
            .record("gone", VideoQuality::P720, dir.path().join("gone.mp4"))
            .unwrap();

        manifest.prune_missing().unwrap();
        assert!(manifest.lookup("kept", VideoQuality::P720).is_some());
        assert!(manifest.lookup("gone", VideoQuality::P720).is_none());
    }
}

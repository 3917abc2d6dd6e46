// Behavior of the streaming server over a real bound port: registry misses,
// full serves with DLNA headers, range serves, and growing files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use playdlna::server::{MediaRegistry, MediaState, PublishedMedia, StreamingServer};
use playdlna::settings::VideoQuality;

fn media(id: &str, path: PathBuf, state: MediaState) -> PublishedMedia {
    PublishedMedia {
        id: id.to_string(),
        file_path: path,
        title: "A Title".to_string(),
        uploader: "A Channel".to_string(),
        duration_ms: 60_000,
        quality: VideoQuality::P720,
        state,
    }
}

async fn start_server() -> (Arc<MediaRegistry>, String) {
    let registry = Arc::new(MediaRegistry::new());
    let server = Arc::new(StreamingServer::new(registry.clone(), 0));
    let addr = server.start().await.unwrap();
    (registry, format!("http://127.0.0.1:{}", addr.port()))
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let (_registry, base) = start_server().await;

    let response = reqwest::get(format!("{}/nope", base)).await.unwrap();
    assert_eq!(response.status(), 404);
    let body = response.text().await.unwrap();
    assert!(body.contains("nope"));
    assert!(body.contains("not found"));
}

#[tokio::test]
async fn finalized_file_serves_whole_with_dlna_headers() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    let path = dir.path().join("vid1.mp4");
    std::fs::write(&path, &payload).unwrap();

    let (registry, base) = start_server().await;
    registry
        .publish(media("vid1", path, MediaState::Finalized))
        .await;

    let response = reqwest::get(format!("{}/vid1", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok()),
        Some("bytes")
    );
    let features = response
        .headers()
        .get("contentFeatures.dlna.org")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(features.contains("DLNA.ORG_PN=AVC_MP4_MP_HD_720p_AAC"));
    assert!(features.contains("DLNA.ORG_OP=11"));
    assert!(features.contains("DLNA.ORG_FLAGS=01700000000000000000000000000000"));
    assert_eq!(
        response
            .headers()
            .get("transferMode.dlna.org")
            .and_then(|v| v.to_str().ok()),
        Some("Streaming")
    );

    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn range_request_returns_exact_slice() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    let path = dir.path().join("vid1.mp4");
    std::fs::write(&path, &payload).unwrap();

    let (registry, base) = start_server().await;
    registry
        .publish(media("vid1", path, MediaState::Finalized))
        .await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/vid1", base))
        .header("Range", "bytes=100-199")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 206);
    assert_eq!(
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok()),
        Some("bytes 100-199/1000")
    );
    assert_eq!(
        response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
        Some("100")
    );

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 100);
    assert_eq!(body.as_ref(), &payload[100..200]);
}

#[tokio::test]
async fn republish_replaces_served_content() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.mp4");
    std::fs::write(&first, b"first version").unwrap();
    let second = dir.path().join("second.mp4");
    std::fs::write(&second, b"second version").unwrap();

    let (registry, base) = start_server().await;
    registry
        .publish(media("vid1", first, MediaState::Finalized))
        .await;
    registry
        .publish(media("vid1", second, MediaState::Finalized))
        .await;

    let body = reqwest::get(format!("{}/vid1", base))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), b"second version");
}

#[tokio::test]
async fn growing_file_streams_until_finalized() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vid1.mp4");
    std::fs::write(&path, b"first half ").unwrap();

    let (registry, base) = start_server().await;
    registry
        .publish(media("vid1", path.clone(), MediaState::Growing))
        .await;

    // grow the file while the response is in flight, then finalize
    let writer_registry = registry.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"second half").await.unwrap();
        file.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        writer_registry.finalize("vid1").await;
    });

    let response = reqwest::get(format!("{}/vid1", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok()),
        Some("bytes")
    );

    let body = response.bytes().await.unwrap();
    writer.await.unwrap();
    assert_eq!(body.as_ref(), b"first half second half");
}

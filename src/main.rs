use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use playdlna::config::EngineConfig;
use playdlna::control::{RemoteControlClient, didl_metadata};
use playdlna::discovery::{DiscoveryClient, DiscoveryOptions};
use playdlna::events::{EngineEvent, EventBus};
use playdlna::job::{JobController, LanRouteProbe};
use playdlna::mux::FfmpegMuxEngine;
use playdlna::resolver::DirectSourceResolver;
use playdlna::server::{MediaRegistry, StreamingServer};
use playdlna::settings::FileQualityStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playdlna=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (video_url, audio_url) = match (args.next(), args.next()) {
        (Some(v), Some(a)) => (v, a),
        _ => {
            eprintln!("usage: playdlna <video-stream-url> <audio-stream-url> [title]");
            std::process::exit(2);
        }
    };
    let title = args.next().unwrap_or_else(|| "Shared video".to_string());

    info!("Starting playdlna");

    let config_dir = dirs::config_dir()
        .context("No config directory available")?
        .join("playdlna");
    let config = EngineConfig::load_or_default(&config_dir.join("config.toml"));
    config.validate().context("Invalid configuration")?;

    let cache_dir = config.cache_directory()?;
    tokio::fs::create_dir_all(&cache_dir)
        .await
        .with_context(|| format!("Failed to create cache directory {:?}", cache_dir))?;

    let client = config.http_client()?;
    let registry = Arc::new(MediaRegistry::new());
    let server = Arc::new(StreamingServer::new(registry, config.server_port));
    server.start().await?;

    let events = EventBus::default();
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                EngineEvent::Notice(notice) => info!("Notice: {:?}", notice),
                EngineEvent::StatusChanged(status) => info!("Job status: {:?}", status),
            }
        }
    });

    let media_id = uuid::Uuid::new_v4().to_string();
    let resolver = Arc::new(DirectSourceResolver::from_urls(
        media_id.clone(),
        title,
        video_url,
        audio_url,
        0,
    ));
    let quality = Arc::new(FileQualityStore::open(config_dir.join("settings.toml")));

    let controller = Arc::new(JobController::new(
        config.clone(),
        client.clone(),
        cache_dir,
        resolver,
        Arc::new(FfmpegMuxEngine::default()),
        server.clone(),
        quality,
        Arc::new(LanRouteProbe),
        events.clone(),
    ));

    // discovery runs while the video is prepared
    let discovery = DiscoveryClient::new(
        client.clone(),
        DiscoveryOptions {
            timeout: config.discovery_timeout(),
            receive_timeout: std::time::Duration::from_millis(config.discovery_receive_timeout_ms),
            search_repeat: config.search_repeat,
            search_gap: std::time::Duration::from_millis(config.search_gap_ms),
        },
    );
    let discovery_task = tokio::spawn(async move { discovery.discover_renderers().await });

    controller.prepare("shared://direct").await?;

    let media = controller
        .registry()
        .get(&media_id)
        .await
        .context("Prepared media vanished from the registry")?;
    let media_url = server
        .media_url(&media_id)
        .context("No LAN address to publish under")?;
    info!("Serving \"{}\" at {}", media.title, media_url);

    let renderers = match discovery_task.await? {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Discovery failed: {}", e);
            Vec::new()
        }
    };

    let Some(target) = renderers.iter().find(|d| d.is_playable()) else {
        info!("No playable renderer found; open {} manually", media_url);
        return Ok(());
    };

    info!(
        "Playing on {} ({}) @ {}",
        target.friendly_name, target.model_name, target.location
    );
    let control_url = target
        .av_transport_url
        .as_deref()
        .context("Renderer lost its control URL")?;
    let remote = RemoteControlClient::new(client);
    if let Err(e) = remote
        .play(control_url, &media_url, &didl_metadata(&media, &media_url))
        .await
    {
        error!("Playback command failed: {}", e);
        return Err(e.into());
    }

    info!("Playback started; serving until interrupted (ctrl-c to stop)");
    tokio::signal::ctrl_c().await?;
    server.shutdown();
    Ok(())
}

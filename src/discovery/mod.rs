pub mod description;
pub mod ssdp;

pub use description::DlnaDeviceDescription;
pub use ssdp::SsdpReply;

use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::constants::{SSDP_MULTICAST_ADDR, SSDP_PORT, SSDP_SEARCH_TARGETS};
use crate::error::{Error, Result};

/// Where a discovery session currently is. Tracked for logging and
/// introspection; the session always runs the phases in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    Idle,
    /// M-SEARCH datagrams are going out
    Searching,
    /// Listening for replies and fetching descriptions
    Collecting,
    Done,
}

/// Tuning knobs for one discovery session
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Total wall-clock listen window
    pub timeout: Duration,
    /// Per-receive timeout inside the listen loop
    pub receive_timeout: Duration,
    /// How often each search datagram is repeated
    pub search_repeat: u32,
    /// Gap between repeated sends
    pub search_gap: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            receive_timeout: Duration::from_millis(1000),
            search_repeat: 3,
            search_gap: Duration::from_millis(300),
        }
    }
}

/// SSDP discovery client: multicasts search requests, deduplicates replies
/// by location and resolves each unique location into a device description.
pub struct DiscoveryClient {
    client: Client,
    options: DiscoveryOptions,
}

impl DiscoveryClient {
    pub fn new(client: Client, options: DiscoveryOptions) -> Self {
        Self { client, options }
    }

    /// Run one discovery session.
    ///
    /// Returns descriptions for every distinct device that answered and
    /// produced a parseable description document. Broken replies and
    /// unreachable descriptions are dropped; only a failure to search at
    /// all (no multicast-capable network) is an error.
    pub async fn discover(&self) -> Result<Vec<DlnaDeviceDescription>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Discovery(format!("multicast unavailable: {}", e)))?;

        debug!("Discovery phase: {:?}", DiscoveryPhase::Searching);
        self.send_search_requests(&socket).await?;

        debug!("Discovery phase: {:?}", DiscoveryPhase::Collecting);
        let devices = self.collect_replies(&socket).await;

        debug!("Discovery phase: {:?}", DiscoveryPhase::Done);
        for device in &devices {
            info!(
                "Found {} ({}, {}) @ {}",
                device.friendly_name, device.model_name, device.device_type, device.location
            );
        }
        Ok(devices)
    }

    /// Convenience wrapper returning only devices that can play media
    pub async fn discover_renderers(&self) -> Result<Vec<DlnaDeviceDescription>> {
        let devices = self.discover().await?;
        Ok(devices
            .into_iter()
            .filter(|d| d.is_media_renderer())
            .collect())
    }

    async fn send_search_requests(&self, socket: &UdpSocket) -> Result<()> {
        let target = (SSDP_MULTICAST_ADDR, SSDP_PORT);
        for st in SSDP_SEARCH_TARGETS {
            let request = ssdp::build_search_request(st);
            for _ in 0..self.options.search_repeat {
                socket
                    .send_to(request.as_bytes(), target)
                    .await
                    .map_err(|e| Error::Discovery(format!("search send failed: {}", e)))?;
                tokio::time::sleep(self.options.search_gap).await;
            }
        }
        Ok(())
    }

    async fn collect_replies(&self, socket: &UdpSocket) -> Vec<DlnaDeviceDescription> {
        let deadline = tokio::time::Instant::now() + self.options.timeout;
        let mut seen_locations: HashSet<String> = HashSet::new();
        let mut fetches: JoinSet<Option<DlnaDeviceDescription>> = JoinSet::new();
        let mut buf = [0u8; 2048];

        while tokio::time::Instant::now() < deadline {
            let received =
                tokio::time::timeout(self.options.receive_timeout, socket.recv_from(&mut buf))
                    .await;
            let (len, peer) = match received {
                Err(_) => continue, // no packet yet, keep listening
                Ok(Err(e)) => {
                    warn!("Discovery receive error: {}", e);
                    continue;
                }
                Ok(Ok(packet)) => packet,
            };

            let response = String::from_utf8_lossy(&buf[..len]);
            let Some(reply) = ssdp::parse_reply(&response) else {
                debug!("Skipping malformed reply from {}", peer);
                continue;
            };

            // one description fetch per unique location
            if seen_locations.insert(reply.location.clone()) {
                debug!("New location {} (st: {})", reply.location, reply.search_target);
                let client = self.client.clone();
                fetches
                    .spawn(async move { description::fetch_device_description(&client, reply).await });
            }
        }

        let mut devices = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(Some(device)) => devices.push(device),
                Ok(None) => {}
                Err(e) => warn!("Description fetch task failed: {}", e),
            }
        }
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_location_triggers_one_fetch() {
        // Two replies sharing a location but differing in search target
        // must collapse to a single pending fetch.
        let first = ssdp::parse_reply(
            "HTTP/1.1 200 OK\r\nUSN: uuid:a\r\nST: upnp:rootdevice\r\nLOCATION: http://x/d.xml\r\n\r\n",
        )
        .unwrap();
        let second = ssdp::parse_reply(
            "HTTP/1.1 200 OK\r\nUSN: uuid:a\r\nST: ssdp:all\r\nLOCATION: http://x/d.xml\r\n\r\n",
        )
        .unwrap();

        let mut seen = HashSet::new();
        let mut fetch_count = 0;
        for reply in [first, second] {
            if seen.insert(reply.location.clone()) {
                fetch_count += 1;
            }
        }
        assert_eq!(fetch_count, 1);
    }

    #[tokio::test]
    async fn options_default_match_protocol_expectations() {
        let options = DiscoveryOptions::default();
        assert_eq!(options.search_repeat, 3);
        assert_eq!(options.timeout, Duration::from_millis(5000));
    }
}

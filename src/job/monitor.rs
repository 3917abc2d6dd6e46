use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Network-attachment probe. The engine only asks "are we still on a
/// usable network"; what that means is up to the implementation.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Probe that checks whether a route towards the SSDP multicast group
/// exists. Loses connectivity exactly when the device leaves the LAN.
pub struct LanRouteProbe;

#[async_trait]
impl ConnectivityProbe for LanRouteProbe {
    async fn is_connected(&self) -> bool {
        crate::server::local_ip().is_some_and(|ip| !ip.is_loopback())
    }
}

/// Probe that never reports loss; for tests and wired setups
pub struct AlwaysConnected;

#[async_trait]
impl ConnectivityProbe for AlwaysConnected {
    async fn is_connected(&self) -> bool {
        true
    }
}

/// Poll the probe while a job runs. On loss the callback fires once and
/// the job token is cancelled, which tears down downloads, mux sessions
/// and the monitor itself.
pub fn spawn_monitor(
    probe: std::sync::Arc<dyn ConnectivityProbe>,
    interval: Duration,
    job_token: CancellationToken,
    on_loss: impl FnOnce() + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = job_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if !probe.is_connected().await {
                        warn!("Network attachment lost, cancelling active job");
                        on_loss();
                        job_token.cancel();
                        break;
                    }
                }
            }
        }
    })
}

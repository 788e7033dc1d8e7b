//! Marker Emitter - ground-truth UDP events.
//!
//! Each marker is one JSON datagram. The destination host is resolved and a
//! fresh socket opened for every emission; the whole send is bounded by
//! [`SEND_TIMEOUT`]. Markers are best-effort: failures are logged and
//! swallowed so they can never fail a run.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{UdpSocket, lookup_host};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use trafficgen_shared::marker::MarkerEvent;
use trafficgen_shared::scenario::MarkerSettings;

/// Upper bound for resolving and sending one marker
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Command-line replacements for the scenario's marker settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub disabled: bool,
}

impl MarkerOverrides {
    pub fn apply(&self, settings: &MarkerSettings) -> MarkerSettings {
        MarkerSettings {
            enabled: settings.enabled && !self.disabled,
            host: self.host.clone().unwrap_or_else(|| settings.host.clone()),
            port: self.port.unwrap_or(settings.port),
        }
    }
}

/// Sends ground-truth markers for one scenario execution
#[derive(Debug, Clone)]
pub struct MarkerEmitter {
    settings: MarkerSettings,
    send_timeout: Duration,
}

impl MarkerEmitter {
    pub fn new(settings: MarkerSettings) -> Self {
        Self {
            settings,
            send_timeout: SEND_TIMEOUT,
        }
    }

    pub fn settings(&self) -> &MarkerSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Send `event`. Returns whether the datagram left the host.
    #[instrument(skip(self, event), fields(event = %event.event, run_id = %event.attack_id))]
    pub async fn emit(&self, event: &MarkerEvent) -> bool {
        if !self.settings.enabled {
            debug!("Markers disabled, not sending {}", event.event);
            return false;
        }

        let payload = match event.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize marker: {}", e);
                return false;
            }
        };

        match timeout(self.send_timeout, self.send(&payload)).await {
            Ok(Ok(destination)) => {
                info!(
                    "Sent {} marker to {} ({} bytes)",
                    event.event,
                    destination,
                    payload.len()
                );
                true
            }
            Ok(Err(e)) => {
                warn!(
                    "Failed to send {} marker to {}: {}",
                    event.event,
                    self.settings.destination(),
                    e
                );
                false
            }
            Err(_) => {
                warn!(
                    "Timed out sending {} marker to {} after {:?}",
                    event.event,
                    self.settings.destination(),
                    self.send_timeout
                );
                false
            }
        }
    }

    async fn send(&self, payload: &[u8]) -> std::io::Result<SocketAddr> {
        let destination = lookup_host((self.settings.host.as_str(), self.settings.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for '{}'", self.settings.host),
                )
            })?;

        let local: SocketAddr = if destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.send_to(payload, destination).await?;
        Ok(destination)
    }
}

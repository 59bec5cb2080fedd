//! Simulated satellite modem for demos and end-to-end tests.
//!
//! Every call is answered from a spawned tokio task after a fixed latency, so
//! it must be used from inside a tokio runtime.

use crate::attach::SubscriptionId;
use crate::datagram::{DatagramId, SatelliteDatagram};
use crate::error::{SatelliteError, SatelliteResult};
use crate::radio::CoexistenceRadio;
use crate::service::SatelliteHandle;
use crate::transport::{
    ModemState, ModemTransport, RadioTechnology, RequestSerial, SatelliteCapabilities, TransportEvent,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_LATENCY_MS: u64 = 200;
const DEFAULT_MAX_DATAGRAM_BYTES: u32 = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedModemConfig {
    /// Delay before every completion is posted.
    pub latency_ms: u64,
    /// Fail the Nth datagram send (1-based).
    pub fail_send_at: Option<u32>,
    pub send_failure: SatelliteError,
    /// Answer enable requests with this error instead of success.
    pub enable_failure: Option<SatelliteError>,
    pub capabilities: SatelliteCapabilities,
}

impl Default for SimulatedModemConfig {
    fn default() -> Self {
        Self {
            latency_ms: DEFAULT_LATENCY_MS,
            fail_send_at: None,
            send_failure: SatelliteError::NetworkTimeout,
            enable_failure: None,
            capabilities: SatelliteCapabilities {
                supported_technologies: vec![RadioTechnology::NbIotNtn, RadioTechnology::Proprietary],
                is_pointing_required: true,
                max_bytes_per_outgoing_datagram: DEFAULT_MAX_DATAGRAM_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedModemStats {
    pub sends: u32,
    pub send_failures: u32,
    pub enable_requests: u32,
    pub coexistence_suspended: bool,
}

pub struct SimulatedModem {
    config: SimulatedModemConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    provisioned: bool,
    stats: SimulatedModemStats,
}

impl SimulatedModem {
    pub fn new(config: SimulatedModemConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            config,
            events,
            provisioned: false,
            stats: SimulatedModemStats::default(),
        }
    }

    fn post(&self, event: TransportEvent) {
        let events = self.events.clone();
        let latency = Duration::from_millis(self.config.latency_ms);
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if events.send(event).is_err() {
                debug!("modem event dropped, service gone");
            }
        });
    }

    pub fn get_stats(&self) -> &SimulatedModemStats {
        &self.stats
    }
}

impl ModemTransport for SimulatedModem {
    fn send_datagram(&mut self, id: DatagramId, datagram: &SatelliteDatagram) {
        self.stats.sends += 1;
        let result: SatelliteResult = if self.config.fail_send_at == Some(self.stats.sends) {
            self.stats.send_failures += 1;
            warn!(id, "simulated modem failing datagram");
            Err(self.config.send_failure)
        } else {
            Ok(())
        };
        debug!(id, bytes = datagram.payload.len(), emergency = datagram.datagram_type.is_emergency(), "modem sending");
        self.post(TransportEvent::SendComplete { id, result });
    }

    fn set_enabled(&mut self, serial: RequestSerial, enable: bool, demo_mode: bool) {
        self.stats.enable_requests += 1;
        let result = match self.config.enable_failure {
            Some(err) if enable => Err(err),
            _ => Ok(()),
        };
        info!(serial, enable, demo_mode, "modem power request");
        self.post(TransportEvent::SetEnabledComplete { serial, result });
        if result.is_ok() {
            let state = if enable { ModemState::Idle } else { ModemState::Off };
            self.post(TransportEvent::ModemStateChanged(state));
        }
    }

    fn query_capabilities(&mut self) {
        self.post(TransportEvent::Capabilities(Ok(self.config.capabilities.clone())));
    }

    fn set_attach_enabled(&mut self, subscription: SubscriptionId, enabled: bool) {
        self.post(TransportEvent::AttachComplete {
            subscription,
            enabled,
            result: Ok(()),
        });
    }

    fn set_cellular_coexistence_suspended(&mut self, suspended: bool) {
        debug!(suspended, "modem cellular co-existence");
        self.stats.coexistence_suspended = suspended;
    }

    fn provision(&mut self, token: &str, _data: &[u8]) {
        self.provisioned = true;
        self.post(TransportEvent::ProvisionComplete {
            token: token.to_string(),
            result: Ok(()),
        });
    }

    fn deprovision(&mut self, token: &str) {
        self.provisioned = false;
        self.post(TransportEvent::DeprovisionComplete {
            token: token.to_string(),
            result: Ok(()),
        });
    }
}

/// Report each radio switched off, one per `interval`, the way the short-range
/// stacks react to the satellite mode flag.
pub fn quiesce_radios(
    handle: SatelliteHandle,
    radios: Vec<CoexistenceRadio>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for radio in radios {
            tokio::time::sleep(interval).await;
            info!(?radio, "radio switched off");
            if handle.radio_state_changed(radio, false).is_err() {
                return;
            }
        }
    })
}

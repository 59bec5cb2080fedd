use crate::attach::SubscriptionId;
use crate::datagram::{DatagramId, SatelliteDatagram};
use crate::error::SatelliteResult;
use crate::transfer::TransferState;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Correlates a `set_enabled` round trip with its completion.
pub type RequestSerial = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioTechnology {
    NbIotNtn,
    NrNtn,
    EmtcNtn,
    Proprietary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteCapabilities {
    pub supported_technologies: Vec<RadioTechnology>,
    pub is_pointing_required: bool,
    pub max_bytes_per_outgoing_datagram: u32,
}

/// Power state reported by the modem itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemState {
    Off,
    Idle,
    Transferring,
    Listening,
    NotConnected,
    Connected,
    Unavailable,
}

/// Modem operations. Every call returns immediately; the outcome arrives
/// later as a [`TransportEvent`] delivered back into the controller loop.
pub trait ModemTransport: Send {
    fn send_datagram(&mut self, id: DatagramId, datagram: &SatelliteDatagram);
    fn set_enabled(&mut self, serial: RequestSerial, enable: bool, demo_mode: bool);
    fn query_capabilities(&mut self);
    fn set_attach_enabled(&mut self, subscription: SubscriptionId, enabled: bool);
    /// Suspend or restore the terrestrial modem co-existence switch.
    fn set_cellular_coexistence_suspended(&mut self, suspended: bool);
    fn provision(&mut self, token: &str, data: &[u8]);
    fn deprovision(&mut self, token: &str);
}

/// Completions and unsolicited notifications coming up from the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SendComplete { id: DatagramId, result: SatelliteResult },
    SetEnabledComplete { serial: RequestSerial, result: SatelliteResult },
    Capabilities(SatelliteResult<SatelliteCapabilities>),
    AttachComplete { subscription: SubscriptionId, enabled: bool, result: SatelliteResult },
    ProvisionComplete { token: String, result: SatelliteResult },
    DeprovisionComplete { token: String, result: SatelliteResult },
    ModemStateChanged(ModemState),
    ProvisionStateChanged(bool),
    ReceiveStateChanged { state: TransferState, pending: u32, result: SatelliteResult },
}

/// Outgoing call as seen by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemCommand {
    SendDatagram { id: DatagramId, payload: Vec<u8>, emergency: bool, full_screen_ui: bool },
    SetEnabled { serial: RequestSerial, enable: bool, demo_mode: bool },
    QueryCapabilities,
    SetAttachEnabled { subscription: SubscriptionId, enabled: bool },
    SetCellularCoexistenceSuspended(bool),
    Provision { token: String, data: Vec<u8> },
    Deprovision { token: String },
}

/// Shared, inspectable log of every call made on a [`RecordingTransport`].
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    inner: Arc<Mutex<Vec<ModemCommand>>>,
}

impl CommandLog {
    fn push(&self, command: ModemCommand) {
        if let Ok(mut log) = self.inner.lock() {
            log.push(command);
        }
    }

    pub fn snapshot(&self) -> Vec<ModemCommand> {
        self.inner.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<ModemCommand> {
        self.inner
            .lock()
            .map(|mut log| std::mem::take(&mut *log))
            .unwrap_or_default()
    }

    pub fn sent_datagram_ids(&self) -> Vec<DatagramId> {
        self.snapshot()
            .into_iter()
            .filter_map(|c| match c {
                ModemCommand::SendDatagram { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn last_set_enabled(&self) -> Option<(RequestSerial, bool, bool)> {
        self.snapshot().into_iter().rev().find_map(|c| match c {
            ModemCommand::SetEnabled { serial, enable, demo_mode } => Some((serial, enable, demo_mode)),
            _ => None,
        })
    }
}

/// Transport that performs nothing and records every call. Completions are
/// fed back by the caller, which makes ordering fully deterministic.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    log: CommandLog,
}

impl RecordingTransport {
    pub fn new() -> (Self, CommandLog) {
        let log = CommandLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl ModemTransport for RecordingTransport {
    fn send_datagram(&mut self, id: DatagramId, datagram: &SatelliteDatagram) {
        self.log.push(ModemCommand::SendDatagram {
            id,
            payload: datagram.payload.clone(),
            emergency: datagram.datagram_type.is_emergency(),
            full_screen_ui: datagram.wants_full_screen_ui,
        });
    }

    fn set_enabled(&mut self, serial: RequestSerial, enable: bool, demo_mode: bool) {
        self.log.push(ModemCommand::SetEnabled { serial, enable, demo_mode });
    }

    fn query_capabilities(&mut self) {
        self.log.push(ModemCommand::QueryCapabilities);
    }

    fn set_attach_enabled(&mut self, subscription: SubscriptionId, enabled: bool) {
        self.log.push(ModemCommand::SetAttachEnabled { subscription, enabled });
    }

    fn set_cellular_coexistence_suspended(&mut self, suspended: bool) {
        self.log.push(ModemCommand::SetCellularCoexistenceSuspended(suspended));
    }

    fn provision(&mut self, token: &str, data: &[u8]) {
        self.log.push(ModemCommand::Provision {
            token: token.to_string(),
            data: data.to_vec(),
        });
    }

    fn deprovision(&mut self, token: &str) {
        self.log.push(ModemCommand::Deprovision { token: token.to_string() });
    }
}

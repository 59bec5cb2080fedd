//! Transfer state aggregation.
//!
//! Send and receive progress are tracked on two independent axes. Every
//! update produces one combined [`TransferStateChanged`] for the session state
//! machine and one [`TransferSnapshot`] for external status listeners.

use crate::error::{SatelliteError, SatelliteResult};
use crate::listener::{ListenerHandle, ListenerRegistry};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    Unknown,
    Idle,
    Sending,
    SendSuccess,
    SendFailed,
    Receiving,
    ReceiveSuccess,
    ReceiveFailed,
    ReceiveNone,
}

impl TransferState {
    pub fn is_in_progress(self) -> bool {
        matches!(self, TransferState::Sending | TransferState::Receiving)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TransferState::SendFailed | TransferState::ReceiveFailed)
    }
}

/// Combined event consumed by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStateChanged {
    pub send: TransferState,
    pub receive: TransferState,
}

impl TransferStateChanged {
    pub fn any_in_progress(&self) -> bool {
        self.send.is_in_progress() || self.receive.is_in_progress()
    }

    pub fn any_failure(&self) -> bool {
        self.send.is_failure() || self.receive.is_failure()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub send_state: TransferState,
    pub receive_state: TransferState,
    pub send_pending: u32,
    pub receive_pending: u32,
    pub last_send_error: Option<SatelliteError>,
    pub last_receive_error: Option<SatelliteError>,
    pub demo_mode: bool,
    pub device_aligned: bool,
}

impl Default for TransferSnapshot {
    fn default() -> Self {
        Self {
            send_state: TransferState::Idle,
            receive_state: TransferState::Idle,
            send_pending: 0,
            receive_pending: 0,
            last_send_error: None,
            last_receive_error: None,
            demo_mode: false,
            device_aligned: false,
        }
    }
}

pub struct TransferStateAggregator {
    snapshot: TransferSnapshot,
    listeners: ListenerRegistry<TransferSnapshot>,
}

impl TransferStateAggregator {
    pub fn new() -> Self {
        Self {
            snapshot: TransferSnapshot::default(),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn record_send_state(
        &mut self,
        state: TransferState,
        pending: u32,
        result: SatelliteResult,
    ) -> TransferStateChanged {
        debug!(?state, pending, ?result, "send transfer state");
        self.snapshot.send_state = state;
        self.snapshot.send_pending = pending;
        self.snapshot.last_send_error = result.err();
        self.publish()
    }

    pub fn record_receive_state(
        &mut self,
        state: TransferState,
        pending: u32,
        result: SatelliteResult,
    ) -> TransferStateChanged {
        debug!(?state, pending, ?result, "receive transfer state");
        self.snapshot.receive_state = state;
        self.snapshot.receive_pending = pending;
        self.snapshot.last_receive_error = result.err();
        self.publish()
    }

    /// Both axes back to idle once the session itself settles in Idle.
    /// Listeners are told; the state machine is not, since it caused this.
    pub fn reset_to_idle(&mut self) {
        if self.snapshot.send_state == TransferState::Idle
            && self.snapshot.receive_state == TransferState::Idle
        {
            return;
        }
        self.snapshot.send_state = TransferState::Idle;
        self.snapshot.receive_state = TransferState::Idle;
        self.listeners.notify(&self.snapshot);
    }

    fn publish(&mut self) -> TransferStateChanged {
        self.listeners.notify(&self.snapshot);
        TransferStateChanged {
            send: self.snapshot.send_state,
            receive: self.snapshot.receive_state,
        }
    }

    pub fn set_demo_mode(&mut self, demo_mode: bool) {
        self.snapshot.demo_mode = demo_mode;
    }

    pub fn set_device_aligned(&mut self, aligned: bool) {
        self.snapshot.device_aligned = aligned;
    }

    pub fn demo_mode(&self) -> bool {
        self.snapshot.demo_mode
    }

    pub fn device_aligned(&self) -> bool {
        self.snapshot.device_aligned
    }

    pub fn send_pending(&self) -> u32 {
        self.snapshot.send_pending
    }

    pub fn receive_pending(&self) -> u32 {
        self.snapshot.receive_pending
    }

    pub fn snapshot(&self) -> &TransferSnapshot {
        &self.snapshot
    }

    pub fn register_listener<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&TransferSnapshot) -> Result<(), crate::listener::ListenerGone> + Send + 'static,
    {
        self.listeners.register(callback)
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry<TransferSnapshot> {
        &mut self.listeners
    }
}

impl Default for TransferStateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

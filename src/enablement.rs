//! Satellite enablement orchestration.
//!
//! At most one enable or disable is outstanding at a time, except that a
//! disable may supersede an enable that has not been confirmed yet. An enable
//! is confirmed to its caller only after the modem accepted it *and* every
//! coexistence radio that must be quiesced reports disabled.
//!
//! | In flight | Incoming | Resolution |
//! |---|---|---|
//! | none | any | accept |
//! | enable | enable | `RequestInProgress` |
//! | disable | disable | `RequestInProgress` |
//! | disable | enable | `Generic` |
//! | enable | disable | accept, pending enable aborted |

use crate::error::{SatelliteError, SatelliteResult};
use crate::radio::{CoexistenceRadio, RadioCoexistence};
use crate::transport::RequestSerial;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const MAX_ENABLEMENT_ACTIONS: usize = 4;

pub type EnablementCallback = Box<dyn FnOnce(SatelliteResult) + Send>;

/// Facts owned by other components that gate a request before any modem call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnablementContext {
    pub satellite_supported: bool,
    pub radio_on: bool,
    pub provisioned: bool,
    pub transport_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablementAction {
    /// Forward to the modem.
    SetModemEnabled {
        serial: RequestSerial,
        enable: bool,
        demo_mode: bool,
    },
    /// Write the persisted device-wide satellite mode flag.
    PersistSatelliteMode(bool),
    /// The confirmed enabled state flipped.
    EnabledStateChanged(bool),
    DemoModeChanged(bool),
}

pub type EnablementActions = Vec<EnablementAction, MAX_ENABLEMENT_ACTIONS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnablePhase {
    AwaitingModem,
    AwaitingRadioQuiescence,
}

struct InFlightRequest {
    serial: RequestSerial,
    demo_mode: bool,
    phase: EnablePhase,
    callback: Option<EnablementCallback>,
}

impl InFlightRequest {
    fn finish(mut self, result: SatelliteResult) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnablementState {
    pub enabled: bool,
    pub demo_mode: bool,
    pub enable_in_flight: Option<EnablePhase>,
    pub disable_in_flight: bool,
}

pub struct EnablementOrchestrator {
    confirmed_enabled: bool,
    confirmed_demo: bool,
    enable_request: Option<InFlightRequest>,
    disable_request: Option<InFlightRequest>,
    radios: RadioCoexistence,
    next_serial: RequestSerial,
}

fn push_action(actions: &mut EnablementActions, action: EnablementAction) {
    let pushed = actions.push(action);
    debug_assert!(pushed.is_ok(), "enablement action buffer overflow");
}

fn reject(callback: Option<EnablementCallback>, err: SatelliteError) {
    if let Some(callback) = callback {
        callback(Err(err));
    }
}

impl EnablementOrchestrator {
    pub fn new(coexistence_radios: &[CoexistenceRadio]) -> Self {
        Self {
            confirmed_enabled: false,
            confirmed_demo: false,
            enable_request: None,
            disable_request: None,
            radios: RadioCoexistence::new(coexistence_radios),
            next_serial: 1,
        }
    }

    fn allocate_serial(&mut self) -> RequestSerial {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        serial
    }

    /// Submit an enable or disable request.
    ///
    /// `callback` is `None` for internally generated requests (e.g. the
    /// cellular radio powering off) that nobody waits on.
    pub fn request_enabled(
        &mut self,
        ctx: EnablementContext,
        enable: bool,
        demo_mode: bool,
        callback: Option<EnablementCallback>,
    ) -> EnablementActions {
        let mut actions = EnablementActions::new();

        if !ctx.satellite_supported {
            debug!(enable, "rejecting enablement: satellite not supported");
            reject(callback, SatelliteError::RequestNotSupported);
            return actions;
        }
        if enable && !ctx.radio_on {
            debug!("rejecting enable: cellular radio is off");
            reject(callback, SatelliteError::RadioNotAvailable);
            return actions;
        }
        if enable && !ctx.provisioned {
            debug!("rejecting enable: not provisioned");
            reject(callback, SatelliteError::NotProvisioned);
            return actions;
        }
        if !ctx.transport_available {
            warn!(enable, "rejecting enablement: no modem transport");
            reject(callback, SatelliteError::InvalidInternalState);
            return actions;
        }

        match (self.enable_request.is_some(), self.disable_request.is_some(), enable) {
            (_, true, false) | (true, false, true) => {
                info!(enable, "enablement request already in progress");
                reject(callback, SatelliteError::RequestInProgress);
            }
            (_, true, true) => {
                info!("cannot enable while a disable is in progress");
                reject(callback, SatelliteError::Generic);
            }
            (true, false, false) => {
                if let Some(superseded) = self.enable_request.take() {
                    info!(serial = superseded.serial, phase = ?superseded.phase, "disable supersedes pending enable");
                    superseded.finish(Err(SatelliteError::RequestAborted));
                }
                self.start_request(enable, demo_mode, callback, &mut actions);
            }
            (false, false, _) => {
                let demo_matches = !enable || demo_mode == self.confirmed_demo;
                if self.confirmed_enabled == enable && demo_matches {
                    debug!(enable, demo_mode, "already in requested state");
                    if let Some(callback) = callback {
                        callback(Ok(()));
                    }
                    return actions;
                }
                self.start_request(enable, demo_mode, callback, &mut actions);
            }
        }
        actions
    }

    fn start_request(
        &mut self,
        enable: bool,
        demo_mode: bool,
        callback: Option<EnablementCallback>,
        actions: &mut EnablementActions,
    ) {
        let serial = self.allocate_serial();
        info!(serial, enable, demo_mode, "forwarding enablement request to modem");
        let request = InFlightRequest {
            serial,
            demo_mode,
            phase: EnablePhase::AwaitingModem,
            callback,
        };
        if enable {
            self.enable_request = Some(request);
        } else {
            self.disable_request = Some(request);
        }
        push_action(
            actions,
            EnablementAction::SetModemEnabled {
                serial,
                enable,
                demo_mode,
            },
        );
    }

    /// The modem answered a `set_enabled` call.
    pub fn on_modem_response(&mut self, serial: RequestSerial, result: SatelliteResult) -> EnablementActions {
        let mut actions = EnablementActions::new();

        if self.disable_request.as_ref().is_some_and(|r| r.serial == serial) {
            let Some(request) = self.disable_request.take() else {
                return actions;
            };
            match result {
                Ok(()) => {
                    info!(serial, "satellite disabled");
                    let was_enabled = self.confirmed_enabled;
                    self.confirmed_enabled = false;
                    self.confirmed_demo = false;
                    push_action(&mut actions, EnablementAction::PersistSatelliteMode(false));
                    if was_enabled {
                        push_action(&mut actions, EnablementAction::EnabledStateChanged(false));
                        push_action(&mut actions, EnablementAction::DemoModeChanged(false));
                    }
                    request.finish(Ok(()));
                }
                Err(err) => {
                    warn!(serial, %err, "modem rejected disable");
                    request.finish(Err(err));
                }
            }
            return actions;
        }

        let awaiting_modem = self
            .enable_request
            .as_ref()
            .is_some_and(|r| r.serial == serial && r.phase == EnablePhase::AwaitingModem);
        if !awaiting_modem {
            debug!(serial, ?result, "ignoring stale enablement response");
            return actions;
        }

        match result {
            Ok(()) => {
                push_action(&mut actions, EnablementAction::PersistSatelliteMode(true));
                if let Some(request) = self.enable_request.as_mut() {
                    request.phase = EnablePhase::AwaitingRadioQuiescence;
                }
                if self.radios.all_quiesced() {
                    self.confirm_enable(&mut actions);
                } else {
                    let waiting: std::vec::Vec<_> = self.radios.still_enabled().collect();
                    info!(serial, ?waiting, "modem enabled, waiting for radios to switch off");
                }
            }
            Err(err) => {
                warn!(serial, %err, "modem rejected enable");
                if let Some(request) = self.enable_request.take() {
                    request.finish(Err(err));
                }
            }
        }
        actions
    }

    /// A coexistence radio reported its enabled state.
    pub fn on_radio_state_changed(&mut self, radio: CoexistenceRadio, enabled: bool) -> EnablementActions {
        let mut actions = EnablementActions::new();
        self.radios.set_enabled(radio, enabled);

        let waiting = self
            .enable_request
            .as_ref()
            .is_some_and(|r| r.phase == EnablePhase::AwaitingRadioQuiescence);
        if waiting && self.radios.all_quiesced() {
            self.confirm_enable(&mut actions);
        }
        actions
    }

    fn confirm_enable(&mut self, actions: &mut EnablementActions) {
        let Some(request) = self.enable_request.take() else {
            return;
        };
        info!(serial = request.serial, demo_mode = request.demo_mode, "satellite enabled");
        let was_enabled = self.confirmed_enabled;
        self.confirmed_enabled = true;
        self.confirmed_demo = request.demo_mode;
        push_action(actions, EnablementAction::DemoModeChanged(request.demo_mode));
        if !was_enabled {
            push_action(actions, EnablementAction::EnabledStateChanged(true));
        }
        request.finish(Ok(()));
    }

    /// The modem reported itself off without being asked to.
    pub fn on_modem_powered_off(&mut self) -> EnablementActions {
        let mut actions = EnablementActions::new();
        if self.disable_request.is_some() {
            return actions;
        }
        if let Some(request) = self.enable_request.take() {
            warn!(serial = request.serial, "modem powered off during enable");
            request.finish(Err(SatelliteError::InvalidModemState));
            push_action(&mut actions, EnablementAction::PersistSatelliteMode(false));
        }
        if self.confirmed_enabled {
            warn!("modem powered off while satellite enabled");
            self.confirmed_enabled = false;
            self.confirmed_demo = false;
            push_action(&mut actions, EnablementAction::PersistSatelliteMode(false));
            push_action(&mut actions, EnablementAction::EnabledStateChanged(false));
            push_action(&mut actions, EnablementAction::DemoModeChanged(false));
        }
        actions
    }

    pub fn is_enabled(&self) -> bool {
        self.confirmed_enabled
    }

    pub fn is_demo_mode(&self) -> bool {
        self.confirmed_demo
    }

    /// An enable or disable is outstanding.
    pub fn has_request_in_flight(&self) -> bool {
        self.enable_request.is_some() || self.disable_request.is_some()
    }

    pub fn is_waiting_for_radio_quiescence(&self) -> bool {
        self.enable_request
            .as_ref()
            .is_some_and(|r| r.phase == EnablePhase::AwaitingRadioQuiescence)
    }

    pub fn radios(&self) -> &RadioCoexistence {
        &self.radios
    }

    pub fn get_state(&self) -> EnablementState {
        EnablementState {
            enabled: self.confirmed_enabled,
            demo_mode: self.confirmed_demo,
            enable_in_flight: self.enable_request.as_ref().map(|r| r.phase),
            disable_in_flight: self.disable_request.is_some(),
        }
    }
}

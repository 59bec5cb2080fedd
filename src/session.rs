//! Satellite session state machine.
//!
//! [`transition`] is the whole transition table. [`SessionStateMachine`] wraps
//! it with the entry and exit side effects (listening timer, cellular
//! co-existence switch, transfer-state reset), which are returned as
//! [`SessionEffect`] values for the controller to carry out.

use crate::listener::{ListenerGone, ListenerHandle, ListenerRegistry};
use crate::transfer::TransferStateChanged;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_SESSION_EFFECTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Satellite is not supported on this device. Never left.
    Unavailable,
    PowerOff,
    Idle,
    Transferring,
    Listening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    EnabledStateChanged(bool),
    TransferStateChanged(TransferStateChanged),
    ListeningTimerExpired { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    StartListeningTimer { duration: Duration, generation: u64 },
    CancelListeningTimer,
    SuspendCellularCoexistence,
    RestoreCellularCoexistence,
    ResetTransferState,
}

pub type SessionEffects = Vec<SessionEffect, MAX_SESSION_EFFECTS>;

/// Next state for `event` in `state`, or `None` if the event is not expected
/// there. Returning `Some(state)` means the event is expected and the machine
/// stays put.
pub fn transition(state: SessionState, event: &SessionEvent) -> Option<SessionState> {
    use SessionState::*;

    match (state, event) {
        (Unavailable, _) => None,

        (PowerOff, SessionEvent::EnabledStateChanged(true)) => Some(Idle),
        (PowerOff, _) => None,

        (Idle, SessionEvent::EnabledStateChanged(false)) => Some(PowerOff),
        (Idle, SessionEvent::TransferStateChanged(t)) if t.any_in_progress() => Some(Transferring),
        (Idle, SessionEvent::TransferStateChanged(_)) => Some(Idle),
        (Idle, _) => None,

        (Transferring, SessionEvent::EnabledStateChanged(false)) => Some(PowerOff),
        (Transferring, SessionEvent::TransferStateChanged(t)) if t.any_in_progress() => {
            Some(Transferring)
        }
        (Transferring, SessionEvent::TransferStateChanged(t)) if t.any_failure() => Some(Idle),
        (Transferring, SessionEvent::TransferStateChanged(_)) => Some(Listening),
        (Transferring, _) => None,

        (Listening, SessionEvent::EnabledStateChanged(false)) => Some(PowerOff),
        (Listening, SessionEvent::TransferStateChanged(t)) if t.any_in_progress() => {
            Some(Transferring)
        }
        (Listening, SessionEvent::TransferStateChanged(_)) => Some(Listening),
        (Listening, SessionEvent::ListeningTimerExpired { .. }) => Some(Idle),
        (Listening, _) => None,
    }
}

/// Listening timer currently armed. A timer whose generation no longer
/// matches is stale and is dropped on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningTimer {
    pub generation: u64,
    pub duration: Duration,
}

pub struct SessionStateMachine {
    state: SessionState,
    /// The current (or most recent) transferring episode included a send.
    episode_sent: bool,
    coexistence_suspended: bool,
    timer_generation: u64,
    listening_timer: Option<ListeningTimer>,
    timeout_after_send: Duration,
    timeout_after_receive: Duration,
    listeners: ListenerRegistry<SessionState>,
}

impl SessionStateMachine {
    pub fn new(satellite_supported: bool, timeout_after_send: Duration, timeout_after_receive: Duration) -> Self {
        let state = if satellite_supported {
            SessionState::PowerOff
        } else {
            SessionState::Unavailable
        };
        info!(?state, "session state machine created");
        Self {
            state,
            episode_sent: false,
            coexistence_suspended: false,
            timer_generation: 0,
            listening_timer: None,
            timeout_after_send,
            timeout_after_receive,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> SessionEffects {
        let mut effects = SessionEffects::new();

        if let SessionEvent::ListeningTimerExpired { generation } = event {
            if self.listening_timer.map(|t| t.generation) != Some(generation) {
                debug!(generation, state = ?self.state, "dropping stale listening timer");
                return effects;
            }
        }

        let Some(next) = transition(self.state, &event) else {
            warn!(state = ?self.state, ?event, "unexpected session event ignored");
            return effects;
        };

        if let SessionEvent::TransferStateChanged(t) = event {
            if next == SessionState::Transferring && t.send.is_in_progress() {
                // A fresh episode starts clean; one already running only accumulates.
                self.episode_sent = true;
            } else if next == SessionState::Transferring && self.state != SessionState::Transferring {
                self.episode_sent = false;
            }
        }

        if next == self.state {
            return effects;
        }

        let previous = self.state;
        self.on_exit(previous, next, &mut effects);
        self.state = next;
        self.on_enter(next, &mut effects);

        info!(from = ?previous, to = ?next, "session state changed");
        self.listeners.notify(&next);
        effects
    }

    fn on_exit(&mut self, from: SessionState, to: SessionState, effects: &mut SessionEffects) {
        match from {
            SessionState::Listening => {
                self.listening_timer = None;
                self.timer_generation = self.timer_generation.wrapping_add(1);
                push_effect(effects, SessionEffect::CancelListeningTimer);
            }
            SessionState::Idle if to == SessionState::Transferring => {
                if !self.coexistence_suspended {
                    self.coexistence_suspended = true;
                    push_effect(effects, SessionEffect::SuspendCellularCoexistence);
                }
            }
            _ => {}
        }
    }

    fn on_enter(&mut self, state: SessionState, effects: &mut SessionEffects) {
        match state {
            SessionState::Idle => {
                self.restore_coexistence(effects);
                push_effect(effects, SessionEffect::ResetTransferState);
            }
            SessionState::PowerOff => {
                self.restore_coexistence(effects);
                self.episode_sent = false;
            }
            SessionState::Listening => {
                let duration = if self.episode_sent {
                    self.timeout_after_send
                } else {
                    self.timeout_after_receive
                };
                let timer = ListeningTimer {
                    generation: self.timer_generation,
                    duration,
                };
                debug!(?duration, after_send = self.episode_sent, "arming listening timer");
                self.listening_timer = Some(timer);
                push_effect(
                    effects,
                    SessionEffect::StartListeningTimer {
                        duration,
                        generation: timer.generation,
                    },
                );
            }
            SessionState::Transferring | SessionState::Unavailable => {}
        }
    }

    fn restore_coexistence(&mut self, effects: &mut SessionEffects) {
        if self.coexistence_suspended {
            self.coexistence_suspended = false;
            push_effect(effects, SessionEffect::RestoreCellularCoexistence);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn listening_timer(&self) -> Option<ListeningTimer> {
        self.listening_timer
    }

    pub fn is_coexistence_suspended(&self) -> bool {
        self.coexistence_suspended
    }

    pub fn set_listening_timeouts(&mut self, after_send: Duration, after_receive: Duration) {
        self.timeout_after_send = after_send;
        self.timeout_after_receive = after_receive;
    }

    pub fn register_listener<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&SessionState) -> Result<(), ListenerGone> + Send + 'static,
    {
        self.listeners.register(callback)
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry<SessionState> {
        &mut self.listeners
    }
}

fn push_effect(effects: &mut SessionEffects, effect: SessionEffect) {
    let pushed = effects.push(effect);
    debug_assert!(pushed.is_ok(), "session effect buffer overflow");
}

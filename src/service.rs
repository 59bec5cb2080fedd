//! Async front end for [`SatelliteController`].
//!
//! The controller lives inside one tokio task. Callers talk to it through a
//! cloneable [`SatelliteHandle`]; modem completions arrive on a separate
//! channel and the listening timer is driven from the same `select!` loop, so
//! every state change is serialized on that task.

use crate::attach::{RestrictionReason, SubscriptionId};
use crate::controller::{SatelliteController, SessionSnapshot};
use crate::datagram::SatelliteDatagram;
use crate::error::{SatelliteResult, ServiceError};
use crate::listener::{ListenerGone, ListenerHandle};
use crate::provision::{CancelSink, CancelToken};
use crate::radio::CoexistenceRadio;
use crate::session::SessionState;
use crate::transfer::TransferSnapshot;
use crate::transport::{SatelliteCapabilities, TransportEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<T>;

pub enum ServiceCommand {
    SetEnabled {
        enable: bool,
        demo_mode: bool,
        reply: Reply<SatelliteResult>,
    },
    SendDatagram {
        datagram: SatelliteDatagram,
        reply: Reply<SatelliteResult>,
    },
    RadioStateChanged {
        radio: CoexistenceRadio,
        enabled: bool,
    },
    SetRadioPower(bool),
    AddAttachRestriction {
        subscription: SubscriptionId,
        reason: RestrictionReason,
    },
    RemoveAttachRestriction {
        subscription: SubscriptionId,
        reason: RestrictionReason,
    },
    Provision {
        token: String,
        data: Vec<u8>,
        reply: Reply<SatelliteResult>,
    },
    Deprovision {
        token: String,
        reply: Reply<SatelliteResult>,
    },
    CancelProvision {
        token: String,
    },
    RequestCapabilities {
        reply: Reply<SatelliteResult<SatelliteCapabilities>>,
    },
    SetDeviceAligned(bool),
    SetListeningTimeouts {
        after_send: Duration,
        after_receive: Duration,
    },
    SubscribeSessionState {
        tx: mpsc::UnboundedSender<SessionState>,
        reply: Reply<ListenerHandle>,
    },
    SubscribeTransferState {
        tx: mpsc::UnboundedSender<TransferSnapshot>,
        reply: Reply<ListenerHandle>,
    },
    SubscribeProvisionState {
        tx: mpsc::UnboundedSender<bool>,
        reply: Reply<ListenerHandle>,
    },
    UnsubscribeSessionState(ListenerHandle),
    UnsubscribeTransferState(ListenerHandle),
    UnsubscribeProvisionState(ListenerHandle),
    Shutdown,
}

/// Listening timer as armed on the tokio clock.
#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    generation: u64,
    deadline: Instant,
}

pub struct SatelliteService {
    controller: SatelliteController,
    commands: mpsc::UnboundedReceiver<ServiceCommand>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    timer: Option<ArmedTimer>,
}

impl SatelliteService {
    /// Move the controller onto its own task.
    pub fn spawn(
        mut controller: SatelliteController,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (SatelliteHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::unbounded_channel();

        let cancel_tx = tx.clone();
        let sink: CancelSink = Arc::new(move |token: &str| {
            let _ = cancel_tx.send(ServiceCommand::CancelProvision {
                token: token.to_string(),
            });
        });
        controller.set_cancel_sink(Arc::clone(&sink));

        let snapshot = Arc::new(Mutex::new(controller.snapshot()));
        let handle = SatelliteHandle {
            tx,
            snapshot: Arc::clone(&snapshot),
            cancel_sink: sink,
        };
        let service = SatelliteService {
            controller,
            commands,
            transport_events,
            snapshot,
            timer: None,
        };
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!("satellite service started");
        let mut events_open = true;

        loop {
            let timer = self.timer;
            let deadline = timer.map_or_else(|| Instant::now() + Duration::from_secs(3600), |t| t.deadline);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ServiceCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.transport_events.recv(), if events_open => match event {
                    Some(event) => self.controller.on_transport_event(event),
                    None => {
                        warn!("transport event channel closed");
                        events_open = false;
                    }
                },
                () = sleep_until(deadline), if timer.is_some() => {
                    if let Some(t) = timer {
                        debug!(generation = t.generation, "listening timer fired");
                        self.timer = None;
                        self.controller.on_listening_timer_expired(t.generation);
                    }
                }
            }

            self.sync_timer();
            self.publish_snapshot();
        }
        info!("satellite service stopped");
    }

    fn handle_command(&mut self, command: ServiceCommand) {
        let c = &mut self.controller;
        match command {
            ServiceCommand::SetEnabled { enable, demo_mode, reply } => {
                c.request_satellite_enabled(enable, demo_mode, reply_with(reply));
            }
            ServiceCommand::SendDatagram { datagram, reply } => {
                c.send_datagram(datagram, reply_with(reply));
            }
            ServiceCommand::RadioStateChanged { radio, enabled } => c.on_radio_state_changed(radio, enabled),
            ServiceCommand::SetRadioPower(on) => c.set_radio_power(on),
            ServiceCommand::AddAttachRestriction { subscription, reason } => {
                c.add_attach_restriction(subscription, reason);
            }
            ServiceCommand::RemoveAttachRestriction { subscription, reason } => {
                c.remove_attach_restriction(subscription, reason);
            }
            ServiceCommand::Provision { token, data, reply } => {
                // The caller already holds a token wired to this loop.
                let _ = c.provision(&token, &data, reply_with(reply));
            }
            ServiceCommand::Deprovision { token, reply } => c.deprovision(&token, reply_with(reply)),
            ServiceCommand::CancelProvision { token } => c.cancel_provision(&token),
            ServiceCommand::RequestCapabilities { reply } => {
                c.request_capabilities(Box::new(move |result| {
                    let _ = reply.send(result);
                }));
            }
            ServiceCommand::SetDeviceAligned(aligned) => c.set_device_aligned(aligned),
            ServiceCommand::SetListeningTimeouts { after_send, after_receive } => {
                c.set_listening_timeouts(after_send, after_receive);
            }
            ServiceCommand::SubscribeSessionState { tx, reply } => {
                let handle = c.register_session_listener(move |state: &SessionState| {
                    tx.send(*state).map_err(|_| ListenerGone)
                });
                let _ = reply.send(handle);
            }
            ServiceCommand::SubscribeTransferState { tx, reply } => {
                let handle = c.register_transfer_listener(move |snapshot: &TransferSnapshot| {
                    tx.send(snapshot.clone()).map_err(|_| ListenerGone)
                });
                let _ = reply.send(handle);
            }
            ServiceCommand::SubscribeProvisionState { tx, reply } => {
                let handle = c.register_provision_listener(move |provisioned: &bool| {
                    tx.send(*provisioned).map_err(|_| ListenerGone)
                });
                let _ = reply.send(handle);
            }
            ServiceCommand::UnsubscribeSessionState(handle) => {
                c.unregister_session_listener(handle);
            }
            ServiceCommand::UnsubscribeTransferState(handle) => {
                c.unregister_transfer_listener(handle);
            }
            ServiceCommand::UnsubscribeProvisionState(handle) => {
                c.unregister_provision_listener(handle);
            }
            ServiceCommand::Shutdown => {}
        }
    }

    /// Arm, keep or drop the tokio timer to match the session's timer.
    fn sync_timer(&mut self) {
        match (self.controller.listening_timer(), self.timer) {
            (Some(wanted), Some(armed)) if wanted.generation == armed.generation => {}
            (Some(wanted), _) => {
                self.timer = Some(ArmedTimer {
                    generation: wanted.generation,
                    deadline: Instant::now() + wanted.duration,
                });
            }
            (None, _) => self.timer = None,
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.controller.snapshot();
        match self.snapshot.lock() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

fn reply_with(reply: Reply<SatelliteResult>) -> Box<dyn FnOnce(SatelliteResult) + Send> {
    Box::new(move |result| {
        let _ = reply.send(result);
    })
}

/// Provision request in progress.
pub struct PendingProvision {
    pub cancel: CancelToken,
    result: oneshot::Receiver<SatelliteResult>,
}

impl PendingProvision {
    pub async fn wait(self) -> Result<SatelliteResult, ServiceError> {
        self.result.await.map_err(|_| ServiceError::ChannelClosed)
    }
}

/// Cloneable client for a running [`SatelliteService`].
#[derive(Clone)]
pub struct SatelliteHandle {
    tx: mpsc::UnboundedSender<ServiceCommand>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    cancel_sink: CancelSink,
}

impl SatelliteHandle {
    fn send(&self, command: ServiceCommand) -> Result<(), ServiceError> {
        self.tx.send(command).map_err(|_| ServiceError::ChannelClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> ServiceCommand) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    /// Resolves once the request is confirmed, rejected or superseded.
    pub async fn set_satellite_enabled(&self, enable: bool, demo_mode: bool) -> Result<SatelliteResult, ServiceError> {
        self.request(|reply| ServiceCommand::SetEnabled {
            enable,
            demo_mode,
            reply,
        })
        .await
    }

    /// Queue a datagram without waiting for the outcome.
    pub fn submit_datagram(
        &self,
        datagram: SatelliteDatagram,
    ) -> Result<oneshot::Receiver<SatelliteResult>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServiceCommand::SendDatagram { datagram, reply })?;
        Ok(rx)
    }

    pub async fn send_datagram(&self, datagram: SatelliteDatagram) -> Result<SatelliteResult, ServiceError> {
        let rx = self.submit_datagram(datagram)?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    pub fn radio_state_changed(&self, radio: CoexistenceRadio, enabled: bool) -> Result<(), ServiceError> {
        self.send(ServiceCommand::RadioStateChanged { radio, enabled })
    }

    pub fn set_radio_power(&self, on: bool) -> Result<(), ServiceError> {
        self.send(ServiceCommand::SetRadioPower(on))
    }

    pub fn add_attach_restriction(
        &self,
        subscription: SubscriptionId,
        reason: RestrictionReason,
    ) -> Result<(), ServiceError> {
        self.send(ServiceCommand::AddAttachRestriction { subscription, reason })
    }

    pub fn remove_attach_restriction(
        &self,
        subscription: SubscriptionId,
        reason: RestrictionReason,
    ) -> Result<(), ServiceError> {
        self.send(ServiceCommand::RemoveAttachRestriction { subscription, reason })
    }

    pub fn provision(&self, token: &str, data: &[u8]) -> Result<PendingProvision, ServiceError> {
        let (reply, result) = oneshot::channel();
        self.send(ServiceCommand::Provision {
            token: token.to_string(),
            data: data.to_vec(),
            reply,
        })?;
        Ok(PendingProvision {
            cancel: CancelToken::new(token, Arc::clone(&self.cancel_sink)),
            result,
        })
    }

    pub async fn deprovision(&self, token: &str) -> Result<SatelliteResult, ServiceError> {
        let token = token.to_string();
        self.request(|reply| ServiceCommand::Deprovision { token, reply }).await
    }

    pub async fn request_capabilities(&self) -> Result<SatelliteResult<SatelliteCapabilities>, ServiceError> {
        self.request(|reply| ServiceCommand::RequestCapabilities { reply }).await
    }

    pub fn set_device_aligned(&self, aligned: bool) -> Result<(), ServiceError> {
        self.send(ServiceCommand::SetDeviceAligned(aligned))
    }

    pub fn set_listening_timeouts(&self, after_send: Duration, after_receive: Duration) -> Result<(), ServiceError> {
        self.send(ServiceCommand::SetListeningTimeouts {
            after_send,
            after_receive,
        })
    }

    pub async fn subscribe_session_state(
        &self,
    ) -> Result<(ListenerHandle, mpsc::UnboundedReceiver<SessionState>), ServiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .request(|reply| ServiceCommand::SubscribeSessionState { tx, reply })
            .await?;
        Ok((handle, rx))
    }

    pub async fn subscribe_transfer_state(
        &self,
    ) -> Result<(ListenerHandle, mpsc::UnboundedReceiver<TransferSnapshot>), ServiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .request(|reply| ServiceCommand::SubscribeTransferState { tx, reply })
            .await?;
        Ok((handle, rx))
    }

    pub async fn subscribe_provision_state(
        &self,
    ) -> Result<(ListenerHandle, mpsc::UnboundedReceiver<bool>), ServiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .request(|reply| ServiceCommand::SubscribeProvisionState { tx, reply })
            .await?;
        Ok((handle, rx))
    }

    pub fn unsubscribe_session_state(&self, handle: ListenerHandle) -> Result<(), ServiceError> {
        self.send(ServiceCommand::UnsubscribeSessionState(handle))
    }

    pub fn unsubscribe_transfer_state(&self, handle: ListenerHandle) -> Result<(), ServiceError> {
        self.send(ServiceCommand::UnsubscribeTransferState(handle))
    }

    pub fn unsubscribe_provision_state(&self, handle: ListenerHandle) -> Result<(), ServiceError> {
        self.send(ServiceCommand::UnsubscribeProvisionState(handle))
    }

    /// Latest state published by the service loop.
    pub fn snapshot(&self) -> SessionSnapshot {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Shutdown)
    }
}

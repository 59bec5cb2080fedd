use crate::attach::{AttachCommand, AttachRestrictionManager, RestrictionReason, SubscriptionId};
use crate::config::SessionConfig;
use crate::datagram::{CompletionHandler, DatagramId, SatelliteDatagram};
use crate::dispatcher::{DatagramDispatcher, DispatchAction, DispatchActions, DispatchStats};
use crate::enablement::{EnablementAction, EnablementActions, EnablementCallback, EnablementContext, EnablementOrchestrator};
use crate::error::{SatelliteError, SatelliteResult};
use crate::listener::{ListenerGone, ListenerHandle};
use crate::provision::{CancelSink, CancelToken, ProvisionCallback, ProvisionCommand, ProvisionManager};
use crate::radio::CoexistenceRadio;
use crate::session::{ListeningTimer, SessionEffect, SessionEvent, SessionState, SessionStateMachine};
use crate::settings::SettingsStore;
use crate::transfer::{TransferSnapshot, TransferState, TransferStateAggregator};
use crate::transport::{ModemState, ModemTransport, SatelliteCapabilities, TransportEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub type CapabilitiesCallback = Box<dyn FnOnce(SatelliteResult<SatelliteCapabilities>) + Send>;

/// Read-only view of the session, cheap to clone and safe to hand out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_state: SessionState,
    pub transfer: TransferSnapshot,
    pub enabled: bool,
    pub demo_mode: bool,
    pub provisioned: bool,
    pub waiting_for_radio_quiescence: bool,
    pub emergency_pending: usize,
    pub non_emergency_pending: usize,
    pub datagrams_sent: u32,
    pub datagrams_aborted: u32,
}

/// Owns every session component and runs their state changes in order.
///
/// All methods are meant to be called from one logical event loop. Modem
/// calls are fire-and-forget; their outcomes come back through
/// [`SatelliteController::on_transport_event`].
pub struct SatelliteController {
    config: SessionConfig,
    transport: Option<Box<dyn ModemTransport>>,
    settings: Box<dyn SettingsStore>,

    dispatcher: DatagramDispatcher,
    transfer: TransferStateAggregator,
    session: SessionStateMachine,
    enablement: EnablementOrchestrator,
    attach: AttachRestrictionManager,
    provision: ProvisionManager,

    radio_on: bool,
    capabilities: Option<SatelliteCapabilities>,
    capability_waiters: Vec<CapabilitiesCallback>,

    cancel_sink: CancelSink,
    cancel_route: Arc<Mutex<CancelRoute>>,
}

/// Cancelled tokens wait here for [`SatelliteController::process_pending_cancellations`]
/// until a sink is installed; from then on every token goes to the sink.
#[derive(Default)]
struct CancelRoute {
    queued: Vec<String>,
    sink: Option<CancelSink>,
}

impl SatelliteController {
    pub fn new(
        config: SessionConfig,
        transport: Option<Box<dyn ModemTransport>>,
        mut settings: Box<dyn SettingsStore>,
    ) -> Self {
        let persisted = settings.load();

        // The modem always boots powered off, so a leftover mode flag is stale.
        if persisted.satellite_mode_enabled {
            info!("clearing stale satellite mode flag");
            if let Err(e) = settings.set_satellite_mode_enabled(false) {
                error!("failed to clear satellite mode flag: {}", e);
            }
        }

        let mut attach = AttachRestrictionManager::new();
        let seeded: Vec<AttachCommand> = persisted
            .attach_user_enabled
            .iter()
            .filter(|(_, &user_enabled)| !user_enabled)
            .filter_map(|(&subscription, _)| attach.add_restriction(subscription, RestrictionReason::User))
            .collect();

        let cancel_route = Arc::new(Mutex::new(CancelRoute::default()));
        let route = Arc::clone(&cancel_route);
        let cancel_sink: CancelSink = Arc::new(move |token: &str| {
            let forward = match route.lock() {
                Ok(mut route) => {
                    let sink = route.sink.clone();
                    if sink.is_none() {
                        route.queued.push(token.to_string());
                    }
                    sink
                }
                Err(_) => None,
            };
            if let Some(sink) = forward {
                sink(token);
            }
        });

        let mut controller = Self {
            dispatcher: DatagramDispatcher::new(config.max_pending_datagrams),
            transfer: TransferStateAggregator::new(),
            session: SessionStateMachine::new(
                config.satellite_supported,
                config.listening_timeout_after_send(),
                config.listening_timeout_after_receive(),
            ),
            enablement: EnablementOrchestrator::new(&config.coexistence_radios),
            attach,
            provision: ProvisionManager::new(false),
            radio_on: true,
            capabilities: None,
            capability_waiters: Vec::new(),
            cancel_sink,
            cancel_route,
            config,
            transport,
            settings,
        };
        for command in seeded {
            controller.issue_attach_command(Some(command));
        }
        controller
    }

    // === Enablement ===

    fn enablement_context(&self) -> EnablementContext {
        EnablementContext {
            satellite_supported: self.config.satellite_supported,
            radio_on: self.radio_on,
            provisioned: self.provision.is_provisioned(),
            transport_available: self.transport.is_some(),
        }
    }

    pub fn request_satellite_enabled(&mut self, enable: bool, demo_mode: bool, callback: EnablementCallback) {
        let ctx = self.enablement_context();
        let actions = self.enablement.request_enabled(ctx, enable, demo_mode, Some(callback));
        self.apply_enablement_actions(actions);
    }

    pub fn on_radio_state_changed(&mut self, radio: CoexistenceRadio, enabled: bool) {
        let actions = self.enablement.on_radio_state_changed(radio, enabled);
        self.apply_enablement_actions(actions);
    }

    /// Cellular radio power. Turning it off also takes satellite down.
    pub fn set_radio_power(&mut self, on: bool) {
        if self.radio_on == on {
            return;
        }
        self.radio_on = on;
        info!(on, "cellular radio power changed");
        if !on && (self.enablement.is_enabled() || self.enablement.has_request_in_flight()) {
            let ctx = self.enablement_context();
            let actions = self.enablement.request_enabled(ctx, false, false, None);
            self.apply_enablement_actions(actions);
        }
    }

    fn apply_enablement_actions(&mut self, actions: EnablementActions) {
        let mut work: VecDeque<EnablementAction> = actions.into_iter().collect();
        while let Some(action) = work.pop_front() {
            match action {
                EnablementAction::SetModemEnabled { serial, enable, demo_mode } => {
                    match self.transport.as_mut() {
                        Some(transport) => transport.set_enabled(serial, enable, demo_mode),
                        None => {
                            warn!(serial, "no modem transport for enablement request");
                            let follow = self
                                .enablement
                                .on_modem_response(serial, Err(SatelliteError::InvalidInternalState));
                            work.extend(follow);
                        }
                    }
                }
                EnablementAction::PersistSatelliteMode(enabled) => {
                    if let Err(e) = self.settings.set_satellite_mode_enabled(enabled) {
                        error!("failed to persist satellite mode flag: {}", e);
                    }
                }
                EnablementAction::EnabledStateChanged(enabled) => {
                    self.feed_session(SessionEvent::EnabledStateChanged(enabled));
                    if !enabled {
                        self.abort_datagrams(SatelliteError::RequestAborted);
                    }
                }
                EnablementAction::DemoModeChanged(demo_mode) => {
                    self.transfer.set_demo_mode(demo_mode);
                }
            }
        }
    }

    // === Datagrams ===

    /// Queue a datagram. The handler always fires exactly once.
    pub fn send_datagram(&mut self, datagram: SatelliteDatagram, handler: CompletionHandler) -> Option<DatagramId> {
        if !self.config.satellite_supported {
            handler(Err(SatelliteError::RequestNotSupported));
            return None;
        }
        if !self.provision.is_provisioned() {
            handler(Err(SatelliteError::NotProvisioned));
            return None;
        }
        // Queued sends must drain before the session next settles in Idle.
        if !self.enablement.is_enabled() {
            debug!(session = ?self.session.state(), "satellite not enabled, rejecting datagram");
            handler(Err(SatelliteError::InvalidModemState));
            return None;
        }
        let (id, actions) = self.dispatcher.enqueue(datagram, handler, Instant::now());
        self.apply_dispatch_actions(actions);
        id
    }

    fn apply_dispatch_actions(&mut self, actions: DispatchActions) {
        let mut work: VecDeque<DispatchAction> = actions.into_iter().collect();
        while let Some(action) = work.pop_front() {
            match action {
                DispatchAction::Submit(id) => {
                    let Some(transport) = self.transport.as_mut() else {
                        warn!(id, "no modem transport, failing datagram");
                        let follow = self.dispatcher.on_send_complete(
                            id,
                            Err(SatelliteError::InvalidInternalState),
                            Instant::now(),
                        );
                        work.extend(follow);
                        continue;
                    };
                    match self.dispatcher.datagram(id) {
                        Some(datagram) => transport.send_datagram(id, datagram),
                        None => error!(id, "submitted datagram missing from queue"),
                    }
                }
                DispatchAction::ReportSend { state, pending, result } => {
                    let change = self.transfer.record_send_state(state, pending, result);
                    self.feed_session(SessionEvent::TransferStateChanged(change));
                }
            }
        }
    }

    /// Complete every queued datagram with `reason`. The session has already
    /// powered off, so only the aggregator hears about it.
    fn abort_datagrams(&mut self, reason: SatelliteError) {
        for action in self.dispatcher.abort_all(reason) {
            if let DispatchAction::ReportSend { state, pending, result } = action {
                let _ = self.transfer.record_send_state(state, pending, result);
            }
        }
        self.transfer.reset_to_idle();
    }

    // === Session ===

    fn feed_session(&mut self, event: SessionEvent) {
        let effects = self.session.handle_event(event);
        for effect in effects {
            match effect {
                SessionEffect::StartListeningTimer { duration, generation } => {
                    debug!(?duration, generation, "listening timer armed");
                }
                SessionEffect::CancelListeningTimer => {
                    debug!("listening timer cancelled");
                }
                SessionEffect::SuspendCellularCoexistence => {
                    if let Some(transport) = self.transport.as_mut() {
                        transport.set_cellular_coexistence_suspended(true);
                    }
                }
                SessionEffect::RestoreCellularCoexistence => {
                    if let Some(transport) = self.transport.as_mut() {
                        transport.set_cellular_coexistence_suspended(false);
                    }
                }
                SessionEffect::ResetTransferState => {
                    self.transfer.reset_to_idle();
                }
            }
        }
    }

    pub fn on_listening_timer_expired(&mut self, generation: u64) {
        self.feed_session(SessionEvent::ListeningTimerExpired { generation });
    }

    pub fn listening_timer(&self) -> Option<ListeningTimer> {
        self.session.listening_timer()
    }

    pub fn set_listening_timeouts(&mut self, after_send: Duration, after_receive: Duration) {
        self.config = self.config.clone().with_listening_timeouts(after_send, after_receive);
        self.session.set_listening_timeouts(after_send, after_receive);
    }

    // === Transport ===

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SendComplete { id, result } => {
                let actions = self.dispatcher.on_send_complete(id, result, Instant::now());
                self.apply_dispatch_actions(actions);
            }
            TransportEvent::SetEnabledComplete { serial, result } => {
                let actions = self.enablement.on_modem_response(serial, result);
                self.apply_enablement_actions(actions);
            }
            TransportEvent::Capabilities(result) => {
                if let Ok(caps) = &result {
                    info!(?caps, "satellite capabilities received");
                    self.capabilities = Some(caps.clone());
                }
                for waiter in self.capability_waiters.drain(..) {
                    waiter(result.clone());
                }
            }
            TransportEvent::AttachComplete { subscription, enabled, result } => {
                self.attach.on_attach_complete(subscription, enabled, result);
            }
            TransportEvent::ProvisionComplete { token, result } => {
                self.provision.on_provision_complete(&token, result);
            }
            TransportEvent::DeprovisionComplete { token, result } => {
                self.provision.on_deprovision_complete(&token, result);
            }
            TransportEvent::ModemStateChanged(ModemState::Off) => {
                let actions = self.enablement.on_modem_powered_off();
                self.apply_enablement_actions(actions);
            }
            TransportEvent::ModemStateChanged(state) => {
                debug!(?state, "modem state notification");
            }
            TransportEvent::ProvisionStateChanged(provisioned) => {
                self.provision.set_provisioned(provisioned);
            }
            TransportEvent::ReceiveStateChanged { state, pending, result } => {
                let change = self.transfer.record_receive_state(state, pending, result);
                self.feed_session(SessionEvent::TransferStateChanged(change));
            }
        }
    }

    pub fn attach_transport(&mut self, transport: Box<dyn ModemTransport>) {
        info!("modem transport attached");
        self.transport = Some(transport);
    }

    pub fn detach_transport(&mut self) -> Option<Box<dyn ModemTransport>> {
        info!("modem transport detached");
        self.transport.take()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn request_capabilities(&mut self, callback: CapabilitiesCallback) {
        if !self.config.satellite_supported {
            callback(Err(SatelliteError::RequestNotSupported));
            return;
        }
        if let Some(caps) = &self.capabilities {
            callback(Ok(caps.clone()));
            return;
        }
        self.capability_waiters.push(callback);
        if self.capability_waiters.len() > 1 {
            return;
        }
        match self.transport.as_mut() {
            Some(transport) => transport.query_capabilities(),
            None => {
                for waiter in self.capability_waiters.drain(..) {
                    waiter(Err(SatelliteError::InvalidInternalState));
                }
            }
        }
    }

    pub fn capabilities(&self) -> Option<&SatelliteCapabilities> {
        self.capabilities.as_ref()
    }

    // === Carrier attach ===

    pub fn add_attach_restriction(&mut self, subscription: SubscriptionId, reason: RestrictionReason) {
        if reason == RestrictionReason::User {
            self.persist_attach_user_enabled(subscription, false);
        }
        let command = self.attach.add_restriction(subscription, reason);
        self.issue_attach_command(command);
    }

    pub fn remove_attach_restriction(&mut self, subscription: SubscriptionId, reason: RestrictionReason) {
        if reason == RestrictionReason::User {
            self.persist_attach_user_enabled(subscription, true);
        }
        let command = self.attach.remove_restriction(subscription, reason);
        self.issue_attach_command(command);
    }

    pub fn attach_restrictions(&self, subscription: SubscriptionId) -> Vec<RestrictionReason> {
        self.attach.restrictions(subscription)
    }

    pub fn set_modem_attach_state(&mut self, subscription: SubscriptionId, enabled: bool) {
        self.attach.set_modem_attach_state(subscription, enabled);
    }

    fn persist_attach_user_enabled(&mut self, subscription: SubscriptionId, enabled: bool) {
        if let Err(e) = self.settings.set_attach_user_enabled(subscription, enabled) {
            error!(subscription, "failed to persist attach flag: {}", e);
        }
    }

    fn issue_attach_command(&mut self, command: Option<AttachCommand>) {
        let Some(AttachCommand { subscription, enabled }) = command else {
            return;
        };
        match self.transport.as_mut() {
            Some(transport) => transport.set_attach_enabled(subscription, enabled),
            None => {
                warn!(subscription, "no modem transport for attach command");
                self.attach
                    .on_attach_complete(subscription, enabled, Err(SatelliteError::InvalidInternalState));
            }
        }
    }

    // === Provisioning ===

    pub fn provision(&mut self, token: &str, data: &[u8], callback: ProvisionCallback) -> CancelToken {
        let cancel = CancelToken::new(token, Arc::clone(&self.cancel_sink));
        if !self.config.satellite_supported {
            callback(Err(SatelliteError::RequestNotSupported));
            return cancel;
        }
        if self.transport.is_none() {
            callback(Err(SatelliteError::InvalidInternalState));
            return cancel;
        }
        let command = self.provision.provision(token, data, callback);
        self.issue_provision_command(command);
        cancel
    }

    pub fn deprovision(&mut self, token: &str, callback: ProvisionCallback) {
        if !self.config.satellite_supported {
            callback(Err(SatelliteError::RequestNotSupported));
            return;
        }
        let command = self.provision.deprovision(token, Some(callback));
        self.issue_provision_command(Some(command));
    }

    pub fn cancel_provision(&mut self, token: &str) {
        let command = self.provision.cancel(token);
        self.issue_provision_command(Some(command));
    }

    /// Act on tokens cancelled since the last call. Only needed while no
    /// sink is installed.
    pub fn process_pending_cancellations(&mut self) {
        let tokens = match self.cancel_route.lock() {
            Ok(mut route) => std::mem::take(&mut route.queued),
            Err(_) => return,
        };
        for token in tokens {
            self.cancel_provision(&token);
        }
    }

    /// Deliver cancellations to `sink`, e.g. the service command queue. Tokens
    /// already handed out follow, and anything queued so far is passed on.
    pub fn set_cancel_sink(&mut self, sink: CancelSink) {
        let queued = match self.cancel_route.lock() {
            Ok(mut route) => {
                route.sink = Some(Arc::clone(&sink));
                std::mem::take(&mut route.queued)
            }
            Err(_) => return,
        };
        for token in queued {
            sink(&token);
        }
    }

    fn issue_provision_command(&mut self, command: Option<ProvisionCommand>) {
        let Some(command) = command else {
            return;
        };
        match (self.transport.as_mut(), command) {
            (Some(transport), ProvisionCommand::Provision { token, data }) => transport.provision(&token, &data),
            (Some(transport), ProvisionCommand::Deprovision { token }) => transport.deprovision(&token),
            (None, ProvisionCommand::Provision { token, .. }) => {
                self.provision
                    .on_provision_complete(&token, Err(SatelliteError::InvalidInternalState));
            }
            (None, ProvisionCommand::Deprovision { token }) => {
                self.provision
                    .on_deprovision_complete(&token, Err(SatelliteError::InvalidInternalState));
            }
        }
    }

    // === Listeners ===

    pub fn register_session_listener<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&SessionState) -> Result<(), ListenerGone> + Send + 'static,
    {
        self.session.register_listener(callback)
    }

    pub fn unregister_session_listener(&mut self, handle: ListenerHandle) -> bool {
        self.session.listeners_mut().unregister(handle)
    }

    pub fn register_transfer_listener<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&TransferSnapshot) -> Result<(), ListenerGone> + Send + 'static,
    {
        self.transfer.register_listener(callback)
    }

    pub fn unregister_transfer_listener(&mut self, handle: ListenerHandle) -> bool {
        self.transfer.listeners_mut().unregister(handle)
    }

    pub fn register_provision_listener<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&bool) -> Result<(), ListenerGone> + Send + 'static,
    {
        self.provision.register_listener(callback)
    }

    pub fn unregister_provision_listener(&mut self, handle: ListenerHandle) -> bool {
        self.provision.listeners_mut().unregister(handle)
    }

    // === State ===

    pub fn set_device_aligned(&mut self, aligned: bool) {
        self.transfer.set_device_aligned(aligned);
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn transfer_snapshot(&self) -> &TransferSnapshot {
        self.transfer.snapshot()
    }

    pub fn send_state(&self) -> TransferState {
        self.transfer.snapshot().send_state
    }

    pub fn is_enabled(&self) -> bool {
        self.enablement.is_enabled()
    }

    pub fn is_provisioned(&self) -> bool {
        self.provision.is_provisioned()
    }

    pub fn enablement(&self) -> &EnablementOrchestrator {
        &self.enablement
    }

    pub fn dispatcher(&self) -> &DatagramDispatcher {
        &self.dispatcher
    }

    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.get_stats()
    }

    pub fn is_coexistence_suspended(&self) -> bool {
        self.session.is_coexistence_suspended()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let stats = self.dispatcher.get_stats();
        SessionSnapshot {
            session_state: self.session.state(),
            transfer: self.transfer.snapshot().clone(),
            enabled: self.enablement.is_enabled(),
            demo_mode: self.enablement.is_demo_mode(),
            provisioned: self.provision.is_provisioned(),
            waiting_for_radio_quiescence: self.enablement.is_waiting_for_radio_quiescence(),
            emergency_pending: self.dispatcher.emergency_pending(),
            non_emergency_pending: self.dispatcher.non_emergency_pending(),
            datagrams_sent: stats.total_sent,
            datagrams_aborted: stats.total_aborted,
        }
    }
}

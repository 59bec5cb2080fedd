//! Satellite service provisioning.
//!
//! A provision call cannot be pre-empted once it reaches the modem. Cancelling
//! its [`CancelToken`] instead queues a compensating deprovision for the same
//! token.

use crate::error::{SatelliteError, SatelliteResult};
use crate::listener::{ListenerGone, ListenerHandle, ListenerRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type ProvisionCallback = Box<dyn FnOnce(SatelliteResult) + Send>;

/// Where a triggered cancel token sends its provisioning token.
pub type CancelSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Handed to the caller of `provision`; may be triggered from any thread.
#[derive(Clone)]
pub struct CancelToken {
    token: String,
    fired: Arc<AtomicBool>,
    sink: CancelSink,
}

impl CancelToken {
    pub fn new(token: impl Into<String>, sink: CancelSink) -> Self {
        Self {
            token: token.into(),
            fired: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// Returns false if the token was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        (self.sink)(&self.token);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("token", &self.token)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionCommand {
    Provision { token: String, data: Vec<u8> },
    Deprovision { token: String },
}

struct InFlightProvision {
    token: String,
    callback: ProvisionCallback,
}

struct InFlightDeprovision {
    token: String,
    callback: Option<ProvisionCallback>,
}

pub struct ProvisionManager {
    provisioned: bool,
    provisioning: Option<InFlightProvision>,
    deprovisioning: Vec<InFlightDeprovision>,
    listeners: ListenerRegistry<bool>,
}

impl ProvisionManager {
    pub fn new(provisioned: bool) -> Self {
        Self {
            provisioned,
            provisioning: None,
            deprovisioning: Vec::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn provision(
        &mut self,
        token: &str,
        data: &[u8],
        callback: ProvisionCallback,
    ) -> Option<ProvisionCommand> {
        if self.provisioned {
            debug!(token, "already provisioned");
            callback(Ok(()));
            return None;
        }
        if self.provisioning.is_some() {
            warn!(token, "provisioning already in progress");
            callback(Err(SatelliteError::ProvisionInProgress));
            return None;
        }
        info!(token, "provisioning satellite service");
        self.provisioning = Some(InFlightProvision {
            token: token.to_string(),
            callback,
        });
        Some(ProvisionCommand::Provision {
            token: token.to_string(),
            data: data.to_vec(),
        })
    }

    pub fn deprovision(&mut self, token: &str, callback: Option<ProvisionCallback>) -> ProvisionCommand {
        info!(token, compensating = callback.is_none(), "deprovisioning satellite service");
        self.deprovisioning.push(InFlightDeprovision {
            token: token.to_string(),
            callback,
        });
        ProvisionCommand::Deprovision {
            token: token.to_string(),
        }
    }

    /// A cancel token fired: issue the compensating deprovision.
    pub fn cancel(&mut self, token: &str) -> ProvisionCommand {
        info!(token, "provision cancelled");
        self.deprovision(token, None)
    }

    pub fn on_provision_complete(&mut self, token: &str, result: SatelliteResult) {
        if self.provisioning.as_ref().map(|p| p.token.as_str()) != Some(token) {
            warn!(token, "provision completion with no matching request");
            return;
        }
        let Some(in_flight) = self.provisioning.take() else {
            return;
        };
        if result.is_ok() {
            self.set_provisioned(true);
        }
        (in_flight.callback)(result);
    }

    pub fn on_deprovision_complete(&mut self, token: &str, result: SatelliteResult) {
        let Some(pos) = self.deprovisioning.iter().position(|d| d.token == token) else {
            warn!(token, "deprovision completion with no matching request");
            return;
        };
        let in_flight = self.deprovisioning.remove(pos);
        if result.is_ok() {
            self.set_provisioned(false);
        }
        if let Some(callback) = in_flight.callback {
            callback(result);
        }
    }

    /// Provisioning state as reported by the modem or a completion.
    pub fn set_provisioned(&mut self, provisioned: bool) {
        if self.provisioned != provisioned {
            self.provisioned = provisioned;
            info!(provisioned, "provision state changed");
            self.listeners.notify(&provisioned);
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    pub fn is_provisioning(&self) -> bool {
        self.provisioning.is_some()
    }

    pub fn register_listener<F>(&mut self, callback: F) -> ListenerHandle
    where
        F: FnMut(&bool) -> Result<(), ListenerGone> + Send + 'static,
    {
        self.listeners.register(callback)
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry<bool> {
        &mut self.listeners
    }
}

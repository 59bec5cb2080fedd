use crate::error::SatelliteResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

pub type SubscriptionId = i32;

/// Why satellite attach is currently restricted for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RestrictionReason {
    /// The user opted out of carrier satellite attach.
    User,
    Geolocation,
    Entitlement,
}

/// Modem command needed to bring attach state in line with the restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachCommand {
    pub subscription: SubscriptionId,
    pub enabled: bool,
}

#[derive(Debug, Default)]
struct SubscriptionAttach {
    reasons: BTreeSet<RestrictionReason>,
    /// Attach state the modem last confirmed.
    modem_enabled: Option<bool>,
    /// Attach state requested and not yet confirmed.
    requested: Option<bool>,
}

impl SubscriptionAttach {
    fn desired(&self) -> bool {
        self.reasons.is_empty()
    }

    fn expected_modem_state(&self) -> Option<bool> {
        self.requested.or(self.modem_enabled)
    }
}

#[derive(Debug, Default)]
pub struct AttachRestrictionManager {
    subscriptions: HashMap<SubscriptionId, SubscriptionAttach>,
}

impl AttachRestrictionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_restriction(
        &mut self,
        subscription: SubscriptionId,
        reason: RestrictionReason,
    ) -> Option<AttachCommand> {
        let entry = self.subscriptions.entry(subscription).or_default();
        if entry.reasons.insert(reason) {
            info!(subscription, ?reason, "attach restriction added");
        }
        self.evaluate(subscription)
    }

    pub fn remove_restriction(
        &mut self,
        subscription: SubscriptionId,
        reason: RestrictionReason,
    ) -> Option<AttachCommand> {
        let entry = self.subscriptions.entry(subscription).or_default();
        if entry.reasons.remove(&reason) {
            info!(subscription, ?reason, "attach restriction removed");
        }
        self.evaluate(subscription)
    }

    /// Issue a command only if the modem is not already (or about to be) in
    /// the desired attach state.
    pub fn evaluate(&mut self, subscription: SubscriptionId) -> Option<AttachCommand> {
        let entry = self.subscriptions.entry(subscription).or_default();
        let desired = entry.desired();
        if entry.expected_modem_state() == Some(desired) {
            debug!(subscription, desired, "attach state already matches");
            return None;
        }
        entry.requested = Some(desired);
        Some(AttachCommand {
            subscription,
            enabled: desired,
        })
    }

    pub fn on_attach_complete(
        &mut self,
        subscription: SubscriptionId,
        enabled: bool,
        result: SatelliteResult,
    ) {
        let entry = self.subscriptions.entry(subscription).or_default();
        if entry.requested == Some(enabled) {
            entry.requested = None;
        }
        match result {
            Ok(()) => {
                entry.modem_enabled = Some(enabled);
                info!(subscription, enabled, "modem attach state confirmed");
            }
            Err(err) => {
                warn!(subscription, enabled, %err, "modem rejected attach change");
            }
        }
    }

    /// Seed the last known modem-level state, e.g. from a modem query.
    pub fn set_modem_attach_state(&mut self, subscription: SubscriptionId, enabled: bool) {
        self.subscriptions.entry(subscription).or_default().modem_enabled = Some(enabled);
    }

    pub fn restrictions(&self, subscription: SubscriptionId) -> Vec<RestrictionReason> {
        self.subscriptions
            .get(&subscription)
            .map(|s| s.reasons.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_restricted(&self, subscription: SubscriptionId, reason: RestrictionReason) -> bool {
        self.subscriptions
            .get(&subscription)
            .is_some_and(|s| s.reasons.contains(&reason))
    }

    pub fn modem_attach_state(&self, subscription: SubscriptionId) -> Option<bool> {
        self.subscriptions.get(&subscription).and_then(|s| s.modem_enabled)
    }
}

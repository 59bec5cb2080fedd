use satsession::*;
use satsession::attach::{AttachCommand, AttachRestrictionManager};
use satsession::settings::{InMemorySettings, PersistedSettings, SettingsStore};
use satsession::transport::CommandLog;
use std::collections::BTreeMap;

const SUB: SubscriptionId = 1;

fn attach_calls(log: &CommandLog) -> Vec<(SubscriptionId, bool)> {
    log.snapshot()
        .into_iter()
        .filter_map(|c| match c {
            ModemCommand::SetAttachEnabled { subscription, enabled } => Some((subscription, enabled)),
            _ => None,
        })
        .collect()
}

fn setup(settings: &InMemorySettings) -> (SatelliteController, CommandLog) {
    let (transport, log) = RecordingTransport::new();
    let controller = SatelliteController::new(
        SessionConfig::default(),
        Some(Box::new(transport)),
        Box::new(settings.clone()),
    );
    (controller, log)
}

#[test]
fn test_first_restriction_disables_and_last_removal_enables() {
    let mut manager = AttachRestrictionManager::new();

    assert_eq!(
        manager.add_restriction(SUB, RestrictionReason::Geolocation),
        Some(AttachCommand {
            subscription: SUB,
            enabled: false
        })
    );
    manager.on_attach_complete(SUB, false, Ok(()));

    // Already disabled at the modem
    assert_eq!(manager.add_restriction(SUB, RestrictionReason::Entitlement), None);
    assert_eq!(manager.remove_restriction(SUB, RestrictionReason::Geolocation), None);

    assert_eq!(
        manager.remove_restriction(SUB, RestrictionReason::Entitlement),
        Some(AttachCommand {
            subscription: SUB,
            enabled: true
        })
    );
    assert!(manager.restrictions(SUB).is_empty());
}

#[test]
fn test_no_command_when_modem_already_matches() {
    let mut manager = AttachRestrictionManager::new();
    manager.set_modem_attach_state(SUB, true);

    assert_eq!(manager.remove_restriction(SUB, RestrictionReason::User), None);
    assert_eq!(manager.evaluate(SUB), None);
    assert_eq!(manager.modem_attach_state(SUB), Some(true));
}

#[test]
fn test_pending_request_suppresses_duplicate_command() {
    let mut manager = AttachRestrictionManager::new();

    assert!(manager.add_restriction(SUB, RestrictionReason::User).is_some());
    // Not confirmed yet, but already on its way
    assert_eq!(manager.add_restriction(SUB, RestrictionReason::Geolocation), None);
}

#[test]
fn test_failed_attach_change_is_retried_on_next_evaluation() {
    let mut manager = AttachRestrictionManager::new();

    manager.add_restriction(SUB, RestrictionReason::Entitlement);
    manager.on_attach_complete(SUB, false, Err(SatelliteError::Modem));
    assert_eq!(manager.modem_attach_state(SUB), None);

    assert_eq!(
        manager.evaluate(SUB),
        Some(AttachCommand {
            subscription: SUB,
            enabled: false
        })
    );
}

#[test]
fn test_subscriptions_are_independent() {
    let mut manager = AttachRestrictionManager::new();

    manager.add_restriction(1, RestrictionReason::User);
    assert!(manager.is_restricted(1, RestrictionReason::User));
    assert!(!manager.is_restricted(2, RestrictionReason::User));
    assert!(manager.add_restriction(2, RestrictionReason::User).is_some());
}

#[test]
fn test_controller_forwards_attach_commands() {
    let settings = InMemorySettings::default();
    let (mut controller, log) = setup(&settings);

    controller.add_attach_restriction(SUB, RestrictionReason::Geolocation);
    controller.on_transport_event(TransportEvent::AttachComplete {
        subscription: SUB,
        enabled: false,
        result: Ok(()),
    });
    controller.add_attach_restriction(SUB, RestrictionReason::Entitlement);
    controller.remove_attach_restriction(SUB, RestrictionReason::Geolocation);
    controller.remove_attach_restriction(SUB, RestrictionReason::Entitlement);

    assert_eq!(attach_calls(&log), vec![(SUB, false), (SUB, true)]);
}

#[test]
fn test_user_restriction_persisted() {
    let settings = InMemorySettings::default();
    let (mut controller, _log) = setup(&settings);

    controller.add_attach_restriction(SUB, RestrictionReason::User);
    assert_eq!(settings.load().attach_user_enabled.get(&SUB), Some(&false));

    controller.remove_attach_restriction(SUB, RestrictionReason::User);
    assert_eq!(settings.load().attach_user_enabled.get(&SUB), Some(&true));

    // Other reasons are not persisted
    controller.add_attach_restriction(2, RestrictionReason::Geolocation);
    assert!(!settings.load().attach_user_enabled.contains_key(&2));
}

#[test]
fn test_user_restriction_restored_at_startup() {
    let settings = InMemorySettings::new(PersistedSettings {
        satellite_mode_enabled: false,
        attach_user_enabled: BTreeMap::from([(3, false), (4, true)]),
    });

    let (controller, log) = setup(&settings);

    assert_eq!(controller.attach_restrictions(3), vec![RestrictionReason::User]);
    assert!(controller.attach_restrictions(4).is_empty());
    assert_eq!(attach_calls(&log), vec![(3, false)]);
}

#[test]
fn test_attach_without_transport_does_not_stick() {
    let mut settings = InMemorySettings::default();
    settings.set_attach_user_enabled(SUB, true).unwrap();
    let (mut controller, log) = setup(&settings);
    let transport = controller.detach_transport().unwrap();

    controller.add_attach_restriction(SUB, RestrictionReason::Entitlement);
    assert!(attach_calls(&log).is_empty());

    controller.attach_transport(transport);
    controller.add_attach_restriction(SUB, RestrictionReason::Geolocation);
    assert_eq!(attach_calls(&log), vec![(SUB, false)]);
}

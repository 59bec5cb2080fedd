use satsession::*;
use satsession::settings::InMemorySettings;
use satsession::transport::{CommandLog, RadioTechnology, SatelliteCapabilities};
use std::sync::{Arc, Mutex};

type Outcomes = Arc<Mutex<Vec<SatelliteResult>>>;

fn recorder(outcomes: &Outcomes) -> Box<dyn FnOnce(SatelliteResult) + Send> {
    let outcomes = Arc::clone(outcomes);
    Box::new(move |result: SatelliteResult| outcomes.lock().unwrap().push(result))
}

fn setup() -> (SatelliteController, CommandLog) {
    let (transport, log) = RecordingTransport::new();
    let controller = SatelliteController::new(
        SessionConfig::default(),
        Some(Box::new(transport)),
        Box::new(InMemorySettings::default()),
    );
    (controller, log)
}

fn provision_calls(log: &CommandLog) -> Vec<ModemCommand> {
    log.snapshot()
        .into_iter()
        .filter(|c| matches!(c, ModemCommand::Provision { .. } | ModemCommand::Deprovision { .. }))
        .collect()
}

fn capabilities() -> SatelliteCapabilities {
    SatelliteCapabilities {
        supported_technologies: vec![RadioTechnology::NbIotNtn],
        is_pointing_required: true,
        max_bytes_per_outgoing_datagram: 255,
    }
}

#[test]
fn test_provision_completes_and_notifies_listeners() {
    let (mut controller, log) = setup();
    let outcomes: Outcomes = Arc::default();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    controller.register_provision_listener(move |provisioned: &bool| {
        sink.lock().unwrap().push(*provisioned);
        Ok(())
    });

    controller.provision("token-a", b"payload", recorder(&outcomes));
    assert_eq!(
        provision_calls(&log),
        vec![ModemCommand::Provision {
            token: "token-a".into(),
            data: b"payload".to_vec()
        }]
    );
    assert!(!controller.is_provisioned());

    controller.on_transport_event(TransportEvent::ProvisionComplete {
        token: "token-a".into(),
        result: Ok(()),
    });

    assert!(controller.is_provisioned());
    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(())]);
    assert_eq!(*states.lock().unwrap(), vec![true]);
}

#[test]
fn test_second_provision_while_in_progress_rejected() {
    let (mut controller, log) = setup();
    let outcomes: Outcomes = Arc::default();

    controller.provision("token-a", b"", recorder(&outcomes));
    controller.provision("token-b", b"", recorder(&outcomes));

    assert_eq!(*outcomes.lock().unwrap(), vec![Err(SatelliteError::ProvisionInProgress)]);
    assert_eq!(provision_calls(&log).len(), 1);
}

#[test]
fn test_provision_when_already_provisioned_succeeds_without_modem() {
    let (mut controller, log) = setup();
    controller.on_transport_event(TransportEvent::ProvisionStateChanged(true));
    let outcomes: Outcomes = Arc::default();

    controller.provision("token-a", b"", recorder(&outcomes));

    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(())]);
    assert!(provision_calls(&log).is_empty());
}

#[test]
fn test_failed_provision_leaves_state_unchanged() {
    let (mut controller, _log) = setup();
    let outcomes: Outcomes = Arc::default();

    controller.provision("token-a", b"", recorder(&outcomes));
    controller.on_transport_event(TransportEvent::ProvisionComplete {
        token: "token-a".into(),
        result: Err(SatelliteError::NotAuthorized),
    });

    assert_eq!(*outcomes.lock().unwrap(), vec![Err(SatelliteError::NotAuthorized)]);
    assert!(!controller.is_provisioned());
}

#[test]
fn test_cancel_token_issues_compensating_deprovision() {
    let (mut controller, log) = setup();
    let outcomes: Outcomes = Arc::default();

    let cancel = controller.provision("token-a", b"", recorder(&outcomes));
    controller.on_transport_event(TransportEvent::ProvisionComplete {
        token: "token-a".into(),
        result: Ok(()),
    });
    assert!(controller.is_provisioned());

    assert!(cancel.cancel());
    assert!(!cancel.cancel());
    assert!(cancel.is_cancelled());
    controller.process_pending_cancellations();

    assert_eq!(
        provision_calls(&log).last(),
        Some(&ModemCommand::Deprovision {
            token: "token-a".into()
        })
    );
    controller.on_transport_event(TransportEvent::DeprovisionComplete {
        token: "token-a".into(),
        result: Ok(()),
    });
    assert!(!controller.is_provisioned());

    // Only one compensating call even though cancel was hit twice
    controller.process_pending_cancellations();
    assert_eq!(provision_calls(&log).len(), 2);
}

#[test]
fn test_deprovision_reports_result() {
    let (mut controller, _log) = setup();
    controller.on_transport_event(TransportEvent::ProvisionStateChanged(true));
    let outcomes: Outcomes = Arc::default();

    controller.deprovision("token-a", recorder(&outcomes));
    assert!(outcomes.lock().unwrap().is_empty());

    controller.on_transport_event(TransportEvent::DeprovisionComplete {
        token: "token-a".into(),
        result: Ok(()),
    });
    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(())]);
    assert!(!controller.is_provisioned());
}

#[test]
fn test_enable_requires_provisioning() {
    let (mut controller, log) = setup();
    let outcomes: Outcomes = Arc::default();

    controller.request_satellite_enabled(true, false, recorder(&outcomes));

    assert_eq!(*outcomes.lock().unwrap(), vec![Err(SatelliteError::NotProvisioned)]);
    assert!(log.last_set_enabled().is_none());
}

#[test]
fn test_capabilities_queried_once_then_cached() {
    let (mut controller, log) = setup();
    let answers = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..2 {
        let sink = Arc::clone(&answers);
        controller.request_capabilities(Box::new(move |r: SatelliteResult<SatelliteCapabilities>| sink.lock().unwrap().push(r)));
    }
    let queries = || {
        log.snapshot()
            .into_iter()
            .filter(|c| *c == ModemCommand::QueryCapabilities)
            .count()
    };
    assert_eq!(queries(), 1);
    assert!(answers.lock().unwrap().is_empty());

    controller.on_transport_event(TransportEvent::Capabilities(Ok(capabilities())));
    assert_eq!(answers.lock().unwrap().len(), 2);

    let sink = Arc::clone(&answers);
    controller.request_capabilities(Box::new(move |r: SatelliteResult<SatelliteCapabilities>| sink.lock().unwrap().push(r)));
    assert_eq!(queries(), 1);
    assert_eq!(answers.lock().unwrap().last(), Some(&Ok(capabilities())));
    assert_eq!(controller.capabilities(), Some(&capabilities()));
}

#[test]
fn test_capability_query_failure_is_not_cached() {
    let (mut controller, log) = setup();
    let answers = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&answers);
    controller.request_capabilities(Box::new(move |r: SatelliteResult<SatelliteCapabilities>| sink.lock().unwrap().push(r)));
    controller.on_transport_event(TransportEvent::Capabilities(Err(SatelliteError::Modem)));
    assert_eq!(*answers.lock().unwrap(), vec![Err(SatelliteError::Modem)]);

    let sink = Arc::clone(&answers);
    controller.request_capabilities(Box::new(move |r: SatelliteResult<SatelliteCapabilities>| sink.lock().unwrap().push(r)));
    let queries = log
        .snapshot()
        .into_iter()
        .filter(|c| *c == ModemCommand::QueryCapabilities)
        .count();
    assert_eq!(queries, 2);
}

use satsession::*;
use satsession::listener::ListenerGone;
use satsession::settings::InMemorySettings;
use satsession::transport::CommandLog;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn setup() -> (SatelliteController, CommandLog) {
    let (transport, log) = RecordingTransport::new();
    let mut controller = SatelliteController::new(
        SessionConfig::default().with_coexistence_radios(&[]),
        Some(Box::new(transport)),
        Box::new(InMemorySettings::default()),
    );
    controller.on_transport_event(TransportEvent::ProvisionStateChanged(true));
    (controller, log)
}

fn enable(controller: &mut SatelliteController, log: &CommandLog) {
    controller.request_satellite_enabled(true, false, Box::new(|_: SatelliteResult| {}));
    let (serial, _, _) = log.last_set_enabled().unwrap();
    controller.on_transport_event(TransportEvent::SetEnabledComplete { serial, result: Ok(()) });
}

fn disable(controller: &mut SatelliteController, log: &CommandLog) {
    controller.request_satellite_enabled(false, false, Box::new(|_: SatelliteResult| {}));
    let (serial, enable, _) = log.last_set_enabled().unwrap();
    assert!(!enable);
    controller.on_transport_event(TransportEvent::SetEnabledComplete { serial, result: Ok(()) });
}

fn send_one(controller: &mut SatelliteController) {
    let id = controller
        .send_datagram(SatelliteDatagram::emergency(b"sos".to_vec()), Box::new(|_: SatelliteResult| {}))
        .unwrap();
    controller.on_transport_event(TransportEvent::SendComplete { id, result: Ok(()) });
}

fn receive(controller: &mut SatelliteController, state: TransferState) {
    controller.on_transport_event(TransportEvent::ReceiveStateChanged {
        state,
        pending: 0,
        result: Ok(()),
    });
}

fn coexistence_calls(log: &CommandLog) -> Vec<bool> {
    log.snapshot()
        .into_iter()
        .filter_map(|c| match c {
            ModemCommand::SetCellularCoexistenceSuspended(suspended) => Some(suspended),
            _ => None,
        })
        .collect()
}

#[test]
fn test_initial_state_depends_on_support() {
    let (controller, _) = setup();
    assert_eq!(controller.session_state(), SessionState::PowerOff);

    let unsupported = SessionConfig {
        satellite_supported: false,
        ..SessionConfig::default()
    };
    let controller = SatelliteController::new(unsupported, None, Box::new(InMemorySettings::default()));
    assert_eq!(controller.session_state(), SessionState::Unavailable);
}

#[test]
fn test_unsupported_device_stays_unavailable() {
    let (transport, log) = RecordingTransport::new();
    let config = SessionConfig {
        satellite_supported: false,
        ..SessionConfig::default()
    };
    let mut controller = SatelliteController::new(config, Some(Box::new(transport)), Box::new(InMemorySettings::default()));
    let result = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);

    controller.request_satellite_enabled(true, false, Box::new(move |r: SatelliteResult| *slot.lock().unwrap() = Some(r)));

    assert_eq!(*result.lock().unwrap(), Some(Err(SatelliteError::RequestNotSupported)));
    assert_eq!(controller.session_state(), SessionState::Unavailable);
    assert!(log.snapshot().is_empty());
}

#[test]
fn test_enable_and_disable_move_between_power_off_and_idle() {
    let (mut controller, log) = setup();

    enable(&mut controller, &log);
    assert_eq!(controller.session_state(), SessionState::Idle);

    disable(&mut controller, &log);
    assert_eq!(controller.session_state(), SessionState::PowerOff);
}

#[test]
fn test_send_enters_listening_with_send_timeout() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);

    let id = controller
        .send_datagram(SatelliteDatagram::emergency(b"sos".to_vec()), Box::new(|_: SatelliteResult| {}))
        .unwrap();
    assert_eq!(controller.session_state(), SessionState::Transferring);
    assert!(controller.is_coexistence_suspended());
    assert_eq!(coexistence_calls(&log), vec![true]);

    controller.on_transport_event(TransportEvent::SendComplete { id, result: Ok(()) });
    assert_eq!(controller.session_state(), SessionState::Listening);

    let timer = controller.listening_timer().unwrap();
    assert_eq!(timer.duration, Duration::from_secs(20));

    controller.on_listening_timer_expired(timer.generation);
    assert_eq!(controller.session_state(), SessionState::Idle);
    assert!(controller.listening_timer().is_none());
    assert!(!controller.is_coexistence_suspended());
    assert_eq!(coexistence_calls(&log), vec![true, false]);
}

#[test]
fn test_receive_only_episode_uses_receive_timeout() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);

    receive(&mut controller, TransferState::Receiving);
    assert_eq!(controller.session_state(), SessionState::Transferring);

    receive(&mut controller, TransferState::ReceiveSuccess);
    assert_eq!(controller.session_state(), SessionState::Listening);
    assert_eq!(controller.listening_timer().unwrap().duration, Duration::from_secs(10));
}

#[test]
fn test_custom_listening_timeouts() {
    let (mut controller, log) = setup();
    controller.set_listening_timeouts(Duration::from_millis(1500), Duration::from_millis(700));
    enable(&mut controller, &log);

    send_one(&mut controller);
    assert_eq!(controller.listening_timer().unwrap().duration, Duration::from_millis(1500));
    assert_eq!(controller.config().listening_timeout_after_send_ms, 1500);
}

#[test]
fn test_stale_listening_timer_is_dropped() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);

    send_one(&mut controller);
    let first = controller.listening_timer().unwrap();

    // New traffic while listening cancels the first timer
    receive(&mut controller, TransferState::Receiving);
    assert_eq!(controller.session_state(), SessionState::Transferring);
    receive(&mut controller, TransferState::ReceiveSuccess);
    let second = controller.listening_timer().unwrap();
    assert_ne!(first.generation, second.generation);
    assert_eq!(second.duration, Duration::from_secs(10));

    controller.on_listening_timer_expired(first.generation);
    assert_eq!(controller.session_state(), SessionState::Listening);

    controller.on_listening_timer_expired(second.generation);
    assert_eq!(controller.session_state(), SessionState::Idle);
}

#[test]
fn test_send_failure_skips_listening() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);

    let id = controller
        .send_datagram(SatelliteDatagram::non_emergency(vec![1]), Box::new(|_: SatelliteResult| {}))
        .unwrap();
    controller.on_transport_event(TransportEvent::SendComplete {
        id,
        result: Err(SatelliteError::NotReachable),
    });

    assert_eq!(controller.session_state(), SessionState::Idle);
    assert!(controller.listening_timer().is_none());
    assert!(!controller.is_coexistence_suspended());
}

#[test]
fn test_failure_on_one_axis_waits_for_other_transfer() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);

    let id = controller
        .send_datagram(SatelliteDatagram::non_emergency(vec![1]), Box::new(|_: SatelliteResult| {}))
        .unwrap();
    receive(&mut controller, TransferState::Receiving);
    controller.on_transport_event(TransportEvent::SendComplete {
        id,
        result: Err(SatelliteError::Network),
    });

    // Still receiving
    assert_eq!(controller.session_state(), SessionState::Transferring);

    receive(&mut controller, TransferState::ReceiveSuccess);
    assert_eq!(controller.session_state(), SessionState::Listening);
}

#[test]
fn test_disable_while_listening_powers_off() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);
    send_one(&mut controller);
    let timer = controller.listening_timer().unwrap();

    disable(&mut controller, &log);
    assert_eq!(controller.session_state(), SessionState::PowerOff);
    assert!(controller.listening_timer().is_none());
    assert!(!controller.is_coexistence_suspended());

    // A timer armed before the disable has no effect
    controller.on_listening_timer_expired(timer.generation);
    assert_eq!(controller.session_state(), SessionState::PowerOff);
}

#[test]
fn test_transfer_state_reset_when_session_settles() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);

    receive(&mut controller, TransferState::Receiving);
    receive(&mut controller, TransferState::ReceiveFailed);
    assert_eq!(controller.session_state(), SessionState::Idle);

    let snapshot = controller.transfer_snapshot();
    assert_eq!(snapshot.send_state, TransferState::Idle);
    assert_eq!(snapshot.receive_state, TransferState::Idle);
}

#[test]
fn test_session_listeners_notified_and_pruned() {
    let (mut controller, log) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.register_session_listener(move |state: &SessionState| {
        sink.lock().unwrap().push(*state);
        Ok(())
    });
    let dead = controller.register_session_listener(|_: &SessionState| Err(ListenerGone));

    enable(&mut controller, &log);
    send_one(&mut controller);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![SessionState::Idle, SessionState::Transferring, SessionState::Listening]
    );
    // Already pruned on the first notification
    assert!(!controller.unregister_session_listener(dead));
}

#[test]
fn test_transfer_listener_sees_send_progress() {
    let (mut controller, log) = setup();
    enable(&mut controller, &log);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handle = controller.register_transfer_listener(move |snapshot| {
        sink.lock().unwrap().push(snapshot.send_state);
        Ok(())
    });

    send_one(&mut controller);

    let states = seen.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![TransferState::Sending, TransferState::SendSuccess, TransferState::Idle]
    );
    assert!(controller.unregister_transfer_listener(handle));
}

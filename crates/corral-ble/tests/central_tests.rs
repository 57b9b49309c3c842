//! Integration tests for the central workflow
//!
//! These tests drive a `Central` against the recording stub backend from
//! `corral-harness`, injecting collaborator events on the serialized event
//! channel exactly as a radio stack would deliver them.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use corral_ble::Central;
use corral_core::{
    central_event_channel, AdapterState, CentralEvent, CentralEventSender, Characteristic,
    CharacteristicId, CharacteristicProperties, CorralError, Peripheral, PeripheralId, ScanOptions,
    Service, ServiceId, TargetKind,
};
use corral_harness::{CentralCommand, StubCentral};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

const EVENT_DELAY: Duration = Duration::from_millis(20);
const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Guard an await against a hung correlation.
async fn bounded<T>(fut: impl std::future::Future<Output = T>) -> T {
    timeout(TEST_TIMEOUT, fut).await.expect("test timed out")
}

/// Bring a central up against a fresh stub backend.
async fn ready_central() -> (Arc<Central>, Arc<StubCentral>, CentralEventSender) {
    let backend = StubCentral::new();
    let (events_tx, events_rx) = central_event_channel();
    let central = Arc::new(Central::new(backend.clone(), events_rx));

    let (started, _) = tokio::join!(central.start(), async {
        sleep(EVENT_DELAY).await;
        events_tx
            .send(CentralEvent::StateChanged(AdapterState::PoweredOn))
            .unwrap();
    });
    started.expect("bring-up should succeed");
    (central, backend, events_tx)
}

fn bare_peripheral() -> Peripheral {
    Peripheral::new(PeripheralId::new())
}

// ----------------------------------------------------------------------------
// Bring-Up Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_start_completes_when_next_state_is_powered_on() {
    let (central, backend, _events_tx) = ready_central().await;

    assert_eq!(central.current_adapter_state(), AdapterState::PoweredOn);
    assert_eq!(backend.commands().await, vec![CentralCommand::Init]);
}

#[tokio::test]
async fn test_start_fails_on_other_next_state_and_can_retry() {
    let backend = StubCentral::new();
    let (events_tx, events_rx) = central_event_channel();
    let central = Central::new(backend.clone(), events_rx);

    let (started, _) = tokio::join!(central.start(), async {
        sleep(EVENT_DELAY).await;
        events_tx
            .send(CentralEvent::StateChanged(AdapterState::PoweredOff))
            .unwrap();
    });
    assert!(matches!(
        started,
        Err(CorralError::AdapterNotReady {
            state: AdapterState::PoweredOff
        })
    ));

    // The failure was terminal for that call only; a retry can succeed.
    let (retried, _) = tokio::join!(central.start(), async {
        sleep(EVENT_DELAY).await;
        events_tx
            .send(CentralEvent::StateChanged(AdapterState::PoweredOn))
            .unwrap();
    });
    retried.expect("retry should succeed");
}

#[tokio::test]
async fn test_start_waits_for_next_value_not_current() {
    let backend = StubCentral::new();
    let (events_tx, events_rx) = central_event_channel();
    let central = Central::new(backend, events_rx);

    // The adapter is already powered on before start is called...
    events_tx
        .send(CentralEvent::StateChanged(AdapterState::PoweredOn))
        .unwrap();
    sleep(EVENT_DELAY).await;
    assert_eq!(central.current_adapter_state(), AdapterState::PoweredOn);

    // ...but the retained current value must not complete the bring-up.
    let result = timeout(Duration::from_millis(100), central.start()).await;
    assert!(result.is_err(), "start must wait for the next emitted state");
}

#[tokio::test]
async fn test_operations_fail_before_bring_up() {
    let backend = StubCentral::new();
    let (_events_tx, events_rx) = central_event_channel();
    let central = Central::new(backend, events_rx);

    let result = central.scan(None, ScanOptions::default()).await;
    assert!(matches!(result, Err(CorralError::AdapterNotReady { .. })));
}

// ----------------------------------------------------------------------------
// Connection Correlation Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_connects_resolve_by_identity() {
    let (central, _backend, events_tx) = ready_central().await;
    let p1 = bare_peripheral();
    let p2 = bare_peripheral();

    let (r1, r2, _) = bounded(async {
        tokio::join!(central.connect(&p1), central.connect(&p2), async {
            sleep(EVENT_DELAY).await;
            // Deliver in reverse order of invocation.
            events_tx
                .send(CentralEvent::ConnectOutcome {
                    id: p2.id,
                    result: Ok(p2.clone()),
                })
                .unwrap();
            events_tx
                .send(CentralEvent::ConnectOutcome {
                    id: p1.id,
                    result: Ok(p1.clone()),
                })
                .unwrap();
        })
    })
    .await;

    // Each caller got the outcome bearing its own identity.
    assert_eq!(r1.unwrap().id, p1.id);
    assert_eq!(r2.unwrap().id, p2.id);
}

#[tokio::test]
async fn test_stale_connect_outcome_cannot_reresolve() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();

    let (connected, _) = bounded(async {
        tokio::join!(central.connect(&peripheral), async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::ConnectOutcome {
                    id: peripheral.id,
                    result: Ok(peripheral.clone()),
                })
                .unwrap();
            // Duplicate outcome for the same identity: dropped, not queued.
            events_tx
                .send(CentralEvent::ConnectOutcome {
                    id: peripheral.id,
                    result: Err("stale duplicate".into()),
                })
                .unwrap();
        })
    })
    .await;
    connected.expect("first outcome wins");

    // A later connect is resolved by its own outcome, not the stale error.
    let (reconnected, _) = bounded(async {
        tokio::join!(central.connect(&peripheral), async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::ConnectOutcome {
                    id: peripheral.id,
                    result: Ok(peripheral.clone()),
                })
                .unwrap();
        })
    })
    .await;
    reconnected.expect("fresh outcome resolves fresh call");
}

#[tokio::test]
async fn test_connect_failure_reported_to_caller() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();

    let (connected, _) = bounded(async {
        tokio::join!(central.connect(&peripheral), async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::ConnectOutcome {
                    id: peripheral.id,
                    result: Err("link layer refused".into()),
                })
                .unwrap();
        })
    })
    .await;

    match connected {
        Err(CorralError::OperationFailed(reason)) => assert_eq!(reason, "link layer refused"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Discovery Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_discover_service_reports_target_not_found() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let requested = ServiceId::new();

    // Transport-level discovery succeeds, but the refreshed snapshot only
    // carries some other service.
    let mut refreshed = peripheral.clone();
    refreshed.services = vec![Service::new(ServiceId::new())];

    let (discovered, _) = bounded(async {
        tokio::join!(central.discover_service(&peripheral, requested), async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::ServicesDiscovered {
                    id: peripheral.id,
                    result: Ok(refreshed.clone()),
                })
                .unwrap();
        })
    })
    .await;

    assert!(matches!(
        discovered,
        Err(CorralError::TargetNotFound {
            kind: TargetKind::Service,
            ..
        })
    ));
}

#[tokio::test]
async fn test_discover_characteristic_reports_target_not_found() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let service = Service::new(ServiceId::new());
    let requested = CharacteristicId::new();

    let refreshed = Service::new(service.id).with_characteristic(Characteristic::new(
        CharacteristicId::new(),
        CharacteristicProperties::default(),
    ));

    let (discovered, _) = bounded(async {
        tokio::join!(
            central.discover_characteristic(&peripheral, &service, requested),
            async {
                sleep(EVENT_DELAY).await;
                events_tx
                    .send(CentralEvent::CharacteristicsDiscovered {
                        service: service.id,
                        result: Ok(refreshed.clone()),
                    })
                    .unwrap();
            }
        )
    })
    .await;

    assert!(matches!(
        discovered,
        Err(CorralError::TargetNotFound {
            kind: TargetKind::Characteristic,
            ..
        })
    ));
}

#[tokio::test]
async fn test_duplicate_discovery_is_suppressed() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();

    let mut discoveries = central.peripherals();
    events_tx
        .send(CentralEvent::PeripheralDiscovered(peripheral.clone()))
        .unwrap();
    events_tx
        .send(CentralEvent::PeripheralDiscovered(peripheral.clone()))
        .unwrap();
    sleep(EVENT_DELAY).await;

    // Exactly one broadcast emission for the two discovery events.
    let announced = discoveries.recv().await.unwrap();
    assert_eq!(announced.id, peripheral.id);
    assert!(discoveries.try_recv().is_err());
}

// ----------------------------------------------------------------------------
// Value Read Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_read_value_raw_allows_absent_payload() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let characteristic =
        Characteristic::new(CharacteristicId::new(), CharacteristicProperties::default());

    let (read, _) = bounded(async {
        tokio::join!(central.read_value(&peripheral, &characteristic), async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::ValueUpdated {
                    characteristic: characteristic.id,
                    result: Ok(None),
                })
                .unwrap();
        })
    })
    .await;

    // No payload and no error: `None`, not a failure.
    assert!(read.unwrap().is_none());
}

#[tokio::test]
async fn test_read_value_decoded_rejects_absent_payload() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let characteristic =
        Characteristic::new(CharacteristicId::new(), CharacteristicProperties::default());

    let (read, _) = bounded(async {
        tokio::join!(
            central.read_value_with(&peripheral, &characteristic, |bytes| {
                std::str::from_utf8(bytes).ok().map(str::to_owned)
            }),
            async {
                sleep(EVENT_DELAY).await;
                events_tx
                    .send(CentralEvent::ValueUpdated {
                        characteristic: characteristic.id,
                        result: Ok(None),
                    })
                    .unwrap();
            }
        )
    })
    .await;

    assert!(matches!(read, Err(CorralError::ValueAbsent)));
}

#[tokio::test]
async fn test_read_value_decoded_surfaces_decode_failure() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let characteristic =
        Characteristic::new(CharacteristicId::new(), CharacteristicProperties::default());

    let (read, _) = bounded(async {
        tokio::join!(
            central.read_value_with(&peripheral, &characteristic, |bytes| {
                std::str::from_utf8(bytes).ok().map(str::to_owned)
            }),
            async {
                sleep(EVENT_DELAY).await;
                events_tx
                    .send(CentralEvent::ValueUpdated {
                        characteristic: characteristic.id,
                        result: Ok(Some(vec![0xFF, 0xFE])),
                    })
                    .unwrap();
            }
        )
    })
    .await;

    assert!(matches!(read, Err(CorralError::DecodeFailed(_))));
}

// ----------------------------------------------------------------------------
// Stream Semantics Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_adapter_state_replays_but_discoveries_do_not() {
    let (central, _backend, events_tx) = ready_central().await;

    events_tx
        .send(CentralEvent::PeripheralDiscovered(bare_peripheral()))
        .unwrap();
    sleep(EVENT_DELAY).await;

    // A late adapter-state observer sees the current value immediately.
    let state_observer = central.adapter_state();
    assert_eq!(*state_observer.borrow(), AdapterState::PoweredOn);

    // A late discovery subscriber sees nothing from the past.
    let mut late_discoveries = central.peripherals();
    assert!(late_discoveries.try_recv().is_err());
}

#[tokio::test]
async fn test_unsolicited_value_updates_land_on_notification_stream() {
    let (central, _backend, events_tx) = ready_central().await;
    let characteristic = CharacteristicId::new();

    let mut notifications = central.notifications();
    events_tx
        .send(CentralEvent::ValueUpdated {
            characteristic,
            result: Ok(Some(b"push".to_vec())),
        })
        .unwrap();

    let notification = bounded(notifications.recv()).await.unwrap();
    assert_eq!(notification.characteristic, characteristic);
    assert_eq!(notification.value, b"push");
}

#[tokio::test]
async fn test_pending_read_takes_precedence_over_notification_stream() {
    let (central, _backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let characteristic =
        Characteristic::new(CharacteristicId::new(), CharacteristicProperties::default());

    let mut notifications = central.notifications();
    let (read, _) = bounded(async {
        tokio::join!(central.read_value(&peripheral, &characteristic), async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::ValueUpdated {
                    characteristic: characteristic.id,
                    result: Ok(Some(b"reply".to_vec())),
                })
                .unwrap();
        })
    })
    .await;

    assert_eq!(read.unwrap().unwrap(), b"reply");
    assert!(notifications.try_recv().is_err());
}

// ----------------------------------------------------------------------------
// Disconnect and Cleanup Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_turns_off_notifying_characteristics() {
    let (central, backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();
    let service_id = ServiceId::new();
    let characteristic = Characteristic::new(
        CharacteristicId::new(),
        CharacteristicProperties {
            notify: true,
            ..Default::default()
        },
    );

    // Connect, discover the service and characteristic, then subscribe.
    let mut with_service = peripheral.clone();
    with_service.services = vec![Service::new(service_id)];
    let refreshed_service = Service::new(service_id).with_characteristic(characteristic.clone());

    let (connected, _) = tokio::join!(central.connect(&peripheral), async {
        sleep(EVENT_DELAY).await;
        events_tx
            .send(CentralEvent::ConnectOutcome {
                id: peripheral.id,
                result: Ok(peripheral.clone()),
            })
            .unwrap();
    });
    let connected = connected.unwrap();

    let (service, _) = tokio::join!(central.discover_service(&connected, service_id), async {
        sleep(EVENT_DELAY).await;
        events_tx
            .send(CentralEvent::ServicesDiscovered {
                id: peripheral.id,
                result: Ok(with_service.clone()),
            })
            .unwrap();
    });
    let service = service.unwrap();

    let (found, _) = tokio::join!(
        central.discover_characteristic(&connected, &service, characteristic.id),
        async {
            sleep(EVENT_DELAY).await;
            events_tx
                .send(CentralEvent::CharacteristicsDiscovered {
                    service: service_id,
                    result: Ok(refreshed_service.clone()),
                })
                .unwrap();
        }
    );
    let found = found.unwrap();

    central.set_notify(&connected, &found, true).await.unwrap();
    central.disconnect(&connected).await.unwrap();

    let commands = backend.commands().await;
    let notify_off = commands
        .iter()
        .position(|c| {
            matches!(
                c,
                CentralCommand::SetNotify { enabled: false, characteristic, .. }
                    if *characteristic == found.id
            )
        })
        .expect("notify must be turned off");
    let cancel = commands
        .iter()
        .position(|c| matches!(c, CentralCommand::CancelConnect(id) if *id == peripheral.id))
        .expect("connection must be cancelled");
    assert!(notify_off < cancel, "notify off must precede cancellation");
}

#[tokio::test]
async fn test_forget_cancels_and_drops_from_known_set() {
    let (central, backend, events_tx) = ready_central().await;
    let peripheral = bare_peripheral();

    events_tx
        .send(CentralEvent::PeripheralDiscovered(peripheral.clone()))
        .unwrap();
    sleep(EVENT_DELAY).await;
    assert_eq!(central.known_peripherals().await.len(), 1);

    central.forget(&peripheral).await.unwrap();

    assert!(central.known_peripherals().await.is_empty());
    assert!(backend
        .commands()
        .await
        .contains(&CentralCommand::CancelConnect(peripheral.id)));

    // Forgotten peripherals are eligible for re-announcement.
    let mut discoveries = central.peripherals();
    events_tx
        .send(CentralEvent::PeripheralDiscovered(peripheral.clone()))
        .unwrap();
    let announced = bounded(discoveries.recv()).await.unwrap();
    assert_eq!(announced.id, peripheral.id);
}

#[tokio::test]
async fn test_cleanup_disconnects_only_connected_and_connecting() {
    let (central, backend, events_tx) = ready_central().await;
    central.scan(None, ScanOptions::default()).await.unwrap();
    assert!(central.is_scanning());

    // A: connected.
    let a = bare_peripheral();
    let (connected, _) = tokio::join!(central.connect(&a), async {
        sleep(EVENT_DELAY).await;
        events_tx
            .send(CentralEvent::ConnectOutcome {
                id: a.id,
                result: Ok(a.clone()),
            })
            .unwrap();
    });
    connected.unwrap();

    // B: connecting (outcome never arrives).
    let b = bare_peripheral();
    let pending_connect = {
        let central = central.clone();
        let b = b.clone();
        tokio::spawn(async move { central.connect(&b).await })
    };
    sleep(EVENT_DELAY).await;

    // C: merely discovered.
    let c = bare_peripheral();
    events_tx
        .send(CentralEvent::PeripheralDiscovered(c.clone()))
        .unwrap();
    sleep(EVENT_DELAY).await;

    // A's disconnect attempt will fail; cleanup must proceed regardless.
    backend.fail_cancel_connect(a.id).await;

    central.cleanup().await;

    let commands = backend.commands().await;
    assert!(commands.contains(&CentralCommand::CancelConnect(a.id)));
    assert!(commands.contains(&CentralCommand::CancelConnect(b.id)));
    assert!(!commands.contains(&CentralCommand::CancelConnect(c.id)));
    assert!(commands.contains(&CentralCommand::StopScan));

    assert!(!central.is_scanning());
    assert!(central.known_peripherals().await.is_empty());

    pending_connect.abort();
}

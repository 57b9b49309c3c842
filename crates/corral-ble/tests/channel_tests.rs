//! Integration tests for the rendezvous channel
//!
//! The handshake test runs the full discover/connect/discover/subscribe
//! chain over the in-process virtual radio from `corral-harness`; the
//! re-entry test uses the recording stubs to prove `open` never drives a
//! second adapter bring-up.

use std::time::Duration;

use tokio::time::{sleep, timeout};
use uuid::Uuid;

use corral_ble::{Advertiser, Central, ChannelEvent, RendezvousChannel};
use corral_core::{
    central_event_channel, peripheral_event_channel, AdapterState, CentralEvent,
    CharacteristicId, Peripheral, PeripheralId,
};
use corral_harness::{CentralCommand, PeripheralCommand, StubCentral, StubPeripheral, VirtualRadio};

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

async fn next_event(
    events: &mut tokio::sync::broadcast::Receiver<ChannelEvent>,
) -> ChannelEvent {
    timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("channel event should arrive")
        .expect("channel stream should stay open")
}

// ----------------------------------------------------------------------------
// Handshake Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_rendezvous_handshake_end_to_end() {
    let VirtualRadio {
        central_backend,
        central_events,
        peripheral_backend,
        peripheral_events,
    } = VirtualRadio::new();

    let central = Central::new(central_backend, central_events);
    let advertiser = Advertiser::new(peripheral_backend, peripheral_events);
    let token = Uuid::new_v4();
    let channel = RendezvousChannel::new(central, advertiser, token);

    let mut events = channel.open().await;

    // Discovery, then the full bind chain.
    let found = next_event(&mut events).await;
    let peer = match found {
        ChannelEvent::PeerFound(id) => id,
        other => panic!("expected PeerFound, got {:?}", other),
    };

    match next_event(&mut events).await {
        ChannelEvent::Linked {
            peripheral,
            characteristic,
        } => {
            assert_eq!(peripheral, peer);
            assert_eq!(characteristic, CharacteristicId::from_uuid(token));
        }
        other => panic!("expected Linked, got {:?}", other),
    }

    // Central-to-peripheral traffic: a write surfaces as a channel message.
    channel.send(b"ping".to_vec()).await.unwrap();
    match next_event(&mut events).await {
        ChannelEvent::Message(value) => assert_eq!(value, b"ping"),
        other => panic!("expected Message, got {:?}", other),
    }

    // Peripheral-to-central traffic: a notification on the subscribed token
    // characteristic comes back as a channel message too.
    assert!(channel
        .advertiser()
        .notify(CharacteristicId::from_uuid(token), b"pong".to_vec())
        .await
        .unwrap());
    match next_event(&mut events).await {
        ChannelEvent::Message(value) => assert_eq!(value, b"pong"),
        other => panic!("expected Message, got {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Re-Entry Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_open_twice_reuses_stream_and_adapters() {
    let central_backend = StubCentral::new();
    let (central_tx, central_rx) = central_event_channel();
    let central = Central::new(central_backend.clone(), central_rx);

    let peripheral_backend = StubPeripheral::new();
    let (_peripheral_tx, peripheral_rx) = peripheral_event_channel();
    let advertiser = Advertiser::new(peripheral_backend.clone(), peripheral_rx);

    let channel = RendezvousChannel::new(central, advertiser, Uuid::new_v4());

    let mut first = channel.open().await;
    let mut second = channel.open().await;
    sleep(Duration::from_millis(50)).await;

    // One bring-up per role, no matter how many times the channel is opened.
    let central_inits = central_backend
        .commands()
        .await
        .iter()
        .filter(|c| **c == CentralCommand::Init)
        .count();
    assert_eq!(central_inits, 1);
    let peripheral_inits = peripheral_backend
        .commands()
        .await
        .iter()
        .filter(|c| **c == PeripheralCommand::Init)
        .count();
    assert_eq!(peripheral_inits, 1);

    // Both receivers observe the same underlying stream.
    central_tx
        .send(CentralEvent::StateChanged(AdapterState::PoweredOn))
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    let discovered = Peripheral::new(PeripheralId::new());
    central_tx
        .send(CentralEvent::PeripheralDiscovered(discovered.clone()))
        .unwrap();

    for stream in [&mut first, &mut second] {
        match timeout(TEST_TIMEOUT, stream.recv())
            .await
            .expect("event should arrive")
            .expect("stream should stay open")
        {
            ChannelEvent::PeerFound(id) => assert_eq!(id, discovered.id),
            other => panic!("expected PeerFound, got {:?}", other),
        }
    }
}

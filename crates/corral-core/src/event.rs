//! Inbound event contract of the transport collaborator
//!
//! Each role receives its events on one unbounded channel with a single
//! producer, so the workflows can dispatch them strictly in arrival order.
//! Collaborator-reported failures cross the boundary as plain strings; the
//! workflows wrap them into [`crate::CorralError`] when resolving callers.

use tokio::sync::mpsc;

use crate::types::{
    AdapterState, CentralId, CharacteristicId, Peripheral, PeripheralId, ReadRequest, Service,
    ServiceId, WriteRequest,
};

// ----------------------------------------------------------------------------
// Central-Role Events
// ----------------------------------------------------------------------------

/// Unsolicited notifications delivered to the central role.
#[derive(Debug, Clone)]
pub enum CentralEvent {
    /// The central adapter changed state.
    StateChanged(AdapterState),
    /// A peripheral was seen while scanning.
    PeripheralDiscovered(Peripheral),
    /// Outcome of a previously issued connect command.
    ConnectOutcome {
        id: PeripheralId,
        result: Result<Peripheral, String>,
    },
    /// A connection ended. Informational only; no operation awaits this.
    Disconnected {
        id: PeripheralId,
        error: Option<String>,
    },
    /// Outcome of service discovery, carrying the refreshed snapshot.
    ServicesDiscovered {
        id: PeripheralId,
        result: Result<Peripheral, String>,
    },
    /// Outcome of characteristic discovery for one service.
    CharacteristicsDiscovered {
        service: ServiceId,
        result: Result<Service, String>,
    },
    /// A characteristic reported a value, either for a pending read or as a
    /// subscription push.
    ValueUpdated {
        characteristic: CharacteristicId,
        result: Result<Option<Vec<u8>>, String>,
    },
    /// Previously discovered services are no longer valid.
    ServicesInvalidated {
        peripheral: PeripheralId,
        services: Vec<ServiceId>,
    },
}

// ----------------------------------------------------------------------------
// Peripheral-Role Events
// ----------------------------------------------------------------------------

/// Unsolicited notifications delivered to the peripheral role.
#[derive(Debug, Clone)]
pub enum PeripheralEvent {
    /// The peripheral adapter changed state.
    StateChanged(AdapterState),
    /// Outcome of a start-advertising command.
    AdvertisingStarted { error: Option<String> },
    /// Outcome of an add-service command.
    ServiceAdded {
        service: ServiceId,
        error: Option<String>,
    },
    /// A remote central subscribed to or unsubscribed from a characteristic.
    SubscriptionChanged {
        central: CentralId,
        characteristic: CharacteristicId,
        subscribed: bool,
    },
    /// A remote central asked to read a characteristic.
    ReadRequestReceived(ReadRequest),
    /// A remote central wrote one or more characteristics.
    WriteRequestsReceived(Vec<WriteRequest>),
    /// The outgoing notification queue has room again.
    ReadyToNotify,
}

// ----------------------------------------------------------------------------
// Event Channels
// ----------------------------------------------------------------------------

pub type CentralEventSender = mpsc::UnboundedSender<CentralEvent>;
pub type CentralEventReceiver = mpsc::UnboundedReceiver<CentralEvent>;
pub type PeripheralEventSender = mpsc::UnboundedSender<PeripheralEvent>;
pub type PeripheralEventReceiver = mpsc::UnboundedReceiver<PeripheralEvent>;

/// Create the serialized notification channel for the central role.
pub fn central_event_channel() -> (CentralEventSender, CentralEventReceiver) {
    mpsc::unbounded_channel()
}

/// Create the serialized notification channel for the peripheral role.
pub fn peripheral_event_channel() -> (PeripheralEventSender, PeripheralEventReceiver) {
    mpsc::unbounded_channel()
}

//! Core primitives for the Corral BLE bridge
//!
//! Corral converts a callback-driven radio stack into a request/response
//! asynchronous API. This crate holds the pieces both role workflows are
//! built from:
//!
//! - [`types`] - identities, snapshot handles, and request types
//! - [`event`] - the inbound event contract of the transport collaborator
//! - [`backend`] - the command traits the collaborator implements
//! - [`correlate`] - the keyed single-fulfillment operation registry
//! - [`broadcast`] - multicast streams and the current-value state feed
//! - [`error`] - the error taxonomy surfaced to callers
//!
//! The workflows themselves (central role, peripheral role, and the
//! rendezvous channel composing the two) live in `corral-ble`.

pub mod backend;
pub mod broadcast;
pub mod correlate;
pub mod error;
pub mod event;
pub mod types;

// Public API exports
pub use backend::{CentralBackend, PeripheralBackend};
pub use broadcast::{EventBus, StateFeed};
pub use correlate::{Correlator, PendingOperation};
pub use error::{CorralError, Result, TargetKind};
pub use event::{
    central_event_channel, peripheral_event_channel, CentralEvent, CentralEventReceiver,
    CentralEventSender, PeripheralEvent, PeripheralEventReceiver, PeripheralEventSender,
};
pub use types::{
    AdapterState, Advertisement, CentralId, Characteristic, CharacteristicId,
    CharacteristicProperties, ConnectionState, Peripheral, PeripheralId, ReadRequest,
    RequestStatus, ScanOptions, Service, ServiceId, SubscriptionUpdate, ValueNotification,
    WriteMode, WriteRequest,
};

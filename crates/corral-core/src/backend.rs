//! Command interface of the transport collaborator
//!
//! The radio stack sits behind these traits. Commands may fail synchronously
//! (surfaced as [`CorralError::Backend`]); completion of the asynchronous
//! work is reported exclusively through the event contract in [`crate::event`].

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Advertisement, CentralId, CharacteristicId, PeripheralId, RequestStatus, ScanOptions, Service,
    ServiceId, WriteMode,
};

// ----------------------------------------------------------------------------
// Central-Role Commands
// ----------------------------------------------------------------------------

/// Commands the central workflow issues to the radio stack.
#[async_trait]
pub trait CentralBackend: Send + Sync {
    /// Bring up the central adapter. The resulting state arrives as a
    /// `StateChanged` event.
    async fn init(&self) -> Result<()>;

    /// Start scanning, optionally filtered to one advertised service.
    async fn start_scan(&self, filter: Option<ServiceId>, options: ScanOptions) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Initiate a connection. Completion arrives as `ConnectOutcome`.
    async fn connect(&self, id: PeripheralId) -> Result<()>;

    /// Cancel a pending or established connection.
    async fn cancel_connect(&self, id: PeripheralId) -> Result<()>;

    /// Discover the given services. Completion arrives as `ServicesDiscovered`.
    async fn discover_services(&self, id: PeripheralId, services: Vec<ServiceId>) -> Result<()>;

    /// Discover the given characteristics of one service. Completion arrives
    /// as `CharacteristicsDiscovered`.
    async fn discover_characteristics(
        &self,
        id: PeripheralId,
        service: ServiceId,
        characteristics: Vec<CharacteristicId>,
    ) -> Result<()>;

    /// Read a characteristic value. Completion arrives as `ValueUpdated`.
    async fn read_value(&self, id: PeripheralId, characteristic: CharacteristicId) -> Result<()>;

    /// Write a characteristic value. No outcome event exists for writes.
    async fn write_value(
        &self,
        id: PeripheralId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<()>;

    /// Enable or disable notifications for a characteristic.
    async fn set_notify(
        &self,
        id: PeripheralId,
        characteristic: CharacteristicId,
        enabled: bool,
    ) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Peripheral-Role Commands
// ----------------------------------------------------------------------------

/// Commands the peripheral workflow issues to the radio stack.
#[async_trait]
pub trait PeripheralBackend: Send + Sync {
    /// Bring up the peripheral adapter. The resulting state arrives as a
    /// `StateChanged` event.
    async fn init(&self) -> Result<()>;

    /// Begin advertising. Completion arrives as `AdvertisingStarted`.
    async fn start_advertising(&self, advertisement: Advertisement) -> Result<()>;

    /// Stop advertising.
    async fn stop_advertising(&self) -> Result<()>;

    /// Publish a service. Completion arrives as `ServiceAdded`.
    async fn add_service(&self, service: Service) -> Result<()>;

    /// Remove every published service.
    async fn remove_all_services(&self) -> Result<()>;

    /// Acknowledge an incoming read or write request. Reads carry the value
    /// to hand back.
    async fn respond(
        &self,
        central: CentralId,
        characteristic: CharacteristicId,
        value: Option<Vec<u8>>,
        status: RequestStatus,
    ) -> Result<()>;

    /// Push a value to subscribed centrals. Returns `false` when the outgoing
    /// queue is full; retry after the `ReadyToNotify` event.
    async fn notify_subscribers(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<bool>;
}

//! Identity and handle types shared by both roles
//!
//! This module defines the opaque identities used as correlation keys and the
//! snapshot handles the workflows hold for remote state. Handles are owned by
//! the backend; the core only stores snapshots keyed by identity.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Adapter State
// ----------------------------------------------------------------------------

/// The possible states of a role adapter.
///
/// Transitions are driven solely by backend events. Observers see the latest
/// value and every transition after they attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// The adapter state is not yet known.
    Unknown,
    /// The connection with the system service was momentarily lost.
    Resetting,
    /// This device does not support the requested role.
    Unsupported,
    /// The application is not authorized to use the radio.
    Unauthorized,
    /// The radio is currently powered off.
    PoweredOff,
    /// The radio is powered on and available to use.
    PoweredOn,
}

impl AdapterState {
    /// Whether the adapter is usable for issuing commands.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

// ----------------------------------------------------------------------------
// Identities
// ----------------------------------------------------------------------------

macro_rules! identity_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Create a fresh random identity.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing identity.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

identity_type!(
    /// Stable identity of a remote peripheral.
    PeripheralId
);
identity_type!(
    /// Identity of a service scoped to its parent peripheral.
    ServiceId
);
identity_type!(
    /// Identity of a characteristic scoped to its parent service.
    CharacteristicId
);
identity_type!(
    /// Identity of a remote central seen by the peripheral role.
    CentralId
);

// ----------------------------------------------------------------------------
// Remote Handles
// ----------------------------------------------------------------------------

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Properties for a mutable rendezvous characteristic.
    pub fn notify_and_write() -> Self {
        Self {
            notify: true,
            write_without_response: true,
            ..Self::default()
        }
    }
}

/// Snapshot of a characteristic exposed by a remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub id: CharacteristicId,
    pub properties: CharacteristicProperties,
    /// Whether notifications are currently enabled for this characteristic.
    pub is_notifying: bool,
}

impl Characteristic {
    pub fn new(id: CharacteristicId, properties: CharacteristicProperties) -> Self {
        Self {
            id,
            properties,
            is_notifying: false,
        }
    }
}

/// Snapshot of a service exposed by a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(id: ServiceId) -> Self {
        Self {
            id,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic to the snapshot.
    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Find a characteristic by identity.
    pub fn characteristic(&self, id: CharacteristicId) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.id == id)
    }
}

/// Snapshot handle for a remote peripheral.
///
/// The discovered-services collection is populated by service discovery and
/// refreshed by subsequent discovery outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub services: Vec<Service>,
}

impl Peripheral {
    pub fn new(id: PeripheralId) -> Self {
        Self {
            id,
            name: None,
            services: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Find a discovered service by identity.
    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// Connection state tracked for a known peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ----------------------------------------------------------------------------
// Advertising and Scanning
// ----------------------------------------------------------------------------

/// Opaque advertisement payload published by the peripheral role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub service_ids: Vec<ServiceId>,
}

impl Advertisement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_service(mut self, id: ServiceId) -> Self {
        self.service_ids.push(id);
        self
    }

    /// Whether this advertisement announces the given service.
    pub fn advertises(&self, id: ServiceId) -> bool {
        self.service_ids.contains(&id)
    }
}

/// Options applied when scanning for peripherals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Report every advertisement instead of coalescing per peripheral.
    pub allow_duplicates: bool,
}

// ----------------------------------------------------------------------------
// Peripheral-Role Requests
// ----------------------------------------------------------------------------

/// An incoming read request from a remote central.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub central: CentralId,
    pub characteristic: CharacteristicId,
    pub offset: usize,
}

/// An incoming write request from a remote central.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub central: CentralId,
    pub characteristic: CharacteristicId,
    pub offset: usize,
    pub value: Vec<u8>,
}

/// Result code returned when responding to an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Success,
    InvalidHandle,
    RequestNotSupported,
    InvalidOffset,
    UnlikelyError,
}

// ----------------------------------------------------------------------------
// Value Exchange
// ----------------------------------------------------------------------------

/// Write mode for outgoing central-role writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// A value pushed by a subscribed characteristic, delivered on the
/// central notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueNotification {
    pub characteristic: CharacteristicId,
    pub value: Vec<u8>,
}

/// A subscription change observed by the peripheral role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub central: CentralId,
    pub characteristic: CharacteristicId,
    pub subscribed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_lookup_by_identity() {
        let wanted = CharacteristicId::new();
        let other = CharacteristicId::new();
        let service = Service::new(ServiceId::new())
            .with_characteristic(Characteristic::new(other, CharacteristicProperties::default()))
            .with_characteristic(Characteristic::new(
                wanted,
                CharacteristicProperties::notify_and_write(),
            ));

        assert!(service.characteristic(wanted).is_some());
        assert!(service.characteristic(CharacteristicId::new()).is_none());
    }

    #[test]
    fn test_advertisement_service_match() {
        let id = ServiceId::new();
        let ad = Advertisement::new().with_service(id);
        assert!(ad.advertises(id));
        assert!(!ad.advertises(ServiceId::new()));
    }
}

//! Scripted stub backends
//!
//! The stubs record every command they are issued and never emit events on
//! their own; tests inject collaborator events directly on the role's event
//! channel and assert against the recorded command log.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use corral_core::{
    Advertisement, CentralBackend, CentralId, CharacteristicId, CorralError, PeripheralBackend,
    PeripheralId, RequestStatus, Result, ScanOptions, Service, ServiceId, WriteMode,
};

// ----------------------------------------------------------------------------
// Central Stub
// ----------------------------------------------------------------------------

/// A central-role command as recorded by [`StubCentral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCommand {
    Init,
    StartScan {
        filter: Option<ServiceId>,
        options: ScanOptions,
    },
    StopScan,
    Connect(PeripheralId),
    CancelConnect(PeripheralId),
    DiscoverServices {
        id: PeripheralId,
        services: Vec<ServiceId>,
    },
    DiscoverCharacteristics {
        id: PeripheralId,
        service: ServiceId,
        characteristics: Vec<CharacteristicId>,
    },
    ReadValue {
        id: PeripheralId,
        characteristic: CharacteristicId,
    },
    WriteValue {
        id: PeripheralId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
        mode: WriteMode,
    },
    SetNotify {
        id: PeripheralId,
        characteristic: CharacteristicId,
        enabled: bool,
    },
}

/// Recording central backend with injectable per-peripheral failures.
#[derive(Default)]
pub struct StubCentral {
    commands: Mutex<Vec<CentralCommand>>,
    failing_cancels: Mutex<HashSet<PeripheralId>>,
}

impl StubCentral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every command issued so far, in order.
    pub async fn commands(&self) -> Vec<CentralCommand> {
        self.commands.lock().await.clone()
    }

    /// Make `cancel_connect` fail for the given peripheral.
    pub async fn fail_cancel_connect(&self, id: PeripheralId) {
        self.failing_cancels.lock().await.insert(id);
    }

    async fn record(&self, command: CentralCommand) {
        self.commands.lock().await.push(command);
    }
}

#[async_trait]
impl CentralBackend for StubCentral {
    async fn init(&self) -> Result<()> {
        self.record(CentralCommand::Init).await;
        Ok(())
    }

    async fn start_scan(&self, filter: Option<ServiceId>, options: ScanOptions) -> Result<()> {
        self.record(CentralCommand::StartScan { filter, options }).await;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(CentralCommand::StopScan).await;
        Ok(())
    }

    async fn connect(&self, id: PeripheralId) -> Result<()> {
        self.record(CentralCommand::Connect(id)).await;
        Ok(())
    }

    async fn cancel_connect(&self, id: PeripheralId) -> Result<()> {
        self.record(CentralCommand::CancelConnect(id)).await;
        if self.failing_cancels.lock().await.contains(&id) {
            return Err(CorralError::Backend("injected cancel failure".into()));
        }
        Ok(())
    }

    async fn discover_services(&self, id: PeripheralId, services: Vec<ServiceId>) -> Result<()> {
        self.record(CentralCommand::DiscoverServices { id, services })
            .await;
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        id: PeripheralId,
        service: ServiceId,
        characteristics: Vec<CharacteristicId>,
    ) -> Result<()> {
        self.record(CentralCommand::DiscoverCharacteristics {
            id,
            service,
            characteristics,
        })
        .await;
        Ok(())
    }

    async fn read_value(&self, id: PeripheralId, characteristic: CharacteristicId) -> Result<()> {
        self.record(CentralCommand::ReadValue { id, characteristic })
            .await;
        Ok(())
    }

    async fn write_value(
        &self,
        id: PeripheralId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<()> {
        self.record(CentralCommand::WriteValue {
            id,
            characteristic,
            value,
            mode,
        })
        .await;
        Ok(())
    }

    async fn set_notify(
        &self,
        id: PeripheralId,
        characteristic: CharacteristicId,
        enabled: bool,
    ) -> Result<()> {
        self.record(CentralCommand::SetNotify {
            id,
            characteristic,
            enabled,
        })
        .await;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Peripheral Stub
// ----------------------------------------------------------------------------

/// A peripheral-role command as recorded by [`StubPeripheral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCommand {
    Init,
    StartAdvertising(Advertisement),
    StopAdvertising,
    AddService(Service),
    RemoveAllServices,
    Respond {
        central: CentralId,
        characteristic: CharacteristicId,
        value: Option<Vec<u8>>,
        status: RequestStatus,
    },
    NotifySubscribers {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
}

/// Recording peripheral backend.
pub struct StubPeripheral {
    commands: Mutex<Vec<PeripheralCommand>>,
    notify_accepts: AtomicBool,
}

impl Default for StubPeripheral {
    fn default() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            notify_accepts: AtomicBool::new(true),
        }
    }
}

impl StubPeripheral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every command issued so far, in order.
    pub async fn commands(&self) -> Vec<PeripheralCommand> {
        self.commands.lock().await.clone()
    }

    /// Control whether `notify_subscribers` reports queue room.
    pub fn set_notify_accepts(&self, accepts: bool) {
        self.notify_accepts.store(accepts, Ordering::SeqCst);
    }

    async fn record(&self, command: PeripheralCommand) {
        self.commands.lock().await.push(command);
    }
}

#[async_trait]
impl PeripheralBackend for StubPeripheral {
    async fn init(&self) -> Result<()> {
        self.record(PeripheralCommand::Init).await;
        Ok(())
    }

    async fn start_advertising(&self, advertisement: Advertisement) -> Result<()> {
        self.record(PeripheralCommand::StartAdvertising(advertisement))
            .await;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.record(PeripheralCommand::StopAdvertising).await;
        Ok(())
    }

    async fn add_service(&self, service: Service) -> Result<()> {
        self.record(PeripheralCommand::AddService(service)).await;
        Ok(())
    }

    async fn remove_all_services(&self) -> Result<()> {
        self.record(PeripheralCommand::RemoveAllServices).await;
        Ok(())
    }

    async fn respond(
        &self,
        central: CentralId,
        characteristic: CharacteristicId,
        value: Option<Vec<u8>>,
        status: RequestStatus,
    ) -> Result<()> {
        self.record(PeripheralCommand::Respond {
            central,
            characteristic,
            value,
            status,
        })
        .await;
        Ok(())
    }

    async fn notify_subscribers(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<bool> {
        self.record(PeripheralCommand::NotifySubscribers {
            characteristic,
            value,
        })
        .await;
        Ok(self.notify_accepts.load(Ordering::SeqCst))
    }
}

//! Central-role workflow
//!
//! Orchestrates adapter bring-up, scanning, connection, discovery, and value
//! reads on top of the operation correlator. All collaborator events arrive
//! on one serialized channel and are dispatched in arrival order by a pump
//! task owned by the [`Central`]; workflow operations may be invoked
//! concurrently from any number of tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use corral_core::{
    AdapterState, CentralBackend, CentralEvent, CentralEventReceiver, Characteristic,
    CharacteristicId, ConnectionState, CorralError, Correlator, EventBus, Peripheral, PeripheralId,
    Result, ScanOptions, Service, ServiceId, StateFeed, TargetKind, ValueNotification, WriteMode,
};

use crate::config::BridgeConfig;
use crate::power::{self, Phase};

// ----------------------------------------------------------------------------
// Known-Peripheral Tracking
// ----------------------------------------------------------------------------

/// A peripheral the central has seen, with its tracked connection state.
#[derive(Debug, Clone)]
struct KnownPeripheral {
    peripheral: Peripheral,
    connection: ConnectionState,
}

impl KnownPeripheral {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            connection: ConnectionState::Disconnected,
        }
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct Shared {
    adapter: StateFeed,
    phase: Mutex<Phase>,
    connects: Correlator<PeripheralId, Peripheral>,
    service_discoveries: Correlator<PeripheralId, Peripheral>,
    characteristic_discoveries: Correlator<ServiceId, Service>,
    reads: Correlator<CharacteristicId, Option<Vec<u8>>>,
    discoveries: EventBus<Peripheral>,
    notifications: EventBus<ValueNotification>,
    known: Mutex<HashMap<PeripheralId, KnownPeripheral>>,
    scanning: AtomicBool,
}

// ----------------------------------------------------------------------------
// Central Workflow
// ----------------------------------------------------------------------------

/// The central-role workflow: scanner, initiator, and reader.
pub struct Central {
    backend: Arc<dyn CentralBackend>,
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl Central {
    /// Create a central over a backend and its serialized event channel.
    pub fn new(backend: Arc<dyn CentralBackend>, events: CentralEventReceiver) -> Self {
        Self::with_config(backend, events, BridgeConfig::default())
    }

    /// Create a central with custom stream capacities.
    pub fn with_config(
        backend: Arc<dyn CentralBackend>,
        events: CentralEventReceiver,
        config: BridgeConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            adapter: StateFeed::new(),
            phase: Mutex::new(Phase::Idle),
            connects: Correlator::new(),
            service_discoveries: Correlator::new(),
            characteristic_discoveries: Correlator::new(),
            reads: Correlator::new(),
            discoveries: EventBus::new(config.discovery_buffer),
            notifications: EventBus::new(config.notification_buffer),
            known: Mutex::new(HashMap::new()),
            scanning: AtomicBool::new(false),
        });
        let pump = tokio::spawn(pump_events(shared.clone(), events));
        Self {
            backend,
            shared,
            pump,
        }
    }

    // ------------------------------------------------------------------
    // Bring-Up
    // ------------------------------------------------------------------

    /// Bring up the central adapter.
    ///
    /// Completes when the next adapter state emitted after initialization is
    /// powered-on; any other next state fails this call only. Calling
    /// `start` on an already-ready central succeeds immediately.
    pub async fn start(&self) -> Result<()> {
        if !power::claim_bring_up(&self.shared.phase).await? {
            return Ok(());
        }
        // Attach before issuing init so the resulting transition is the next
        // observed value, not the retained current one.
        let observer = self.shared.adapter.watch();
        if let Err(e) = self.backend.init().await {
            *self.shared.phase.lock().await = Phase::Idle;
            return Err(e);
        }
        power::await_power_on(&self.shared.phase, observer).await?;
        info!("central adapter ready");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Start scanning for peripherals, optionally filtered to one service.
    pub async fn scan(&self, filter: Option<ServiceId>, options: ScanOptions) -> Result<()> {
        self.ensure_ready().await?;
        self.backend.start_scan(filter, options).await?;
        self.shared.scanning.store(true, Ordering::SeqCst);
        info!(?filter, "scanning started");
        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.backend.stop_scan().await?;
        self.shared.scanning.store(false, Ordering::SeqCst);
        info!("scanning stopped");
        Ok(())
    }

    /// Whether a scan is currently active.
    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Connect to a peripheral, resolving with the connected handle.
    pub async fn connect(&self, peripheral: &Peripheral) -> Result<Peripheral> {
        self.ensure_ready().await?;
        {
            let mut known = self.shared.known.lock().await;
            let entry = known
                .entry(peripheral.id)
                .or_insert_with(|| KnownPeripheral::new(peripheral.clone()));
            entry.connection = ConnectionState::Connecting;
        }

        let pending = self.shared.connects.register(peripheral.id).await;
        if let Err(e) = self.backend.connect(peripheral.id).await {
            let mut known = self.shared.known.lock().await;
            if let Some(entry) = known.get_mut(&peripheral.id) {
                entry.connection = ConnectionState::Disconnected;
            }
            return Err(e);
        }
        pending.wait().await
    }

    /// Cancel any live connection and drop the peripheral from the known set.
    pub async fn forget(&self, peripheral: &Peripheral) -> Result<()> {
        self.backend.cancel_connect(peripheral.id).await?;
        self.shared.known.lock().await.remove(&peripheral.id);
        debug!(id = %peripheral.id, "peripheral forgotten");
        Ok(())
    }

    /// Disconnect from a peripheral.
    ///
    /// Turns off notifications for every characteristic currently notifying
    /// before cancelling the connection.
    pub async fn disconnect(&self, peripheral: &Peripheral) -> Result<()> {
        let notifying: Vec<CharacteristicId> = {
            let known = self.shared.known.lock().await;
            known
                .get(&peripheral.id)
                .map(|entry| {
                    entry
                        .peripheral
                        .services
                        .iter()
                        .flat_map(|s| &s.characteristics)
                        .filter(|c| c.is_notifying)
                        .map(|c| c.id)
                        .collect()
                })
                .unwrap_or_default()
        };

        for characteristic in notifying {
            self.backend
                .set_notify(peripheral.id, characteristic, false)
                .await?;
        }
        self.backend.cancel_connect(peripheral.id).await?;

        let mut known = self.shared.known.lock().await;
        if let Some(entry) = known.get_mut(&peripheral.id) {
            entry.connection = ConnectionState::Disconnected;
        }
        Ok(())
    }

    /// Disconnect every connected or connecting peripheral, stop scanning,
    /// and clear the known set. Per-peripheral failures are logged and
    /// swallowed; cleanup always runs to completion.
    pub async fn cleanup(&self) {
        let targets: Vec<Peripheral> = {
            let known = self.shared.known.lock().await;
            known
                .values()
                .filter(|entry| {
                    matches!(
                        entry.connection,
                        ConnectionState::Connected | ConnectionState::Connecting
                    )
                })
                .map(|entry| entry.peripheral.clone())
                .collect()
        };

        for peripheral in targets {
            if let Err(e) = self.disconnect(&peripheral).await {
                warn!(id = %peripheral.id, "cleanup: disconnect failed: {}", e);
            }
        }
        if let Err(e) = self.backend.stop_scan().await {
            warn!("cleanup: stop scan failed: {}", e);
        }
        self.shared.scanning.store(false, Ordering::SeqCst);
        self.shared.known.lock().await.clear();
        info!("central cleaned up");
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Discover one service of a connected peripheral.
    ///
    /// Discovery succeeding at the transport level does not imply the
    /// requested service exists; an absent service yields `TargetNotFound`.
    pub async fn discover_service(
        &self,
        peripheral: &Peripheral,
        service: ServiceId,
    ) -> Result<Service> {
        self.ensure_ready().await?;
        let pending = self.shared.service_discoveries.register(peripheral.id).await;
        self.backend
            .discover_services(peripheral.id, vec![service])
            .await?;
        let refreshed = pending.wait().await?;
        refreshed
            .service(service)
            .cloned()
            .ok_or(CorralError::TargetNotFound {
                kind: TargetKind::Service,
                id: service.as_uuid(),
            })
    }

    /// Discover one characteristic of a service, with the analogous
    /// not-found policy.
    pub async fn discover_characteristic(
        &self,
        peripheral: &Peripheral,
        service: &Service,
        characteristic: CharacteristicId,
    ) -> Result<Characteristic> {
        self.ensure_ready().await?;
        let pending = self
            .shared
            .characteristic_discoveries
            .register(service.id)
            .await;
        self.backend
            .discover_characteristics(peripheral.id, service.id, vec![characteristic])
            .await?;
        let refreshed = pending.wait().await?;
        refreshed
            .characteristic(characteristic)
            .cloned()
            .ok_or(CorralError::TargetNotFound {
                kind: TargetKind::Characteristic,
                id: characteristic.as_uuid(),
            })
    }

    // ------------------------------------------------------------------
    // Value Exchange
    // ------------------------------------------------------------------

    /// Read a characteristic's raw value. An update carrying no payload and
    /// no error resolves as `Ok(None)`.
    pub async fn read_value(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_ready().await?;
        let pending = self.shared.reads.register(characteristic.id).await;
        self.backend
            .read_value(peripheral.id, characteristic.id)
            .await?;
        pending.wait().await
    }

    /// Read and decode a characteristic value with a caller-supplied decoder.
    ///
    /// An absent payload is `ValueAbsent`; a payload the decoder rejects is
    /// `DecodeFailed`.
    pub async fn read_value_with<T, F>(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        decode: F,
    ) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Option<T>,
    {
        match self.read_value(peripheral, characteristic).await? {
            Some(bytes) => decode(&bytes).ok_or_else(|| {
                CorralError::DecodeFailed(format!(
                    "undecodable payload from characteristic {}",
                    characteristic.id
                ))
            }),
            None => Err(CorralError::ValueAbsent),
        }
    }

    /// Write a characteristic value. Writes have no outcome event; the
    /// command either issues or fails synchronously.
    pub async fn write_value(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<()> {
        self.ensure_ready().await?;
        self.backend
            .write_value(peripheral.id, characteristic.id, value, mode)
            .await
    }

    /// Enable or disable notifications for a characteristic.
    pub async fn set_notify(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> Result<()> {
        self.ensure_ready().await?;
        self.backend
            .set_notify(peripheral.id, characteristic.id, enabled)
            .await?;

        // Track the notify flag so disconnect can turn off exactly the
        // characteristics that are notifying.
        let mut known = self.shared.known.lock().await;
        if let Some(entry) = known.get_mut(&peripheral.id) {
            for service in &mut entry.peripheral.services {
                for c in &mut service.characteristics {
                    if c.id == characteristic.id {
                        c.is_notifying = enabled;
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Streams and Introspection
    // ------------------------------------------------------------------

    /// Discovered peripherals. Duplicate discoveries of a known peripheral
    /// are suppressed. No replay for late subscribers.
    pub fn peripherals(&self) -> broadcast::Receiver<Peripheral> {
        self.shared.discoveries.subscribe()
    }

    /// Subscription pushes with no pending read. No replay.
    pub fn notifications(&self) -> broadcast::Receiver<ValueNotification> {
        self.shared.notifications.subscribe()
    }

    /// Adapter state observer with current-value replay.
    pub fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.shared.adapter.watch()
    }

    /// The latest central adapter state.
    pub fn current_adapter_state(&self) -> AdapterState {
        self.shared.adapter.current()
    }

    /// Snapshot of every known peripheral.
    pub async fn known_peripherals(&self) -> Vec<Peripheral> {
        self.shared
            .known
            .lock()
            .await
            .values()
            .map(|entry| entry.peripheral.clone())
            .collect()
    }

    /// Tracked connection state of a known peripheral.
    pub async fn connection_state(&self, id: PeripheralId) -> Option<ConnectionState> {
        self.shared
            .known
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.connection)
    }

    async fn ensure_ready(&self) -> Result<()> {
        power::ensure_ready(&self.shared.phase, &self.shared.adapter).await
    }
}

impl Drop for Central {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

// ----------------------------------------------------------------------------
// Event Dispatch
// ----------------------------------------------------------------------------

async fn pump_events(shared: Arc<Shared>, mut events: CentralEventReceiver) {
    while let Some(event) = events.recv().await {
        dispatch(&shared, event).await;
    }
    debug!("central event channel closed");
}

async fn dispatch(shared: &Shared, event: CentralEvent) {
    match event {
        CentralEvent::StateChanged(state) => {
            debug!(?state, "central adapter state changed");
            shared.adapter.publish(state);
        }

        CentralEvent::PeripheralDiscovered(peripheral) => {
            let newly_seen = {
                let mut known = shared.known.lock().await;
                match known.entry(peripheral.id) {
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(KnownPeripheral::new(peripheral.clone()));
                        true
                    }
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        // Already announced; refresh the advertised name only
                        // so a bare advertisement cannot clobber discovered
                        // services.
                        if peripheral.name.is_some() {
                            entry.get_mut().peripheral.name = peripheral.name.clone();
                        }
                        false
                    }
                }
            };
            if newly_seen {
                debug!(id = %peripheral.id, name = ?peripheral.name, "peripheral discovered");
                shared.discoveries.publish(peripheral);
            }
        }

        CentralEvent::ConnectOutcome { id, result } => {
            let outcome = match result {
                Ok(peripheral) => {
                    let mut known = shared.known.lock().await;
                    let entry = known
                        .entry(id)
                        .or_insert_with(|| KnownPeripheral::new(peripheral.clone()));
                    entry.connection = ConnectionState::Connected;
                    Ok(peripheral)
                }
                Err(reason) => {
                    let mut known = shared.known.lock().await;
                    if let Some(entry) = known.get_mut(&id) {
                        entry.connection = ConnectionState::Failed;
                    }
                    Err(CorralError::OperationFailed(reason))
                }
            };
            if shared.connects.resolve(&id, outcome).await.is_some() {
                debug!(%id, "unmatched connect outcome dropped");
            }
        }

        CentralEvent::Disconnected { id, error } => {
            let mut known = shared.known.lock().await;
            if let Some(entry) = known.get_mut(&id) {
                entry.connection = ConnectionState::Disconnected;
            }
            drop(known);
            match error {
                Some(reason) => warn!(%id, "peripheral disconnected: {}", reason),
                None => info!(%id, "peripheral disconnected"),
            }
        }

        CentralEvent::ServicesDiscovered { id, result } => {
            let outcome = match result {
                Ok(peripheral) => {
                    let mut known = shared.known.lock().await;
                    if let Some(entry) = known.get_mut(&id) {
                        entry.peripheral.services = peripheral.services.clone();
                    }
                    Ok(peripheral)
                }
                Err(reason) => Err(CorralError::OperationFailed(reason)),
            };
            if shared.service_discoveries.resolve(&id, outcome).await.is_some() {
                debug!(%id, "unmatched service discovery outcome dropped");
            }
        }

        CentralEvent::CharacteristicsDiscovered { service, result } => {
            let outcome = match result {
                Ok(refreshed) => {
                    let mut known = shared.known.lock().await;
                    for entry in known.values_mut() {
                        for slot in &mut entry.peripheral.services {
                            if slot.id == service {
                                *slot = refreshed.clone();
                            }
                        }
                    }
                    Ok(refreshed)
                }
                Err(reason) => Err(CorralError::OperationFailed(reason)),
            };
            if shared
                .characteristic_discoveries
                .resolve(&service, outcome)
                .await
                .is_some()
            {
                debug!(%service, "unmatched characteristic discovery outcome dropped");
            }
        }

        CentralEvent::ValueUpdated {
            characteristic,
            result,
        } => {
            let outcome = result.map_err(CorralError::OperationFailed);
            match shared.reads.resolve(&characteristic, outcome).await {
                None => {}
                // No pending read: a subscription push lands on the
                // notification stream, anything else is dropped.
                Some(Ok(Some(value))) => {
                    shared.notifications.publish(ValueNotification {
                        characteristic,
                        value,
                    });
                }
                Some(other) => {
                    debug!(%characteristic, ?other, "unmatched value update dropped");
                }
            }
        }

        CentralEvent::ServicesInvalidated {
            peripheral,
            services,
        } => {
            let mut known = shared.known.lock().await;
            if let Some(entry) = known.get_mut(&peripheral) {
                entry
                    .peripheral
                    .services
                    .retain(|s| !services.contains(&s.id));
            }
            drop(known);
            info!(%peripheral, invalidated = services.len(), "services invalidated");
        }
    }
}

//! In-process virtual radio
//!
//! Wires a central backend and a peripheral backend back to back so the full
//! discover/connect/discover/subscribe/notify loop runs without hardware:
//! commands issued on one side surface as collaborator events on the
//! appropriate side, in the order a real stack would deliver them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use corral_core::{
    central_event_channel, peripheral_event_channel, AdapterState, Advertisement, CentralBackend,
    CentralEvent, CentralEventReceiver, CentralEventSender, CentralId, CharacteristicId,
    Peripheral, PeripheralBackend, PeripheralEvent, PeripheralEventReceiver, PeripheralEventSender,
    PeripheralId, ReadRequest, RequestStatus, Result, ScanOptions, Service, ServiceId, WriteMode,
    WriteRequest,
};

// ----------------------------------------------------------------------------
// Radio State
// ----------------------------------------------------------------------------

struct RadioState {
    central_tx: CentralEventSender,
    peripheral_tx: PeripheralEventSender,
    /// Identity of the virtual advertiser as seen by the central side.
    peripheral_id: PeripheralId,
    /// Identity of the virtual central as seen by the peripheral side.
    central_id: CentralId,
    published: Vec<Service>,
    advertised: Option<Advertisement>,
    scan_filter: Option<Option<ServiceId>>,
    subscribed: HashSet<CharacteristicId>,
    values: HashMap<CharacteristicId, Vec<u8>>,
    connected: bool,
}

impl RadioState {
    /// Surface the advertiser to the scanning central when filter and
    /// advertisement agree.
    fn announce_if_visible(&self) {
        let Some(filter) = &self.scan_filter else {
            return;
        };
        let Some(advertised) = &self.advertised else {
            return;
        };
        let visible = match filter {
            None => true,
            Some(service) => advertised.advertises(*service),
        };
        if visible {
            let mut snapshot = Peripheral::new(self.peripheral_id);
            snapshot.name = advertised.local_name.clone();
            let _ = self
                .central_tx
                .send(CentralEvent::PeripheralDiscovered(snapshot));
        }
    }

    fn service(&self, id: ServiceId) -> Option<&Service> {
        self.published.iter().find(|s| s.id == id)
    }
}

// ----------------------------------------------------------------------------
// Virtual Radio
// ----------------------------------------------------------------------------

/// Both halves of an in-process radio link.
pub struct VirtualRadio {
    pub central_backend: Arc<VirtualCentral>,
    pub central_events: CentralEventReceiver,
    pub peripheral_backend: Arc<VirtualPeripheral>,
    pub peripheral_events: PeripheralEventReceiver,
}

impl VirtualRadio {
    pub fn new() -> Self {
        let (central_tx, central_events) = central_event_channel();
        let (peripheral_tx, peripheral_events) = peripheral_event_channel();
        let state = Arc::new(Mutex::new(RadioState {
            central_tx,
            peripheral_tx,
            peripheral_id: PeripheralId::new(),
            central_id: CentralId::new(),
            published: Vec::new(),
            advertised: None,
            scan_filter: None,
            subscribed: HashSet::new(),
            values: HashMap::new(),
            connected: false,
        }));
        Self {
            central_backend: Arc::new(VirtualCentral {
                state: state.clone(),
            }),
            central_events,
            peripheral_backend: Arc::new(VirtualPeripheral { state }),
            peripheral_events,
        }
    }

    /// Identity the central side will discover the virtual advertiser under.
    pub async fn peripheral_id(&self) -> PeripheralId {
        self.central_backend.state.lock().await.peripheral_id
    }
}

impl Default for VirtualRadio {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Central Half
// ----------------------------------------------------------------------------

/// Central-side backend of a [`VirtualRadio`].
pub struct VirtualCentral {
    state: Arc<Mutex<RadioState>>,
}

#[async_trait]
impl CentralBackend for VirtualCentral {
    async fn init(&self) -> Result<()> {
        let state = self.state.lock().await;
        let _ = state
            .central_tx
            .send(CentralEvent::StateChanged(AdapterState::PoweredOn));
        Ok(())
    }

    async fn start_scan(&self, filter: Option<ServiceId>, _options: ScanOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        state.scan_filter = Some(filter);
        state.announce_if_visible();
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.state.lock().await.scan_filter = None;
        Ok(())
    }

    async fn connect(&self, id: PeripheralId) -> Result<()> {
        let mut state = self.state.lock().await;
        if id == state.peripheral_id {
            state.connected = true;
            let snapshot = Peripheral::new(id);
            let _ = state.central_tx.send(CentralEvent::ConnectOutcome {
                id,
                result: Ok(snapshot),
            });
        } else {
            let _ = state.central_tx.send(CentralEvent::ConnectOutcome {
                id,
                result: Err("unknown peripheral".into()),
            });
        }
        Ok(())
    }

    async fn cancel_connect(&self, id: PeripheralId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.connected && id == state.peripheral_id {
            state.connected = false;
            let _ = state
                .central_tx
                .send(CentralEvent::Disconnected { id, error: None });
        }
        Ok(())
    }

    async fn discover_services(&self, id: PeripheralId, services: Vec<ServiceId>) -> Result<()> {
        let state = self.state.lock().await;
        let mut snapshot = Peripheral::new(id);
        snapshot.services = state
            .published
            .iter()
            .filter(|s| services.is_empty() || services.contains(&s.id))
            // Characteristics are only visible after their own discovery.
            .map(|s| Service::new(s.id))
            .collect();
        let _ = state.central_tx.send(CentralEvent::ServicesDiscovered {
            id,
            result: Ok(snapshot),
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        _id: PeripheralId,
        service: ServiceId,
        characteristics: Vec<CharacteristicId>,
    ) -> Result<()> {
        let state = self.state.lock().await;
        let result = match state.service(service) {
            Some(published) => {
                let mut snapshot = Service::new(service);
                snapshot.characteristics = published
                    .characteristics
                    .iter()
                    .filter(|c| characteristics.is_empty() || characteristics.contains(&c.id))
                    .cloned()
                    .collect();
                Ok(snapshot)
            }
            None => Err("service not published".to_string()),
        };
        let _ = state
            .central_tx
            .send(CentralEvent::CharacteristicsDiscovered { service, result });
        Ok(())
    }

    async fn read_value(&self, _id: PeripheralId, characteristic: CharacteristicId) -> Result<()> {
        let state = self.state.lock().await;
        let request = ReadRequest {
            central: state.central_id,
            characteristic,
            offset: 0,
        };
        let _ = state
            .peripheral_tx
            .send(PeripheralEvent::ReadRequestReceived(request));
        Ok(())
    }

    async fn write_value(
        &self,
        _id: PeripheralId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
        mode: WriteMode,
    ) -> Result<()> {
        debug!(%characteristic, ?mode, "virtual radio write");
        let state = self.state.lock().await;
        let request = WriteRequest {
            central: state.central_id,
            characteristic,
            offset: 0,
            value,
        };
        let _ = state
            .peripheral_tx
            .send(PeripheralEvent::WriteRequestsReceived(vec![request]));
        Ok(())
    }

    async fn set_notify(
        &self,
        _id: PeripheralId,
        characteristic: CharacteristicId,
        enabled: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if enabled {
            state.subscribed.insert(characteristic);
        } else {
            state.subscribed.remove(&characteristic);
        }
        let central = state.central_id;
        let _ = state.peripheral_tx.send(PeripheralEvent::SubscriptionChanged {
            central,
            characteristic,
            subscribed: enabled,
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Peripheral Half
// ----------------------------------------------------------------------------

/// Peripheral-side backend of a [`VirtualRadio`].
pub struct VirtualPeripheral {
    state: Arc<Mutex<RadioState>>,
}

#[async_trait]
impl PeripheralBackend for VirtualPeripheral {
    async fn init(&self) -> Result<()> {
        let state = self.state.lock().await;
        let _ = state
            .peripheral_tx
            .send(PeripheralEvent::StateChanged(AdapterState::PoweredOn));
        Ok(())
    }

    async fn start_advertising(&self, advertisement: Advertisement) -> Result<()> {
        let mut state = self.state.lock().await;
        state.advertised = Some(advertisement);
        let _ = state
            .peripheral_tx
            .send(PeripheralEvent::AdvertisingStarted { error: None });
        state.announce_if_visible();
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.state.lock().await.advertised = None;
        Ok(())
    }

    async fn add_service(&self, service: Service) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = service.id;
        state.published.push(service);
        let _ = state.peripheral_tx.send(PeripheralEvent::ServiceAdded {
            service: id,
            error: None,
        });
        Ok(())
    }

    async fn remove_all_services(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.published.clear();
        state.subscribed.clear();
        Ok(())
    }

    async fn respond(
        &self,
        _central: CentralId,
        characteristic: CharacteristicId,
        value: Option<Vec<u8>>,
        status: RequestStatus,
    ) -> Result<()> {
        let state = self.state.lock().await;
        let result = match status {
            // Fall back to the last value the peripheral pushed when the
            // responder supplies none.
            RequestStatus::Success => Ok(value.or_else(|| state.values.get(&characteristic).cloned())),
            other => Err(format!("request rejected: {:?}", other)),
        };
        let _ = state.central_tx.send(CentralEvent::ValueUpdated {
            characteristic,
            result,
        });
        Ok(())
    }

    async fn notify_subscribers(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.values.insert(characteristic, value.clone());
        if state.subscribed.contains(&characteristic) {
            let _ = state.central_tx.send(CentralEvent::ValueUpdated {
                characteristic,
                result: Ok(Some(value)),
            });
        }
        Ok(true)
    }
}

//! Rendezvous channel
//!
//! Composes one central workflow and one peripheral workflow under a single
//! identifying token to discover and bind to a counterpart automatically:
//! the central side scans for the token, connects, discovers the token
//! service and characteristic, and subscribes; the peripheral side publishes
//! a mutable service/characteristic pair under the token and advertises it.
//! Callers see a broadcast stream of channel events and never touch the raw
//! correlation machinery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use corral_core::{
    Advertisement, Characteristic, CharacteristicId, CharacteristicProperties, CorralError,
    EventBus, Peripheral, PeripheralId, RequestStatus, Result, ScanOptions, Service, ServiceId,
    WriteMode,
};

use crate::advertiser::Advertiser;
use crate::central::Central;

// ----------------------------------------------------------------------------
// Channel Events
// ----------------------------------------------------------------------------

/// Progress and traffic on a rendezvous channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A peripheral advertising the channel token was discovered.
    PeerFound(PeripheralId),
    /// The central side bound to a counterpart and subscribed.
    Linked {
        peripheral: PeripheralId,
        characteristic: CharacteristicId,
    },
    /// A payload arrived from the counterpart, via notification on the
    /// central side or write on the peripheral side.
    Message(Vec<u8>),
}

/// The central side's binding to its counterpart.
#[derive(Debug, Clone)]
struct Link {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

// ----------------------------------------------------------------------------
// Rendezvous Channel
// ----------------------------------------------------------------------------

/// A token-identified pairing of both role workflows.
pub struct RendezvousChannel {
    central: Arc<Central>,
    advertiser: Arc<Advertiser>,
    token: Uuid,
    events: Arc<EventBus<ChannelEvent>>,
    link: Arc<Mutex<Option<Link>>>,
    outgoing: Arc<Mutex<Option<Vec<u8>>>>,
    opened: AtomicBool,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl RendezvousChannel {
    /// Create a channel over both workflows and an identifying token.
    pub fn new(central: Central, advertiser: Advertiser, token: Uuid) -> Self {
        Self {
            central: Arc::new(central),
            advertiser: Arc::new(advertiser),
            token,
            events: Arc::new(EventBus::new(64)),
            link: Arc::new(Mutex::new(None)),
            outgoing: Arc::new(Mutex::new(None)),
            opened: AtomicBool::new(false),
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// The identifying token.
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Start discovery on both sides and return the channel event stream.
    ///
    /// Opening an already-open channel returns another receiver on the same
    /// stream instead of driving a second adapter bring-up.
    pub async fn open(&self) -> broadcast::Receiver<ChannelEvent> {
        let stream = self.events.subscribe();
        if self.opened.swap(true, Ordering::SeqCst) {
            debug!("channel already open, handing out existing stream");
            return stream;
        }

        let mut drivers = self.drivers.lock().await;
        drivers.push(tokio::spawn(drive_central(
            self.central.clone(),
            self.service_id(),
            self.characteristic_id(),
            self.events.clone(),
            self.link.clone(),
        )));
        drivers.push(tokio::spawn(drive_peripheral(
            self.advertiser.clone(),
            self.service_id(),
            self.characteristic_id(),
            self.events.clone(),
            self.outgoing.clone(),
        )));
        stream
    }

    /// Push a payload to the bound counterpart: a write-without-response when
    /// linked as central, a subscriber notification otherwise.
    pub async fn send(&self, value: Vec<u8>) -> Result<()> {
        *self.outgoing.lock().await = Some(value.clone());

        let link = self.link.lock().await.clone();
        if let Some(link) = link {
            return self
                .central
                .write_value(
                    &link.peripheral,
                    &link.characteristic,
                    value,
                    WriteMode::WithoutResponse,
                )
                .await;
        }

        if self
            .advertiser
            .notify(self.characteristic_id(), value)
            .await?
        {
            Ok(())
        } else {
            Err(CorralError::OperationFailed(
                "notification queue full, retry after the ready signal".into(),
            ))
        }
    }

    /// The central workflow this channel drives.
    pub fn central(&self) -> &Central {
        &self.central
    }

    /// The peripheral workflow this channel drives.
    pub fn advertiser(&self) -> &Advertiser {
        &self.advertiser
    }

    fn service_id(&self) -> ServiceId {
        ServiceId::from_uuid(self.token)
    }

    fn characteristic_id(&self) -> CharacteristicId {
        CharacteristicId::from_uuid(self.token)
    }
}

impl Drop for RendezvousChannel {
    fn drop(&mut self) {
        if let Ok(mut drivers) = self.drivers.try_lock() {
            for driver in drivers.drain(..) {
                driver.abort();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Central-Side Driver
// ----------------------------------------------------------------------------

async fn drive_central(
    central: Arc<Central>,
    service_id: ServiceId,
    characteristic_id: CharacteristicId,
    events: Arc<EventBus<ChannelEvent>>,
    link: Arc<Mutex<Option<Link>>>,
) {
    if let Err(e) = central.start().await {
        warn!("channel central bring-up failed: {}", e);
        return;
    }

    // Attach both streams before scanning so nothing slips past.
    let mut discoveries = central.peripherals();
    let mut notifications = central.notifications();
    if let Err(e) = central.scan(Some(service_id), ScanOptions::default()).await {
        warn!("channel scan failed: {}", e);
        return;
    }

    loop {
        let peripheral = match discoveries.recv().await {
            Ok(peripheral) => peripheral,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        };
        events.publish(ChannelEvent::PeerFound(peripheral.id));

        match bind(&central, &peripheral, service_id, characteristic_id).await {
            Ok(characteristic) => {
                // Record the binding before announcing it, so a caller that
                // reacts to `Linked` with `send` already has the write path.
                let linked = ChannelEvent::Linked {
                    peripheral: peripheral.id,
                    characteristic: characteristic.id,
                };
                *link.lock().await = Some(Link {
                    peripheral,
                    characteristic,
                });
                events.publish(linked);
                break;
            }
            Err(e) => {
                warn!(id = %peripheral.id, "channel bind failed: {}", e);
            }
        }
    }

    // Bound; forward the counterpart's notifications as channel messages.
    loop {
        match notifications.recv().await {
            Ok(notification) if notification.characteristic == characteristic_id => {
                events.publish(ChannelEvent::Message(notification.value));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn bind(
    central: &Central,
    peripheral: &Peripheral,
    service_id: ServiceId,
    characteristic_id: CharacteristicId,
) -> Result<Characteristic> {
    let connected = central.connect(peripheral).await?;
    let service = central.discover_service(&connected, service_id).await?;
    let characteristic = central
        .discover_characteristic(&connected, &service, characteristic_id)
        .await?;
    central.set_notify(&connected, &characteristic, true).await?;
    Ok(characteristic)
}

// ----------------------------------------------------------------------------
// Peripheral-Side Driver
// ----------------------------------------------------------------------------

async fn drive_peripheral(
    advertiser: Arc<Advertiser>,
    service_id: ServiceId,
    characteristic_id: CharacteristicId,
    events: Arc<EventBus<ChannelEvent>>,
    outgoing: Arc<Mutex<Option<Vec<u8>>>>,
) {
    if let Err(e) = advertiser.start().await {
        warn!("channel peripheral bring-up failed: {}", e);
        return;
    }

    let service = Service::new(service_id).with_characteristic(Characteristic::new(
        characteristic_id,
        CharacteristicProperties::notify_and_write(),
    ));
    if let Err(e) = advertiser.add_service(service).await {
        warn!("channel service publication failed: {}", e);
        return;
    }

    let mut writes = advertiser.write_requests();
    let mut reads = advertiser.read_requests();

    let advertisement = Advertisement::new().with_service(service_id);
    if let Err(e) = advertiser.start_advertising(advertisement).await {
        warn!("channel advertising failed: {}", e);
        return;
    }

    loop {
        tokio::select! {
            batch = writes.recv() => match batch {
                Ok(batch) => {
                    for request in batch {
                        if request.characteristic != characteristic_id {
                            continue;
                        }
                        if let Err(e) = advertiser
                            .respond_write(&request, RequestStatus::Success)
                            .await
                        {
                            warn!("channel write response failed: {}", e);
                        }
                        events.publish(ChannelEvent::Message(request.value));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
            request = reads.recv() => match request {
                Ok(request) => {
                    let value = outgoing.lock().await.clone();
                    if let Err(e) = advertiser
                        .respond_read(&request, value, RequestStatus::Success)
                        .await
                    {
                        warn!("channel read response failed: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

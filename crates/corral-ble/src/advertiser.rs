//! Peripheral-role workflow
//!
//! Orchestrates adapter bring-up, advertising, service publication, and
//! responses to incoming requests. Unlike the central side, the collaborator
//! delivers at most one call-style outcome at a time here, so the one-shot
//! operations use a single-pending-callback slot instead of the generic
//! correlator; the slot is cleared on resolution so a later unrelated outcome
//! can never resolve a future call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use corral_core::{
    AdapterState, Advertisement, CharacteristicId, CorralError, EventBus, PeripheralBackend,
    PeripheralEvent, PeripheralEventReceiver, ReadRequest, RequestStatus, Result, Service,
    ServiceId, StateFeed, SubscriptionUpdate, WriteRequest,
};

use crate::config::BridgeConfig;
use crate::power::{self, Phase};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

type PendingSlot<V> = Mutex<Option<oneshot::Sender<Result<V>>>>;

struct Shared {
    adapter: StateFeed,
    phase: Mutex<Phase>,
    pending_advertising: PendingSlot<()>,
    pending_service: PendingSlot<ServiceId>,
    subscriptions: EventBus<SubscriptionUpdate>,
    read_requests: EventBus<ReadRequest>,
    write_requests: EventBus<Vec<WriteRequest>>,
    ready_to_notify: EventBus<()>,
    advertising: AtomicBool,
}

// ----------------------------------------------------------------------------
// Advertiser Workflow
// ----------------------------------------------------------------------------

/// The peripheral-role workflow: advertiser, service host, and responder.
pub struct Advertiser {
    backend: Arc<dyn PeripheralBackend>,
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl Advertiser {
    /// Create an advertiser over a backend and its serialized event channel.
    pub fn new(backend: Arc<dyn PeripheralBackend>, events: PeripheralEventReceiver) -> Self {
        Self::with_config(backend, events, BridgeConfig::default())
    }

    /// Create an advertiser with custom stream capacities.
    pub fn with_config(
        backend: Arc<dyn PeripheralBackend>,
        events: PeripheralEventReceiver,
        config: BridgeConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            adapter: StateFeed::new(),
            phase: Mutex::new(Phase::Idle),
            pending_advertising: Mutex::new(None),
            pending_service: Mutex::new(None),
            subscriptions: EventBus::new(config.subscription_buffer),
            read_requests: EventBus::new(config.request_buffer),
            write_requests: EventBus::new(config.request_buffer),
            ready_to_notify: EventBus::new(config.request_buffer),
            advertising: AtomicBool::new(false),
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

    /// Bring up the peripheral adapter; same next-value semantics as the
    /// central side.
    pub async fn start(&self) -> Result<()> {
        if !power::claim_bring_up(&self.shared.phase).await? {
            return Ok(());
        }
        let observer = self.shared.adapter.watch();
        if let Err(e) = self.backend.init().await {
            *self.shared.phase.lock().await = Phase::Idle;
            return Err(e);
        }
        power::await_power_on(&self.shared.phase, observer).await?;
        info!("peripheral adapter ready");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Advertising and Service Publication
    // ------------------------------------------------------------------

    /// Begin advertising, resolving when the collaborator reports the
    /// start-advertising outcome. A call while an earlier one is still
    /// pending fails fast instead of queueing.
    pub async fn start_advertising(&self, advertisement: Advertisement) -> Result<()> {
        self.ensure_ready().await?;
        let rx = claim_slot(&self.shared.pending_advertising, "start-advertising").await?;

        if let Err(e) = self.backend.start_advertising(advertisement).await {
            self.shared.pending_advertising.lock().await.take();
            return Err(e);
        }
        rx.await.map_err(|_| CorralError::ChannelClosed)??;
        self.shared.advertising.store(true, Ordering::SeqCst);
        info!("advertising started");
        Ok(())
    }

    /// Publish a service, resolving with its identity once the collaborator
    /// reports the add-service outcome.
    pub async fn add_service(&self, service: Service) -> Result<ServiceId> {
        self.ensure_ready().await?;
        let rx = claim_slot(&self.shared.pending_service, "add-service").await?;

        if let Err(e) = self.backend.add_service(service).await {
            self.shared.pending_service.lock().await.take();
            return Err(e);
        }
        let id = rx.await.map_err(|_| CorralError::ChannelClosed)??;
        info!(%id, "service published");
        Ok(id)
    }

    /// Stop advertising and remove every published service. Best-effort:
    /// failures are logged, never surfaced, and do not abort the remaining
    /// steps. Outstanding one-shot callers observe a closed channel.
    pub async fn cleanup(&self) {
        if let Err(e) = self.backend.stop_advertising().await {
            warn!("cleanup: stop advertising failed: {}", e);
        }
        self.shared.advertising.store(false, Ordering::SeqCst);
        if let Err(e) = self.backend.remove_all_services().await {
            warn!("cleanup: remove services failed: {}", e);
        }
        self.shared.pending_advertising.lock().await.take();
        self.shared.pending_service.lock().await.take();
        info!("advertiser cleaned up");
    }

    /// Whether advertising is currently active.
    pub fn is_advertising(&self) -> bool {
        self.shared.advertising.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Request Handling
    // ------------------------------------------------------------------

    /// Acknowledge a read request, handing back the value to report.
    pub async fn respond_read(
        &self,
        request: &ReadRequest,
        value: Option<Vec<u8>>,
        status: RequestStatus,
    ) -> Result<()> {
        self.backend
            .respond(request.central, request.characteristic, value, status)
            .await
    }

    /// Acknowledge a write request.
    pub async fn respond_write(&self, request: &WriteRequest, status: RequestStatus) -> Result<()> {
        self.backend
            .respond(request.central, request.characteristic, None, status)
            .await
    }

    /// Push a value to subscribed centrals. Returns `false` when the
    /// outgoing queue is full; retry after [`Advertiser::ready_to_notify`]
    /// signals.
    pub async fn notify(&self, characteristic: CharacteristicId, value: Vec<u8>) -> Result<bool> {
        self.ensure_ready().await?;
        self.backend.notify_subscribers(characteristic, value).await
    }

    // ------------------------------------------------------------------
    // Streams and Introspection
    // ------------------------------------------------------------------

    /// Subscription changes from remote centrals. No replay.
    pub fn subscriptions(&self) -> broadcast::Receiver<SubscriptionUpdate> {
        self.shared.subscriptions.subscribe()
    }

    /// Incoming read requests. No replay.
    pub fn read_requests(&self) -> broadcast::Receiver<ReadRequest> {
        self.shared.read_requests.subscribe()
    }

    /// Incoming write request batches. No replay.
    pub fn write_requests(&self) -> broadcast::Receiver<Vec<WriteRequest>> {
        self.shared.write_requests.subscribe()
    }

    /// Signal that the outgoing notification queue has room again.
    pub fn ready_to_notify(&self) -> broadcast::Receiver<()> {
        self.shared.ready_to_notify.subscribe()
    }

    /// Adapter state observer with current-value replay.
    pub fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.shared.adapter.watch()
    }

    /// The latest peripheral adapter state.
    pub fn current_adapter_state(&self) -> AdapterState {
        self.shared.adapter.current()
    }

    async fn ensure_ready(&self) -> Result<()> {
        power::ensure_ready(&self.shared.phase, &self.shared.adapter).await
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Occupy a single-pending-callback slot, failing fast if it is taken.
async fn claim_slot<V>(
    slot: &PendingSlot<V>,
    operation: &str,
) -> Result<oneshot::Receiver<Result<V>>> {
    let mut slot = slot.lock().await;
    if slot.is_some() {
        return Err(CorralError::OperationFailed(format!(
            "{} already pending",
            operation
        )));
    }
    let (tx, rx) = oneshot::channel();
    *slot = Some(tx);
    Ok(rx)
}

// ----------------------------------------------------------------------------
// Event Dispatch
// ----------------------------------------------------------------------------

async fn pump_events(shared: Arc<Shared>, mut events: PeripheralEventReceiver) {
    while let Some(event) = events.recv().await {
        dispatch(&shared, event).await;
    }
    debug!("peripheral event channel closed");
}

async fn dispatch(shared: &Shared, event: PeripheralEvent) {
    match event {
        PeripheralEvent::StateChanged(state) => {
            debug!(?state, "peripheral adapter state changed");
            shared.adapter.publish(state);
        }

        PeripheralEvent::AdvertisingStarted { error } => {
            // Taking the slot clears it, so a stale outcome arriving later
            // finds nothing to resolve.
            match shared.pending_advertising.lock().await.take() {
                Some(tx) => {
                    let outcome = match error {
                        None => Ok(()),
                        Some(reason) => Err(CorralError::OperationFailed(reason)),
                    };
                    let _ = tx.send(outcome);
                }
                None => debug!("unmatched advertising outcome dropped"),
            }
        }

        PeripheralEvent::ServiceAdded { service, error } => {
            match shared.pending_service.lock().await.take() {
                Some(tx) => {
                    let outcome = match error {
                        None => Ok(service),
                        Some(reason) => Err(CorralError::OperationFailed(reason)),
                    };
                    let _ = tx.send(outcome);
                }
                None => debug!(%service, "unmatched add-service outcome dropped"),
            }
        }

        PeripheralEvent::SubscriptionChanged {
            central,
            characteristic,
            subscribed,
        } => {
            debug!(%central, %characteristic, subscribed, "subscription changed");
            shared.subscriptions.publish(SubscriptionUpdate {
                central,
                characteristic,
                subscribed,
            });
        }

        PeripheralEvent::ReadRequestReceived(request) => {
            shared.read_requests.publish(request);
        }

        PeripheralEvent::WriteRequestsReceived(requests) => {
            shared.write_requests.publish(requests);
        }

        PeripheralEvent::ReadyToNotify => {
            shared.ready_to_notify.publish(());
        }
    }
}

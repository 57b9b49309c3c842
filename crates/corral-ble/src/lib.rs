//! Role workflows for the Corral BLE bridge
//!
//! This crate drives the request/response side of the bridge on top of the
//! primitives in `corral-core`:
//!
//! - [`central`] - scanning, connection, discovery, and value reads
//! - [`advertiser`] - advertising, service publication, and request handling
//! - [`channel`] - the rendezvous channel composing both roles
//! - [`config`] - stream buffer configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use corral_ble::Central;
//! use corral_core::{central_event_channel, CentralBackend, ScanOptions};
//!
//! # async fn example(backend: Arc<dyn CentralBackend>) -> corral_core::Result<()> {
//! let (events_tx, events_rx) = central_event_channel();
//! // Hand `events_tx` to the radio stack, `events_rx` to the workflow.
//! # drop(events_tx);
//! let central = Central::new(backend, events_rx);
//!
//! central.start().await?;
//! central.scan(None, ScanOptions::default()).await?;
//!
//! let mut discoveries = central.peripherals();
//! while let Ok(peripheral) = discoveries.recv().await {
//!     let connected = central.connect(&peripheral).await?;
//!     println!("connected to {}", connected.id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod advertiser;
pub mod central;
pub mod channel;
pub mod config;
mod power;

// Public API exports
pub use advertiser::Advertiser;
pub use central::Central;
pub use channel::{ChannelEvent, RendezvousChannel};
pub use config::BridgeConfig;

// Re-export the core contract for convenience
pub use corral_core::{
    CentralBackend, CentralEvent, CorralError, PeripheralBackend, PeripheralEvent, Result,
};

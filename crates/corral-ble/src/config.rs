//! Workflow configuration

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Buffer sizing for the broadcast streams a workflow exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Capacity of the discovered-peripheral stream.
    pub discovery_buffer: usize,
    /// Capacity of the subscription-push notification stream.
    pub notification_buffer: usize,
    /// Capacity of the incoming read/write request streams.
    pub request_buffer: usize,
    /// Capacity of the subscription-change stream.
    pub subscription_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            discovery_buffer: 32,
            notification_buffer: 64,
            request_buffer: 32,
            subscription_buffer: 16,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the discovered-peripheral stream capacity.
    pub fn with_discovery_buffer(mut self, capacity: usize) -> Self {
        self.discovery_buffer = capacity;
        self
    }

    /// Set the notification stream capacity.
    pub fn with_notification_buffer(mut self, capacity: usize) -> Self {
        self.notification_buffer = capacity;
        self
    }

    /// Set the request stream capacity.
    pub fn with_request_buffer(mut self, capacity: usize) -> Self {
        self.request_buffer = capacity;
        self
    }

    /// Set the subscription-change stream capacity.
    pub fn with_subscription_buffer(mut self, capacity: usize) -> Self {
        self.subscription_buffer = capacity;
        self
    }
}

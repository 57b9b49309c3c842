//! Error types for the Corral bridge

use core::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::types::AdapterState;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// What a failed targeted discovery was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Service,
    Characteristic,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Service => write!(f, "service"),
            TargetKind::Characteristic => write!(f, "characteristic"),
        }
    }
}

/// Errors surfaced to workflow callers.
#[derive(Debug, Error)]
pub enum CorralError {
    #[error("adapter not ready (state: {state:?})")]
    AdapterNotReady { state: AdapterState },

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("{kind} not found: {id}")]
    TargetNotFound { kind: TargetKind, id: Uuid },

    #[error("failed to decode value: {0}")]
    DecodeFailed(String),

    #[error("update carried no value")]
    ValueAbsent,

    #[error("backend command failed: {0}")]
    Backend(String),

    #[error("event channel closed")]
    ChannelClosed,
}

pub type Result<T> = core::result::Result<T, CorralError>;

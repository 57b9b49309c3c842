//! Adapter bring-up shared by both role workflows

use tokio::sync::{watch, Mutex};

use corral_core::{AdapterState, CorralError, Result, StateFeed};

// ----------------------------------------------------------------------------
// Bring-Up State Machine
// ----------------------------------------------------------------------------

/// Lifecycle of a role workflow: `Idle -> BringingUp -> Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    BringingUp,
    Ready,
}

/// Claim the bring-up slot, or short-circuit.
///
/// Returns `Ok(true)` when the caller should proceed with initialization,
/// `Ok(false)` when the workflow is already ready (no-op success), and an
/// error when a bring-up is already in flight.
pub(crate) async fn claim_bring_up(phase: &Mutex<Phase>) -> Result<bool> {
    let mut phase = phase.lock().await;
    match *phase {
        Phase::Ready => Ok(false),
        Phase::BringingUp => Err(CorralError::OperationFailed(
            "adapter bring-up already in progress".into(),
        )),
        Phase::Idle => {
            *phase = Phase::BringingUp;
            Ok(true)
        }
    }
}

/// Await the *next* adapter state after `observer` was attached and judge it.
///
/// A failed bring-up returns the workflow to `Idle` without tearing the
/// adapter down, so a later call can try again.
pub(crate) async fn await_power_on(
    phase: &Mutex<Phase>,
    mut observer: watch::Receiver<AdapterState>,
) -> Result<()> {
    if observer.changed().await.is_err() {
        *phase.lock().await = Phase::Idle;
        return Err(CorralError::ChannelClosed);
    }
    let state = *observer.borrow_and_update();

    let mut phase = phase.lock().await;
    if state.is_powered_on() {
        *phase = Phase::Ready;
        Ok(())
    } else {
        *phase = Phase::Idle;
        Err(CorralError::AdapterNotReady { state })
    }
}

/// Fail fast unless the workflow is ready and the adapter still powered on.
pub(crate) async fn ensure_ready(phase: &Mutex<Phase>, adapter: &StateFeed) -> Result<()> {
    if *phase.lock().await != Phase::Ready {
        return Err(CorralError::AdapterNotReady {
            state: adapter.current(),
        });
    }
    let state = adapter.current();
    if !state.is_powered_on() {
        return Err(CorralError::AdapterNotReady { state });
    }
    Ok(())
}

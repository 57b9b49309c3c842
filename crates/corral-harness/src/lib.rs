//! Corral Harness
//!
//! Deterministic in-process backends for exercising the Corral workflows in
//! tests:
//!
//! - [`stub`] - recording backends; the test injects collaborator events on
//!   the role's event channel and asserts against the command log
//! - [`radio`] - a virtual radio that loops a central backend and a
//!   peripheral backend back to back, enough to drive the rendezvous
//!   handshake end to end without hardware

pub mod radio;
pub mod stub;

pub use radio::{VirtualCentral, VirtualPeripheral, VirtualRadio};
pub use stub::{CentralCommand, PeripheralCommand, StubCentral, StubPeripheral};

//! Common utilities for nia-sensor
//!
//! This crate provides the pieces shared between the acquisition core and its
//! tests: the device-access capability trait, the event bridge between the
//! poll worker and the session owner, error handling and logging setup.

pub mod backend;
pub mod channel;
pub mod error;
pub mod logging;
pub mod session;
pub mod test_utils;

pub use backend::{AccessMode, BackendError, HidBackend, RawHandle, SubscriptionId, WaitOutcome};
pub use channel::{
    ChangeKind, DeviceChange, EventBridge, EventSource, NotificationType, SessionEvent,
    create_event_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use session::{SessionLease, SessionRegistry};

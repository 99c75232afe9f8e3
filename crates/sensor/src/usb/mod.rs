//! USB subsystem
//!
//! Device discovery, report I/O, hot-plug notifications and the background
//! poll worker, all on top of the [`common::HidBackend`] capability. The
//! libusb implementation of that capability lives in [`rusb_backend`].

pub mod catalog;
pub mod channel;
pub mod error;
pub mod hotplug;
pub mod poll;
pub mod rusb_backend;

pub use catalog::DeviceCatalog;
pub use channel::{HandleSet, ReportChannel, TransferModes};
pub use error::DeviceError;
pub use hotplug::{HotplugRegistration, HotplugWatcher};
pub use poll::PollLoop;
pub use rusb_backend::RusbBackend;

//! NIA biosensor acquisition
//!
//! Discovers the sensor on the HID interface class, keeps one exclusive
//! session open while it is present, decodes its input reports on a
//! background worker and exposes the running average together with a blink
//! or motion classification of recent activity.

pub mod config;
pub mod detector;
pub mod host;
pub mod signal;
pub mod usb;

pub use config::SensorConfig;
pub use detector::{ArtifactDetector, DREAMING, DetectorMode};
pub use host::{EEG_MAX, SensorHost};
pub use signal::{SampleHistory, SignalState};
pub use usb::{DeviceCatalog, DeviceError, ReportChannel, RusbBackend};

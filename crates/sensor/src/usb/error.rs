//! Device session errors

use common::BackendError;
use protocol::{DeviceIdentity, DevicePath, ProtocolError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(#[source] BackendError),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: DevicePath,
        #[source]
        source: BackendError,
    },

    #[error("Input report read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("Input report read failed: {0}")]
    Read(#[source] BackendError),

    #[error("Feature report I/O failed: {0}")]
    FeatureIo(#[source] BackendError),

    #[error("Output report write failed: {0}")]
    Write(#[source] BackendError),

    #[error("Malformed report: {0}")]
    Framing(#[from] ProtocolError),

    #[error("Hot-plug registration failed: {0}")]
    Hotplug(#[source] BackendError),

    #[error("No device matching {0}")]
    NotFound(DeviceIdentity),

    #[error("A session is already active on {0}")]
    SessionActive(DevicePath),

    #[error("Session on {0} is closed")]
    Closed(DevicePath),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl DeviceError {
    /// Whether the error means the session can no longer be used
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            DeviceError::ReadTimeout(_) | DeviceError::Read(_) | DeviceError::Closed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lost_kinds() {
        assert!(DeviceError::ReadTimeout(Duration::from_secs(3)).is_session_lost());
        assert!(DeviceError::Read(BackendError::Usb(rusb::Error::NoDevice)).is_session_lost());
        assert!(
            !DeviceError::Framing(ProtocolError::SampleCountOutOfRange { count: 18, max: 17 })
                .is_session_lost()
        );
        assert!(!DeviceError::FeatureIo(BackendError::Usb(rusb::Error::Pipe)).is_session_lost());
    }

    #[test]
    fn test_error_display() {
        let err = DeviceError::Open {
            path: DevicePath::new("usb:001:004"),
            source: BackendError::Usb(rusb::Error::Access),
        };
        assert!(err.to_string().contains("usb:001:004"));
    }
}

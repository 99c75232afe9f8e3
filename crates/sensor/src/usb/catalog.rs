//! Device discovery
//!
//! Enumerates devices exposing the configured interface class and picks the
//! one whose vendor/product identity matches. Session leases come from the
//! backend's registry, so every catalog over the same backend sees the same
//! claims.

use crate::usb::error::DeviceError;
use common::{AccessMode, HidBackend, SessionLease};
use protocol::{DeviceIdentity, DevicePath, InterfaceClass};
use std::sync::Arc;
use tracing::{debug, info};

/// Device catalog over a backend
pub struct DeviceCatalog {
    backend: Arc<dyn HidBackend>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn HidBackend>) -> Self {
        Self { backend }
    }

    /// List every present device exposing `class`
    pub fn find(&self, class: InterfaceClass) -> Result<Vec<DevicePath>, DeviceError> {
        let paths = self
            .backend
            .enumerate(class)
            .map_err(DeviceError::Enumeration)?;

        debug!(
            "Enumerated {} device(s) with interface class {:#04x}",
            paths.len(),
            class.0
        );
        Ok(paths)
    }

    /// Return the first path whose identity equals `identity`
    ///
    /// Every handle opened while probing is closed again, including the one
    /// on the matching device. Candidates that cannot be opened or queried
    /// are skipped.
    pub fn match_by_signature(
        &self,
        paths: &[DevicePath],
        identity: DeviceIdentity,
    ) -> Option<DevicePath> {
        for path in paths {
            match self.probe(path) {
                Some(found) if found == identity => {
                    info!("Found {} at {}", identity, path);
                    return Some(path.clone());
                }
                Some(found) => {
                    debug!("Skipping {} ({})", path, found);
                }
                None => {}
            }
        }
        None
    }

    /// Identity of every present device exposing `class`
    ///
    /// Devices that cannot be queried are listed without an identity.
    pub fn survey(
        &self,
        class: InterfaceClass,
    ) -> Result<Vec<(DevicePath, Option<DeviceIdentity>)>, DeviceError> {
        Ok(self
            .find(class)?
            .into_iter()
            .map(|path| {
                let identity = self.probe(&path);
                (path, identity)
            })
            .collect())
    }

    /// Reserve `path` for a session
    pub fn lease(&self, path: &DevicePath) -> Result<SessionLease, DeviceError> {
        self.backend
            .sessions()
            .acquire(path)
            .ok_or_else(|| DeviceError::SessionActive(path.clone()))
    }
}

//! Exclusive session claims on device paths
//!
//! Every backend owns one [`SessionRegistry`]. Whoever opens a report
//! channel on a path must first hold its [`SessionLease`], so no two
//! channels hold handles on the same device at once, however many owners
//! share the backend.

use protocol::DevicePath;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Held = Arc<Mutex<HashSet<DevicePath>>>;

/// Paths currently claimed by a session
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    held: Held,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`; `None` if another session holds it
    pub fn acquire(&self, path: &DevicePath) -> Option<SessionLease> {
        if !lock(&self.held).insert(path.clone()) {
            return None;
        }

        Some(SessionLease {
            path: path.clone(),
            held: self.held.clone(),
        })
    }

    /// Whether a session currently holds `path`
    pub fn is_held(&self, path: &DevicePath) -> bool {
        lock(&self.held).contains(path)
    }
}

/// Exclusive claim on a device path, released on drop
#[derive(Debug)]
pub struct SessionLease {
    path: DevicePath,
    held: Held,
}

impl SessionLease {
    pub fn path(&self) -> &DevicePath {
        &self.path
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.path);
    }
}

fn lock(held: &Mutex<HashSet<DevicePath>>) -> MutexGuard<'_, HashSet<DevicePath>> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Async channel bridge between the blocking device side and the session owner
//!
//! The poll worker and the hot-plug callback run on plain threads and must
//! never block on the owner, while the owner usually lives in a Tokio task.
//! Both directions therefore go through bounded `async_channel`s: the
//! device side uses `send_blocking`, the owner awaits `recv()`.

use async_channel::{Receiver, Sender, bounded};
use protocol::DevicePath;

/// Arrival or removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Arrival,
    Removal,
}

/// What a device-change notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    /// A device interface (the level sessions are bound at)
    Interface,
    /// An already opened handle
    Handle,
}

/// Device-change notification from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    pub kind: ChangeKind,
    pub notification_type: NotificationType,
    /// Device name as reported by the OS
    pub device_name: String,
}

impl DeviceChange {
    pub fn interface(kind: ChangeKind, device_name: impl Into<String>) -> Self {
        Self {
            kind,
            notification_type: NotificationType::Interface,
            device_name: device_name.into(),
        }
    }
}

/// Events from the poll worker to the session owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session tore itself down; rediscovery is up to the owner
    Lost {
        /// Path the session was bound to
        path: DevicePath,
        /// Human readable cause
        reason: String,
    },
}

/// Owner side (async)
pub struct EventBridge {
    change_rx: Receiver<DeviceChange>,
    session_rx: Receiver<SessionEvent>,
}

impl EventBridge {
    /// Receive the next device-change notification
    pub async fn recv_change(&self) -> crate::Result<DeviceChange> {
        self.change_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next session event
    pub async fn recv_session(&self) -> crate::Result<SessionEvent> {
        self.session_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a session event without waiting
    pub fn try_recv_session(&self) -> Option<SessionEvent> {
        self.session_rx.try_recv().ok()
    }

    /// Try to receive a device change without waiting
    pub fn try_recv_change(&self) -> Option<DeviceChange> {
        self.change_rx.try_recv().ok()
    }
}

/// Device side (blocking)
#[derive(Clone)]
pub struct EventSource {
    change_tx: Sender<DeviceChange>,
    session_tx: Sender<SessionEvent>,
}

impl EventSource {
    /// Send a session event (blocking)
    pub fn send_session(&self, event: SessionEvent) -> crate::Result<()> {
        self.session_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a device-change notification (blocking)
    pub fn send_change(&self, change: DeviceChange) -> crate::Result<()> {
        self.change_tx
            .send_blocking(change)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Sender handed to a backend's hot-plug registration
    pub fn change_sender(&self) -> Sender<DeviceChange> {
        self.change_tx.clone()
    }
}

/// Create the channel bridge between the device side and the owner
///
/// Returns (EventBridge for the owner, EventSource for the device side)
pub fn create_event_bridge() -> (EventBridge, EventSource) {
    let (change_tx, change_rx) = bounded(64);
    let (session_tx, session_rx) = bounded(16);

    (
        EventBridge {
            change_rx,
            session_rx,
        },
        EventSource {
            change_tx,
            session_tx,
        },
    )
}

//! Device-access capability
//!
//! The acquisition core never talks to the OS directly. Everything it needs
//! (enumeration, opening handles, overlapped reads, report transfers and
//! hot-plug notifications) goes through [`HidBackend`]. The production
//! implementation sits on libusb; tests use the scripted
//! [`MockBackend`](crate::test_utils::MockBackend).
//!
//! Handles are plain ids owned by the backend. A handle stays valid until
//! [`HidBackend::close`] is called on it; closing twice is a no-op.

use async_channel::Sender;
use protocol::{DeviceIdentity, DevicePath, InterfaceClass, ReportCapabilities, ReportTransfer};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::channel::DeviceChange;
use crate::session::SessionRegistry;

/// Backend-assigned handle id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u32);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hot-plug registration id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u32);

/// Access requested when opening a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Attribute and capability queries, feature reports
    Query,
    /// Read-only, overlapped-capable
    Read,
    /// Write-only
    Write,
}

/// Completion state of an overlapped read
#[derive(Debug)]
pub enum WaitOutcome {
    /// The read completed; buffer includes the report ID byte
    Completed(Vec<u8>),
    /// Nothing arrived within the timeout; the read is still pending
    TimedOut,
    /// The wait itself failed
    Failed(BackendError),
}

/// Capability-level failures
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Device not found: {0}")]
    NotFound(DevicePath),

    #[error("Invalid or closed handle {0}")]
    InvalidHandle(RawHandle),

    #[error("Handle {handle} was not opened for {needed:?} access")]
    WrongAccess { handle: RawHandle, needed: AccessMode },

    #[error("No read pending on handle {0}")]
    NoPendingRead(RawHandle),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Access to HID devices
///
/// Implementations must be usable from the poll worker and the owner thread
/// at the same time. A blocked [`wait_read`](HidBackend::wait_read) must
/// return promptly once its handle is closed from another thread.
pub trait HidBackend: Send + Sync + 'static {
    /// List device paths exposing an interface of the given class
    fn enumerate(&self, class: InterfaceClass) -> Result<Vec<DevicePath>, BackendError>;

    /// Open a handle on a device path
    fn open(&self, path: &DevicePath, access: AccessMode) -> Result<RawHandle, BackendError>;

    /// Close a handle, cancelling anything pending on it
    fn close(&self, handle: RawHandle);

    /// Vendor/product identity of the device behind a handle
    fn attributes(&self, handle: RawHandle) -> Result<DeviceIdentity, BackendError>;

    /// Report sizes of the device behind a handle
    fn capabilities(&self, handle: RawHandle) -> Result<ReportCapabilities, BackendError>;

    /// Start an overlapped input-report read of `len` bytes
    fn begin_read(&self, handle: RawHandle, len: usize) -> Result<(), BackendError>;

    /// Wait up to `timeout` for the pending read to complete
    fn wait_read(&self, handle: RawHandle, timeout: Duration) -> WaitOutcome;

    /// Cancel a pending read; best effort
    fn cancel_read(&self, handle: RawHandle);

    /// Execute a synchronous report transfer
    ///
    /// Returns the received buffer for IN transfers and an empty buffer for
    /// OUT transfers.
    fn transfer(&self, handle: RawHandle, transfer: ReportTransfer)
    -> Result<Vec<u8>, BackendError>;

    /// Discard input reports buffered by the OS
    fn flush_input(&self, handle: RawHandle) -> Result<(), BackendError>;

    /// Start delivering arrival/removal notifications for a device
    fn watch(
        &self,
        class: InterfaceClass,
        identity: DeviceIdentity,
        events: Sender<DeviceChange>,
    ) -> Result<SubscriptionId, BackendError>;

    /// Stop a hot-plug registration
    fn unwatch(&self, subscription: SubscriptionId) -> Result<(), BackendError>;

    /// Session claims on this backend's devices
    fn sessions(&self) -> &SessionRegistry;
}

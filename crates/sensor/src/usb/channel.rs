//! Report I/O for one device session
//!
//! A [`ReportChannel`] owns the three handles of a session: the query handle
//! for capabilities and feature reports, the read handle for streamed input
//! reports and the write handle for output reports. Input reads are always
//! bounded by a timeout; a read that times out or fails tears the whole
//! session down, since a device that stops answering has almost always been
//! unplugged.
//!
//! Opening a channel consumes the path's [`SessionLease`]; the lease is
//! released together with the handles, so no two channels hold handles on
//! the same device at once.
//!
//! The channel is shared between the poll worker and the session owner, so
//! the handle set sits behind a mutex that is never held across a wait.

use crate::usb::error::DeviceError;
use common::{AccessMode, BackendError, HidBackend, RawHandle, SessionLease, WaitOutcome};
use protocol::{
    DevicePath, HandleRole, RawReport, ReportCapabilities, ReportTransfer, TransferMode,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Handles of one device session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSet {
    /// Capability queries and feature reports
    pub info: RawHandle,
    /// Overlapped input-report reads
    pub read: RawHandle,
    /// Output reports; dropped after a failed write
    pub write: Option<RawHandle>,
}

/// Which transfer variants the channel uses for input and output reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferModes {
    pub input: TransferMode,
    pub output: TransferMode,
}

/// Report channel bound to one device path
pub struct ReportChannel {
    backend: Arc<dyn HidBackend>,
    path: DevicePath,
    capabilities: ReportCapabilities,
    modes: TransferModes,
    handles: Mutex<Option<HandleSet>>,
    lease: Mutex<Option<SessionLease>>,
}

impl ReportChannel {
    /// Open the query, read and write handles on the leased path
    ///
    /// Fails if any of the three cannot be opened; handles opened before
    /// the failure are closed again and the lease is released.
    pub fn open_for_session(
        backend: Arc<dyn HidBackend>,
        lease: SessionLease,
        modes: TransferModes,
    ) -> Result<Self, DeviceError> {
        let path = lease.path().clone();
        let open_error = |source: BackendError| DeviceError::Open {
            path: path.clone(),
            source,
        };

        let info = backend.open(&path, AccessMode::Query).map_err(open_error)?;

        let read = match backend.open(&path, AccessMode::Read) {
            Ok(handle) => handle,
            Err(e) => {
                backend.close(info);
                return Err(open_error(e));
            }
        };

        let write = match backend.open(&path, AccessMode::Write) {
            Ok(handle) => handle,
            Err(e) => {
                backend.close(read);
                backend.close(info);
                return Err(open_error(e));
            }
        };

        let capabilities = match backend.capabilities(info) {
            Ok(caps) => caps,
            Err(e) => {
                backend.close(write);
                backend.close(read);
                backend.close(info);
                return Err(open_error(e));
            }
        };

        info!(
            "Opened session on {}: input={}B output={}B feature={}B",
            path,
            capabilities.input_report_len,
            capabilities.output_report_len,
            capabilities.feature_report_len
        );
        debug!(
            "Session handles on {}: info={} read={} write={}",
            path, info, read, write
        );

        Ok(Self {
            backend,
            path,
            capabilities,
            modes,
            handles: Mutex::new(Some(HandleSet {
                info,
                read,
                write: Some(write),
            })),
            lease: Mutex::new(Some(lease)),
        })
    }

    pub fn path(&self) -> &DevicePath {
        &self.path
    }

    pub fn capabilities(&self) -> ReportCapabilities {
        self.capabilities
    }

    /// Whether the session still holds its handles
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Current handle set, if still open
    pub fn handles(&self) -> Option<HandleSet> {
        *self.lock()
    }

    /// Read one input report, waiting at most `timeout`
    ///
    /// A timeout cancels the pending read and closes every handle of the
    /// session before returning [`DeviceError::ReadTimeout`]; any other
    /// failure does the same and returns [`DeviceError::Read`]. A buffer
    /// that arrives but cannot be framed leaves the session open.
    pub fn read_input_report(&self, timeout: Duration) -> Result<RawReport, DeviceError> {
        let handles = self.handles().ok_or_else(|| self.closed())?;
        let len = self.capabilities.input_report_len;

        let buffer = match self.modes.input {
            TransferMode::Interrupt => self.read_overlapped(handles.read, len, timeout)?,
            TransferMode::Control => self
                .backend
                .transfer(handles.info, ReportTransfer::InputViaControl { len })
                .map_err(|e| {
                    warn!("Control input read on {} failed: {}", self.path, e);
                    self.close();
                    DeviceError::Read(e)
                })?,
        };

        trace!("Input report from {}: {} bytes", self.path, buffer.len());
        Ok(RawReport::from_bytes(&buffer)?)
    }

    fn read_overlapped(
        &self,
        read: RawHandle,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        if let Err(e) = self.backend.begin_read(read, len) {
            warn!("Could not start read on {}: {}", self.path, e);
            self.close();
            return Err(DeviceError::Read(e));
        }

        match self.backend.wait_read(read, timeout) {
            WaitOutcome::Completed(buffer) => Ok(buffer),
            WaitOutcome::TimedOut => {
                warn!("No input report from {} within {:?}", self.path, timeout);
                self.backend.cancel_read(read);
                self.close();
                Err(DeviceError::ReadTimeout(timeout))
            }
            WaitOutcome::Failed(e) => {
                debug!("Wait on {} failed: {}", self.path, e);
                self.backend.cancel_read(read);
                self.close();
                Err(DeviceError::Read(e))
            }
        }
    }

    /// Read a feature report through the query handle
    pub fn read_feature_report(&self) -> Result<Vec<u8>, DeviceError> {
        let handles = self.handles().ok_or_else(|| self.closed())?;
        self.backend
            .transfer(
                handles.info,
                ReportTransfer::FeatureIn {
                    len: self.capabilities.feature_report_len,
                },
            )
            .map_err(DeviceError::FeatureIo)
    }

    /// Write a feature report through the query handle
    pub fn write_feature_report(&self, data: &[u8]) -> Result<(), DeviceError> {
        let handles = self.handles().ok_or_else(|| self.closed())?;
        self.backend
            .transfer(
                handles.info,
                ReportTransfer::FeatureOut {
                    data: data.to_vec(),
                },
            )
            .map(|_| ())
            .map_err(DeviceError::FeatureIo)
    }

    /// Write an output report
    ///
    /// `data` is zero-padded or truncated to the output report length. In
    /// interrupt mode a failed write closes the write handle; later writes
    /// fail until a new session is opened.
    pub fn write_output_report(&self, data: &[u8]) -> Result<(), DeviceError> {
        let handles = self.handles().ok_or_else(|| self.closed())?;

        let mut report = data.to_vec();
        if self.capabilities.output_report_len > 0 {
            report.resize(self.capabilities.output_report_len, 0);
        }
        let transfer = ReportTransfer::output(self.modes.output, report);

        let handle = match transfer.role() {
            HandleRole::Write => handles.write.ok_or_else(|| self.closed())?,
            _ => handles.info,
        };
        let on_write_handle = Some(handle) == handles.write;

        if let Err(e) = self.backend.transfer(handle, transfer) {
            if on_write_handle {
                warn!("Output write on {} failed, closing write handle: {}", self.path, e);
                if let Some(set) = self.lock().as_mut() {
                    set.write = None;
                }
                self.backend.close(handle);
            }
            return Err(DeviceError::Write(e));
        }
        Ok(())
    }

    /// Discard input reports the OS has buffered; failures are only logged
    pub fn flush_input_queue(&self) {
        let Some(handles) = self.handles() else {
            return;
        };

        if let Err(e) = self.backend.flush_input(handles.read) {
            warn!("Failed to flush input queue on {}: {}", self.path, e);
        }
    }

    /// Close every handle of the session and release its lease; idempotent
    pub fn close(&self) {
        let Some(handles) = self.lock().take() else {
            return;
        };

        self.backend.close(handles.read);
        if let Some(write) = handles.write {
            self.backend.close(write);
        }
        self.backend.close(handles.info);
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Closed session handles on {}", self.path);
    }

    fn closed(&self) -> DeviceError {
        DeviceError::Closed(self.path.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<HandleSet>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

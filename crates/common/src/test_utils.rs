//! Test utilities for nia-sensor
//!
//! Provides a scripted [`HidBackend`] and helper functions for testing across
//! crates.
//!
//! # Example
//!
//! ```
//! use common::HidBackend;
//! use common::test_utils::{MockBackend, NIA_PATH};
//! use protocol::{InterfaceClass, NIA_IDENTITY};
//!
//! let backend = MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY);
//! let paths = backend.enumerate(InterfaceClass::HID).unwrap();
//! assert_eq!(paths.len(), 1);
//! ```

use crate::backend::{AccessMode, BackendError, HidBackend, RawHandle, SubscriptionId, WaitOutcome};
use crate::channel::DeviceChange;
use crate::session::SessionRegistry;
use async_channel::Sender;
use protocol::{
    DeviceIdentity, DevicePath, InterfaceClass, REPORT_LEN, RawReport, ReportCapabilities,
    ReportTransfer, Sample,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Path used for the NIA in tests
pub const NIA_PATH: &str = r"\\?\hid#vid_1234&pid_0000#6&2f1e0a&0&0000";

/// Capabilities of the NIA as reported by the OS HID stack
pub fn nia_capabilities() -> ReportCapabilities {
    ReportCapabilities {
        input_report_len: REPORT_LEN,
        output_report_len: 2,
        feature_report_len: 2,
    }
}

/// Build a raw input report buffer carrying `samples`
pub fn build_report(samples: &[Sample], timer: u16) -> Vec<u8> {
    RawReport::from_samples(samples, timer)
        .map(|report| report.as_bytes().to_vec())
        .unwrap_or_else(|e| panic!("invalid test report: {}", e))
}

/// Outcome forced onto the next `wait_read`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedWait {
    TimedOut,
    Failed,
}

/// A device known to the mock
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub path: DevicePath,
    pub identity: DeviceIdentity,
    pub capabilities: ReportCapabilities,
    /// Reading attributes fails for this device
    pub attributes_fail: bool,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    enumerate_fails: bool,
    failing_opens: HashSet<(DevicePath, AccessMode)>,
    open: HashMap<RawHandle, (DevicePath, AccessMode)>,
    next_handle: u32,
    total_opened: usize,
    pending: HashSet<RawHandle>,
    reports: VecDeque<Vec<u8>>,
    wait_script: VecDeque<ScriptedWait>,
    fail_begin_read: bool,
    cancels: usize,
    fail_transfers: bool,
    feature_report: Vec<u8>,
    feature_writes: Vec<Vec<u8>>,
    output_writes: Vec<(HandleKind, Vec<u8>)>,
    transfers: Vec<&'static str>,
    fail_flush: bool,
    flushes: usize,
    watchers: HashMap<SubscriptionId, Sender<DeviceChange>>,
    next_subscription: u32,
    fail_unwatch: bool,
}

/// Whether an output write went to the interrupt or control path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Interrupt,
    Control,
}

/// Scripted in-memory backend
///
/// Tracks every handle it hands out so tests can assert that nothing leaks.
/// Queued reports complete pending reads; when the queue is empty a wait
/// blocks until a report is pushed, the handle is closed, or the timeout
/// elapses.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    ready: Condvar,
    sessions: SessionRegistry,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device with NIA capabilities
    pub fn with_device(self, path: &str, identity: DeviceIdentity) -> Self {
        self.with_mock_device(MockDevice {
            path: DevicePath::new(path),
            identity,
            capabilities: nia_capabilities(),
            attributes_fail: false,
        })
    }

    pub fn with_mock_device(self, device: MockDevice) -> Self {
        self.lock().devices.push(device);
        self
    }

    /// Make a device present after construction
    pub fn plug(&self, path: &str, identity: DeviceIdentity) {
        self.lock().devices.push(MockDevice {
            path: DevicePath::new(path),
            identity,
            capabilities: nia_capabilities(),
            attributes_fail: false,
        });
    }

    /// Remove a device; handles already open on it stay open
    pub fn unplug(&self, path: &str) {
        let path = DevicePath::new(path);
        self.lock().devices.retain(|device| device.path != path);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_for(&self, state: &MockState, handle: RawHandle) -> Result<MockDevice, BackendError> {
        let (path, _) = state
            .open
            .get(&handle)
            .ok_or(BackendError::InvalidHandle(handle))?;
        state
            .devices
            .iter()
            .find(|d| &d.path == path)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(path.clone()))
    }

    fn require_access(
        state: &MockState,
        handle: RawHandle,
        needed: AccessMode,
    ) -> Result<(), BackendError> {
        match state.open.get(&handle) {
            None => Err(BackendError::InvalidHandle(handle)),
            Some((_, access)) if *access != needed => {
                Err(BackendError::WrongAccess { handle, needed })
            }
            Some(_) => Ok(()),
        }
    }

    // ---- scripting ----

    pub fn set_enumerate_fails(&self, fails: bool) {
        self.lock().enumerate_fails = fails;
    }

    /// Make opening `path` with `access` fail
    pub fn fail_open(&self, path: &str, access: AccessMode) {
        self.lock()
            .failing_opens
            .insert((DevicePath::new(path), access));
    }

    /// Queue an input report
    pub fn push_report(&self, report: Vec<u8>) {
        self.lock().reports.push_back(report);
        self.ready.notify_all();
    }

    /// Queue an input report carrying `samples`
    pub fn push_samples(&self, samples: &[Sample]) {
        self.push_report(build_report(samples, 0x0100));
    }

    /// Force the outcome of the next `wait_read`
    pub fn script_wait(&self, outcome: ScriptedWait) {
        self.lock().wait_script.push_back(outcome);
        self.ready.notify_all();
    }

    pub fn set_fail_begin_read(&self, fails: bool) {
        self.lock().fail_begin_read = fails;
    }

    pub fn set_fail_transfers(&self, fails: bool) {
        self.lock().fail_transfers = fails;
    }

    pub fn set_fail_flush(&self, fails: bool) {
        self.lock().fail_flush = fails;
    }

    pub fn set_fail_unwatch(&self, fails: bool) {
        self.lock().fail_unwatch = fails;
    }

    pub fn set_feature_report(&self, report: Vec<u8>) {
        self.lock().feature_report = report;
    }

    /// Deliver a device change to every registered watcher
    pub fn emit(&self, change: DeviceChange) {
        let watchers: Vec<_> = self.lock().watchers.values().cloned().collect();
        for watcher in watchers {
            let _ = watcher.send_blocking(change.clone());
        }
    }

    // ---- inspection ----

    /// Handles currently open
    pub fn open_handle_count(&self) -> usize {
        self.lock().open.len()
    }

    /// Handles ever opened
    pub fn total_opened(&self) -> usize {
        self.lock().total_opened
    }

    /// Open handles on `path`
    pub fn open_handles_on(&self, path: &str) -> Vec<AccessMode> {
        let path = DevicePath::new(path);
        self.lock()
            .open
            .values()
            .filter(|(p, _)| *p == path)
            .map(|(_, access)| *access)
            .collect()
    }

    pub fn cancel_count(&self) -> usize {
        self.lock().cancels
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    pub fn queued_reports(&self) -> usize {
        self.lock().reports.len()
    }

    pub fn feature_writes(&self) -> Vec<Vec<u8>> {
        self.lock().feature_writes.clone()
    }

    pub fn output_writes(&self) -> Vec<(HandleKind, Vec<u8>)> {
        self.lock().output_writes.clone()
    }

    /// Names of every synchronous transfer executed, in order
    pub fn transfer_log(&self) -> Vec<&'static str> {
        self.lock().transfers.clone()
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }
}

impl HidBackend for MockBackend {
    fn enumerate(&self, _class: InterfaceClass) -> Result<Vec<DevicePath>, BackendError> {
        let state = self.lock();
        if state.enumerate_fails {
            return Err(BackendError::Usb(rusb::Error::Access));
        }
        Ok(state.devices.iter().map(|d| d.path.clone()).collect())
    }

    fn open(&self, path: &DevicePath, access: AccessMode) -> Result<RawHandle, BackendError> {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| &d.path == path) {
            return Err(BackendError::NotFound(path.clone()));
        }
        if state.failing_opens.contains(&(path.clone(), access)) {
            return Err(BackendError::Usb(rusb::Error::Access));
        }

        state.next_handle += 1;
        let handle = RawHandle(state.next_handle);
        state.open.insert(handle, (path.clone(), access));
        state.total_opened += 1;
        Ok(handle)
    }

    fn close(&self, handle: RawHandle) {
        let mut state = self.lock();
        state.open.remove(&handle);
        state.pending.remove(&handle);
        drop(state);
        self.ready.notify_all();
    }

    fn attributes(&self, handle: RawHandle) -> Result<DeviceIdentity, BackendError> {
        let state = self.lock();
        let device = self.device_for(&state, handle)?;
        if device.attributes_fail {
            return Err(BackendError::Usb(rusb::Error::Io));
        }
        Ok(device.identity)
    }

    fn capabilities(&self, handle: RawHandle) -> Result<ReportCapabilities, BackendError> {
        let state = self.lock();
        Ok(self.device_for(&state, handle)?.capabilities)
    }

    fn begin_read(&self, handle: RawHandle, _len: usize) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::require_access(&state, handle, AccessMode::Read)?;
        if state.fail_begin_read {
            return Err(BackendError::Usb(rusb::Error::Io));
        }
        state.pending.insert(handle);
        Ok(())
    }

    fn wait_read(&self, handle: RawHandle, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        if let Some(scripted) = state.wait_script.pop_front() {
            return match scripted {
                ScriptedWait::TimedOut => WaitOutcome::TimedOut,
                ScriptedWait::Failed => WaitOutcome::Failed(BackendError::Usb(rusb::Error::Io)),
            };
        }

        loop {
            if !state.open.contains_key(&handle) {
                return WaitOutcome::Failed(BackendError::InvalidHandle(handle));
            }
            if !state.pending.contains(&handle) {
                return WaitOutcome::Failed(BackendError::NoPendingRead(handle));
            }
            if let Some(report) = state.reports.pop_front() {
                state.pending.remove(&handle);
                return WaitOutcome::Completed(report);
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn cancel_read(&self, handle: RawHandle) {
        let mut state = self.lock();
        state.pending.remove(&handle);
        state.cancels += 1;
    }

    fn transfer(
        &self,
        handle: RawHandle,
        transfer: ReportTransfer,
    ) -> Result<Vec<u8>, BackendError> {
        let mut state = self.lock();
        let needed = match transfer.role() {
            protocol::HandleRole::Info => AccessMode::Query,
            protocol::HandleRole::Read => AccessMode::Read,
            protocol::HandleRole::Write => AccessMode::Write,
        };
        Self::require_access(&state, handle, needed)?;
        state.transfers.push(transfer.name());

        if state.fail_transfers {
            return Err(BackendError::Usb(rusb::Error::Pipe));
        }

        match transfer {
            ReportTransfer::FeatureIn { len } => {
                let mut report = state.feature_report.clone();
                report.resize(len, 0);
                Ok(report)
            }
            ReportTransfer::FeatureOut { data } => {
                state.feature_writes.push(data);
                Ok(Vec::new())
            }
            ReportTransfer::InputViaControl { len } | ReportTransfer::InputViaInterrupt { len } => {
                let mut report = state
                    .reports
                    .pop_front()
                    .ok_or(BackendError::Usb(rusb::Error::Timeout))?;
                report.resize(len, 0);
                Ok(report)
            }
            ReportTransfer::OutputViaControl { data } => {
                state.output_writes.push((HandleKind::Control, data));
                Ok(Vec::new())
            }
            ReportTransfer::OutputViaInterrupt { data } => {
                state.output_writes.push((HandleKind::Interrupt, data));
                Ok(Vec::new())
            }
        }
    }

    fn flush_input(&self, handle: RawHandle) -> Result<(), BackendError> {
        let mut state = self.lock();
        if !state.open.contains_key(&handle) {
            return Err(BackendError::InvalidHandle(handle));
        }
        state.flushes += 1;
        if state.fail_flush {
            return Err(BackendError::Usb(rusb::Error::Io));
        }
        Ok(())
    }

    fn watch(
        &self,
        _class: InterfaceClass,
        _identity: DeviceIdentity,
        events: Sender<DeviceChange>,
    ) -> Result<SubscriptionId, BackendError> {
        let mut state = self.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.watchers.insert(id, events);
        Ok(id)
    }

    fn unwatch(&self, subscription: SubscriptionId) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.fail_unwatch {
            return Err(BackendError::Unsupported("unwatch refused".to_string()));
        }
        state.watchers.remove(&subscription);
        Ok(())
    }

    fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

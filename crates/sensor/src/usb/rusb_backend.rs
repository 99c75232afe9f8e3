//! libusb backend
//!
//! Implements [`HidBackend`] on top of rusb. Device paths are `usb:BBB:AAA`
//! (bus and address). Query handles only read descriptors until a control
//! transfer is issued on them; read and write handles claim the HID
//! interface, detaching the kernel driver if needed. All handles on one
//! path share a single claim, released (and the kernel driver reattached)
//! when the last of them closes.
//!
//! Buffers follow the OS HID convention: byte 0 carries the report ID. The
//! supported devices do not number their reports, so reads leave byte 0 at
//! zero and writes with report ID 0 strip it before sending.

use async_channel::Sender;
use common::{
    AccessMode, BackendError, ChangeKind, DeviceChange, HidBackend, RawHandle, SessionRegistry,
    SubscriptionId, WaitOutcome,
};
use protocol::{
    DeviceIdentity, DevicePath, HID_GET_REPORT, HID_SET_REPORT, HandleRole, InterfaceClass,
    ReportCapabilities, ReportTransfer, ReportType,
};
use rusb::{
    Context, Device, DeviceHandle, Direction, Hotplug, HotplugBuilder, Recipient, RequestType,
    TransferType, UsbContext,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Default timeout for synchronous transfers (5 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single libusb wait inside `wait_read`
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Feature report length used when the descriptor does not say
const DEFAULT_FEATURE_REPORT_LEN: usize = 64;

/// Upper bound on reports discarded by one flush
const MAX_FLUSH_REPORTS: usize = 64;

/// Interval of the hot-plug event loop
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    address: u8,
    max_packet: u16,
}

/// HID interface of a device and its interrupt endpoints
#[derive(Debug, Clone, Copy)]
struct InterfaceLayout {
    number: u8,
    endpoint_in: Option<Endpoint>,
    endpoint_out: Option<Endpoint>,
}

impl InterfaceLayout {
    /// Locate the first interface of `class` in the active configuration
    fn find(device: &Device<Context>, class: InterfaceClass) -> Result<Self, BackendError> {
        let config = device
            .active_config_descriptor()
            .or_else(|_| device.config_descriptor(0))?;

        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if descriptor.class_code() != class.0 {
                    continue;
                }

                let mut layout = Self {
                    number: descriptor.interface_number(),
                    endpoint_in: None,
                    endpoint_out: None,
                };
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Interrupt {
                        continue;
                    }
                    let found = Endpoint {
                        address: endpoint.address(),
                        max_packet: endpoint.max_packet_size(),
                    };
                    match endpoint.direction() {
                        Direction::In => layout.endpoint_in.get_or_insert(found),
                        Direction::Out => layout.endpoint_out.get_or_insert(found),
                    };
                }
                return Ok(layout);
            }
        }

        Err(BackendError::Unsupported(format!(
            "no interface of class {:#04x}",
            class.0
        )))
    }

    fn capabilities(&self) -> ReportCapabilities {
        // +1 for the report ID byte
        ReportCapabilities {
            input_report_len: self.endpoint_in.map_or(0, |ep| ep.max_packet as usize + 1),
            output_report_len: self.endpoint_out.map_or(0, |ep| ep.max_packet as usize + 1),
            feature_report_len: DEFAULT_FEATURE_REPORT_LEN,
        }
    }
}

/// Opened device with its HID interface claimed
struct ClaimedInterface {
    handle: DeviceHandle<Context>,
    layout: InterfaceLayout,
    path: DevicePath,
    kernel_driver_detached: bool,
}

impl ClaimedInterface {
    fn claim(
        device: &Device<Context>,
        path: &DevicePath,
        class: InterfaceClass,
    ) -> Result<Self, BackendError> {
        let layout = InterfaceLayout::find(device, class)?;
        let mut handle = device.open()?;
        let number = layout.number;

        let mut kernel_driver_detached = false;
        match handle.kernel_driver_active(number) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {} on {}", number, path);
                handle.detach_kernel_driver(number)?;
                kernel_driver_detached = true;
            }
            Ok(false) => {}
            Err(e) => {
                debug!("Could not check kernel driver status on {}: {}", path, e);
            }
        }

        if let Err(e) = handle.claim_interface(number) {
            warn!("Failed to claim interface {} on {}: {}", number, path, e);
            if kernel_driver_detached {
                let _ = handle.attach_kernel_driver(number);
            }
            return Err(e.into());
        }

        debug!("Claimed interface {} on {}", number, path);
        Ok(Self {
            handle,
            layout,
            path: path.clone(),
            kernel_driver_detached,
        })
    }

    fn endpoint_in(&self) -> Result<Endpoint, BackendError> {
        self.layout
            .endpoint_in
            .ok_or_else(|| BackendError::Unsupported("no interrupt IN endpoint".to_string()))
    }

    fn endpoint_out(&self) -> Result<Endpoint, BackendError> {
        self.layout
            .endpoint_out
            .ok_or_else(|| BackendError::Unsupported("no interrupt OUT endpoint".to_string()))
    }

    /// GET_REPORT on the control endpoint
    fn get_report(&self, report_type: ReportType, len: usize) -> Result<Vec<u8>, BackendError> {
        let mut buffer = vec![0u8; len.max(1)];
        let request_type = rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        let value = u16::from(report_type as u8) << 8;

        let n = self.handle.read_control(
            request_type,
            HID_GET_REPORT,
            value,
            u16::from(self.layout.number),
            &mut buffer[1..],
            DEFAULT_TIMEOUT,
        )?;
        buffer.truncate(n + 1);
        Ok(buffer)
    }

    /// SET_REPORT on the control endpoint
    fn set_report(&self, report_type: ReportType, data: &[u8]) -> Result<(), BackendError> {
        let (id, payload) = split_report_id(data)?;
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        let value = (u16::from(report_type as u8) << 8) | u16::from(id);

        self.handle.write_control(
            request_type,
            HID_SET_REPORT,
            value,
            u16::from(self.layout.number),
            payload,
            DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }

    fn read_interrupt(&self, len: usize, timeout: Duration) -> Result<Vec<u8>, rusb::Error> {
        let endpoint = self.endpoint_in().map_err(|_| rusb::Error::NotSupported)?;
        let mut buffer = vec![0u8; len.max(1)];
        let n = self
            .handle
            .read_interrupt(endpoint.address, &mut buffer[1..], timeout)?;
        buffer.truncate(n + 1);
        Ok(buffer)
    }

    fn write_interrupt(&self, data: &[u8]) -> Result<(), BackendError> {
        let endpoint = self.endpoint_out()?;
        let (_, payload) = split_report_id(data)?;
        self.handle
            .write_interrupt(endpoint.address, payload, DEFAULT_TIMEOUT)?;
        Ok(())
    }
}

impl Drop for ClaimedInterface {
    fn drop(&mut self) {
        let number = self.layout.number;
        if let Err(e) = self.handle.release_interface(number) {
            warn!("Failed to release interface {} on {}: {}", number, self.path, e);
        }

        if self.kernel_driver_detached {
            match self.handle.attach_kernel_driver(number) {
                Ok(()) => debug!("Reattached kernel driver on {}", self.path),
                Err(e) => debug!("Could not reattach kernel driver on {}: {}", self.path, e),
            }
        }
    }
}

/// Split a report buffer into its ID and the bytes to put on the wire
fn split_report_id(data: &[u8]) -> Result<(u8, &[u8]), BackendError> {
    match data.split_first() {
        Some((&0, rest)) => Ok((0, rest)),
        Some((&id, _)) => Ok((id, data)),
        None => Err(BackendError::Usb(rusb::Error::InvalidParam)),
    }
}

struct OpenDevice {
    path: DevicePath,
    access: AccessMode,
    device: Device<Context>,
    /// Claimed at open for read/write handles, on first transfer for query handles
    claim: Option<Arc<ClaimedInterface>>,
    pending_read: Option<usize>,
    open: Arc<AtomicBool>,
}

struct Watch {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct BackendState {
    next_handle: u32,
    handles: HashMap<RawHandle, OpenDevice>,
    claims: HashMap<DevicePath, Weak<ClaimedInterface>>,
    next_subscription: u32,
    watches: HashMap<SubscriptionId, Watch>,
}

/// libusb-backed [`HidBackend`]
pub struct RusbBackend {
    context: Context,
    class: InterfaceClass,
    state: Mutex<BackendState>,
    sessions: SessionRegistry,
}

impl RusbBackend {
    /// Create a backend claiming interfaces of `class`
    pub fn new(class: InterfaceClass) -> Result<Self, BackendError> {
        Ok(Self {
            context: Context::new()?,
            class,
            state: Mutex::new(BackendState::default()),
            sessions: SessionRegistry::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_device(&self, path: &DevicePath) -> Result<Device<Context>, BackendError> {
        self.context
            .devices()?
            .iter()
            .find(|device| DevicePath::for_usb(device.bus_number(), device.address()) == *path)
            .ok_or_else(|| BackendError::NotFound(path.clone()))
    }

    /// Shared claim for `path`, claiming the interface if nobody holds it
    fn claim(
        &self,
        state: &mut BackendState,
        device: &Device<Context>,
        path: &DevicePath,
    ) -> Result<Arc<ClaimedInterface>, BackendError> {
        if let Some(claim) = state.claims.get(path).and_then(Weak::upgrade) {
            return Ok(claim);
        }

        let claim = Arc::new(ClaimedInterface::claim(device, path, self.class)?);
        state.claims.insert(path.clone(), Arc::downgrade(&claim));
        Ok(claim)
    }

    /// Claim usable for a transfer on `handle`, after checking its access
    fn claim_for(
        &self,
        handle: RawHandle,
        needed: AccessMode,
    ) -> Result<Arc<ClaimedInterface>, BackendError> {
        let mut state = self.lock();
        let open = state
            .handles
            .get(&handle)
            .ok_or(BackendError::InvalidHandle(handle))?;
        if open.access != needed {
            return Err(BackendError::WrongAccess { handle, needed });
        }
        if let Some(claim) = &open.claim {
            return Ok(claim.clone());
        }

        let device = open.device.clone();
        let path = open.path.clone();
        let claim = self.claim(&mut state, &device, &path)?;
        if let Some(open) = state.handles.get_mut(&handle) {
            open.claim = Some(claim.clone());
        }
        Ok(claim)
    }
}

impl HidBackend for RusbBackend {
    fn enumerate(&self, class: InterfaceClass) -> Result<Vec<DevicePath>, BackendError> {
        let mut paths = Vec::new();

        for device in self.context.devices()?.iter() {
            let config = match device
                .active_config_descriptor()
                .or_else(|_| device.config_descriptor(0))
            {
                Ok(config) => config,
                Err(e) => {
                    trace!(
                        "Skipping bus={} addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            let has_class = config.interfaces().any(|interface| {
                interface
                    .descriptors()
                    .any(|descriptor| descriptor.class_code() == class.0)
            });
            if has_class {
                paths.push(DevicePath::for_usb(device.bus_number(), device.address()));
            }
        }

        Ok(paths)
    }

    fn open(&self, path: &DevicePath, access: AccessMode) -> Result<RawHandle, BackendError> {
        let device = self.find_device(path)?;
        let mut state = self.lock();

        let claim = match access {
            AccessMode::Query => None,
            AccessMode::Read | AccessMode::Write => Some(self.claim(&mut state, &device, path)?),
        };

        state.next_handle += 1;
        let handle = RawHandle(state.next_handle);
        state.handles.insert(
            handle,
            OpenDevice {
                path: path.clone(),
                access,
                device,
                claim,
                pending_read: None,
                open: Arc::new(AtomicBool::new(true)),
            },
        );

        debug!("Opened {} for {:?} as {}", path, access, handle);
        Ok(handle)
    }

    fn close(&self, handle: RawHandle) {
        let removed = self.lock().handles.remove(&handle);

        // Dropping the last claim outside the lock releases the interface
        if let Some(open) = removed {
            open.open.store(false, Ordering::Release);
            debug!("Closed {} on {}", handle, open.path);
        }
    }

    fn attributes(&self, handle: RawHandle) -> Result<DeviceIdentity, BackendError> {
        let device = self
            .lock()
            .handles
            .get(&handle)
            .map(|open| open.device.clone())
            .ok_or(BackendError::InvalidHandle(handle))?;

        let descriptor = device.device_descriptor()?;
        Ok(DeviceIdentity::new(
            descriptor.vendor_id(),
            descriptor.product_id(),
        ))
    }

    fn capabilities(&self, handle: RawHandle) -> Result<ReportCapabilities, BackendError> {
        let device = self
            .lock()
            .handles
            .get(&handle)
            .map(|open| open.device.clone())
            .ok_or(BackendError::InvalidHandle(handle))?;

        Ok(InterfaceLayout::find(&device, self.class)?.capabilities())
    }

    fn begin_read(&self, handle: RawHandle, len: usize) -> Result<(), BackendError> {
        let mut state = self.lock();
        let open = state
            .handles
            .get_mut(&handle)
            .ok_or(BackendError::InvalidHandle(handle))?;
        if open.access != AccessMode::Read {
            return Err(BackendError::WrongAccess {
                handle,
                needed: AccessMode::Read,
            });
        }

        open.pending_read = Some(len);
        Ok(())
    }

    fn wait_read(&self, handle: RawHandle, timeout: Duration) -> WaitOutcome {
        let (claim, len, still_open) = {
            let state = self.lock();
            let Some(open) = state.handles.get(&handle) else {
                return WaitOutcome::Failed(BackendError::InvalidHandle(handle));
            };
            let Some(len) = open.pending_read else {
                return WaitOutcome::Failed(BackendError::NoPendingRead(handle));
            };
            let Some(claim) = open.claim.clone() else {
                return WaitOutcome::Failed(BackendError::InvalidHandle(handle));
            };
            (claim, len, open.open.clone())
        };

        // Wait in slices so that closing the handle ends the wait promptly
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitOutcome::TimedOut;
            }
            let slice = remaining.min(WAIT_SLICE).max(Duration::from_millis(1));

            match claim.read_interrupt(len, slice) {
                Ok(buffer) => {
                    if let Some(open) = self.lock().handles.get_mut(&handle) {
                        open.pending_read = None;
                    }
                    return WaitOutcome::Completed(buffer);
                }
                Err(rusb::Error::Timeout) => {
                    if !still_open.load(Ordering::Acquire) {
                        return WaitOutcome::Failed(BackendError::InvalidHandle(handle));
                    }
                }
                Err(e) => return WaitOutcome::Failed(e.into()),
            }
        }
    }

    fn cancel_read(&self, handle: RawHandle) {
        // Synchronous libusb transfers are already cancelled when they time out
        if let Some(open) = self.lock().handles.get_mut(&handle) {
            open.pending_read = None;
        }
        debug!("Cancelled pending read on {}", handle);
    }

    fn transfer(
        &self,
        handle: RawHandle,
        transfer: ReportTransfer,
    ) -> Result<Vec<u8>, BackendError> {
        let needed = match transfer.role() {
            HandleRole::Info => AccessMode::Query,
            HandleRole::Read => AccessMode::Read,
            HandleRole::Write => AccessMode::Write,
        };
        let claim = self.claim_for(handle, needed)?;
        trace!("{} on {}", transfer.name(), handle);

        let report_type = transfer.report_type();
        match transfer {
            ReportTransfer::FeatureIn { len } | ReportTransfer::InputViaControl { len } => {
                claim.get_report(report_type, len)
            }
            ReportTransfer::FeatureOut { data } | ReportTransfer::OutputViaControl { data } => {
                claim.set_report(report_type, &data).map(|()| Vec::new())
            }
            ReportTransfer::InputViaInterrupt { len } => {
                Ok(claim.read_interrupt(len, DEFAULT_TIMEOUT)?)
            }
            ReportTransfer::OutputViaInterrupt { data } => {
                claim.write_interrupt(&data).map(|()| Vec::new())
            }
        }
    }

    fn flush_input(&self, handle: RawHandle) -> Result<(), BackendError> {
        let claim = self.claim_for(handle, AccessMode::Read)?;
        let len = claim.layout.capabilities().input_report_len;

        for discarded in 0..MAX_FLUSH_REPORTS {
            match claim.read_interrupt(len, Duration::from_millis(1)) {
                Ok(_) => continue,
                Err(rusb::Error::Timeout) => {
                    debug!("Flushed {} input report(s) on {}", discarded, handle);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn watch(
        &self,
        _class: InterfaceClass,
        identity: DeviceIdentity,
        events: Sender<DeviceChange>,
    ) -> Result<SubscriptionId, BackendError> {
        if !rusb::has_hotplug() {
            return Err(BackendError::Unsupported(
                "libusb has no hot-plug support on this platform".to_string(),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let context = self.context.clone();
        let flag = running.clone();

        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || {
                let callback: Box<dyn Hotplug<Context>> = Box::new(HotplugForwarder { events });
                let registration = match HotplugBuilder::new()
                    .vendor_id(identity.vendor_id)
                    .product_id(identity.product_id)
                    .enumerate(false)
                    .register(context.clone(), callback)
                {
                    Ok(registration) => {
                        let _ = ready_tx.send(Ok(()));
                        registration
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while flag.load(Ordering::Acquire) {
                    match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("USB event handling interrupted");
                        }
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(EVENT_POLL_INTERVAL);
                        }
                    }
                }

                drop(registration);
                debug!("Hot-plug event loop stopped");
            })
            .map_err(|e| BackendError::Unsupported(format!("cannot start event thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e.into());
            }
            Err(_) => {
                let _ = thread.join();
                return Err(BackendError::Unsupported(
                    "hot-plug event thread exited".to_string(),
                ));
            }
        }

        let mut state = self.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.watches.insert(
            id,
            Watch {
                running,
                thread: Some(thread),
            },
        );

        debug!("Hot-plug watch {:?} registered for {}", id, identity);
        Ok(id)
    }

    fn unwatch(&self, subscription: SubscriptionId) -> Result<(), BackendError> {
        let mut watch = self.lock().watches.remove(&subscription).ok_or_else(|| {
            BackendError::Unsupported(format!("unknown subscription {:?}", subscription))
        })?;

        watch.running.store(false, Ordering::Release);
        if let Some(thread) = watch.thread.take()
            && thread.join().is_err()
        {
            error!("Hot-plug event thread panicked");
        }
        Ok(())
    }

    fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

impl Drop for RusbBackend {
    fn drop(&mut self) {
        let watches: Vec<_> = self.lock().watches.keys().copied().collect();
        for id in watches {
            let _ = self.unwatch(id);
        }
    }
}

/// Forwards libusb hot-plug callbacks as device-change notifications
struct HotplugForwarder {
    events: Sender<DeviceChange>,
}

impl HotplugForwarder {
    fn forward<T: UsbContext>(&self, kind: ChangeKind, device: &Device<T>) {
        let path = DevicePath::for_usb(device.bus_number(), device.address());
        debug!("Hot-plug callback: {:?} {}", kind, path);

        // Never block the libusb event thread on a slow owner
        if let Err(e) = self
            .events
            .try_send(DeviceChange::interface(kind, path.as_str()))
        {
            warn!("Dropping hot-plug notification for {}: {}", path, e);
        }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        self.forward(ChangeKind::Arrival, &device);
    }

    fn device_left(&mut self, device: Device<T>) {
        self.forward(ChangeKind::Removal, &device);
    }
}

//! Sensor host
//!
//! [`SensorHost`] is the consumer-facing surface: it discovers the device,
//! owns the session while one is active, and exposes the running average
//! and the detector classification. It is driven from a single owner; the
//! only state it shares with the poll worker is the [`SignalState`].
//!
//! The hot-plug watch outlives individual sessions. It is registered on the
//! first [`initialize`](SensorHost::initialize), whether or not a device is
//! found, and kept until [`dispose`](SensorHost::dispose), so a sensor that
//! is plugged in later is still picked up.

use crate::config::SensorConfig;
use crate::detector::ArtifactDetector;
use crate::signal::SignalState;
use crate::usb::{
    DeviceCatalog, DeviceError, HotplugRegistration, HotplugWatcher, PollLoop, ReportChannel,
};
use common::{ChangeKind, DeviceChange, EventSource, HidBackend, NotificationType, SessionEvent};
use protocol::{DevicePath, Sample};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound of the clamped EEG value
pub const EEG_MAX: f64 = 999.0;

/// One bound device and its poll worker
struct DeviceSession {
    channel: Arc<ReportChannel>,
    poll: PollLoop,
}

impl DeviceSession {
    fn path(&self) -> &DevicePath {
        self.channel.path()
    }
}

/// Device session owner and signal consumer surface
pub struct SensorHost {
    backend: Arc<dyn HidBackend>,
    catalog: DeviceCatalog,
    watcher: HotplugWatcher,
    hotplug: Option<HotplugRegistration>,
    config: SensorConfig,
    signal: SignalState,
    detector: ArtifactDetector,
    events: EventSource,
    session: Option<DeviceSession>,
}

impl SensorHost {
    /// Create a host; nothing is opened until [`initialize`](Self::initialize)
    pub fn new(backend: Arc<dyn HidBackend>, config: SensorConfig, events: EventSource) -> Self {
        let detector =
            ArtifactDetector::new(config.detector.algorithm, config.detector.blink_interval);

        Self {
            catalog: DeviceCatalog::new(backend.clone()),
            watcher: HotplugWatcher::new(backend.clone(), config.device.interface_class),
            hotplug: None,
            backend,
            config,
            signal: SignalState::new(),
            detector,
            events,
            session: None,
        }
    }

    /// Discover the device and start polling it
    ///
    /// Returns whether a session is active afterwards. Failures are logged.
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(path) => {
                debug!("Session active on {}", path);
                true
            }
            Err(e) => {
                warn!("Sensor initialization failed: {}", e);
                false
            }
        }
    }

    /// Discover the device and start polling it, reporting why it failed
    pub fn try_initialize(&mut self) -> Result<DevicePath, DeviceError> {
        self.ensure_watching();

        if let Some(session) = &self.session {
            return Ok(session.path().clone());
        }

        let identity = self.config.device.signature;
        let paths = self.catalog.find(self.config.device.interface_class)?;
        let path = self
            .catalog
            .match_by_signature(&paths, identity)
            .ok_or(DeviceError::NotFound(identity))?;

        let lease = self.catalog.lease(&path)?;
        let channel = Arc::new(ReportChannel::open_for_session(
            self.backend.clone(),
            lease,
            self.config.device.transfer_modes(),
        )?);

        channel.flush_input_queue();

        let poll = match PollLoop::spawn(
            channel.clone(),
            self.signal.clone(),
            self.events.clone(),
            self.config.device.read_timeout(),
        ) {
            Ok(poll) => poll,
            Err(e) => {
                channel.close();
                return Err(e);
            }
        };

        info!(
            "Sensor {} bound at {} ({} mode)",
            identity,
            path,
            self.detector.mode()
        );

        self.session = Some(DeviceSession { channel, poll });
        Ok(path)
    }

    fn ensure_watching(&mut self) {
        if self.hotplug.is_some() {
            return;
        }

        match self
            .watcher
            .register(self.config.device.signature, self.events.change_sender())
        {
            Ok(registration) => self.hotplug = Some(registration),
            Err(e) => warn!("Continuing without hot-plug notifications: {}", e),
        }
    }

    /// Whether a session is bound
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Whether hot-plug notifications are registered
    pub fn is_watching(&self) -> bool {
        self.hotplug.is_some()
    }

    /// Path of the bound device
    pub fn bound_path(&self) -> Option<&DevicePath> {
        self.session.as_ref().map(DeviceSession::path)
    }

    /// Report channel of the active session
    pub fn channel(&self) -> Option<&ReportChannel> {
        self.session.as_ref().map(|session| session.channel.as_ref())
    }

    /// Average of every sample since the last call, then clear
    pub fn current_average(&self) -> f64 {
        self.signal.take_average()
    }

    /// [`current_average`](Self::current_average) clamped to 0..=999
    pub fn eeg_value(&self) -> f64 {
        self.current_average().clamp(0.0, EEG_MAX)
    }

    /// Detector classification over the current history
    pub fn classify(&mut self) -> f64 {
        let detector = &mut self.detector;
        self.signal.with_history(|history| detector.classify(history))
    }

    /// Every sample decoded since the last call
    pub fn drain_raw(&self) -> Vec<Sample> {
        self.signal.drain_raw()
    }

    /// Shared signal state
    pub fn signal(&self) -> &SignalState {
        &self.signal
    }

    /// React to a hot-plug notification
    ///
    /// Removal of the bound device tears the session down; an interface
    /// arrival while unbound runs discovery again. Returns whether a session
    /// is active afterwards.
    pub fn on_device_change(&mut self, change: &DeviceChange) -> bool {
        match change.kind {
            ChangeKind::Removal => {
                if let Some(path) = self.bound_path()
                    && HotplugWatcher::matches(change, path)
                {
                    info!("Sensor at {} removed", change.device_name);
                    self.teardown();
                }
            }
            ChangeKind::Arrival => {
                if self.session.is_none()
                    && change.notification_type == NotificationType::Interface
                {
                    debug!("Device arrived at {}, rediscovering", change.device_name);
                    self.initialize();
                }
            }
        }
        self.is_active()
    }

    /// React to a session event from the poll worker
    pub fn on_session_event(&mut self, event: &SessionEvent) {
        let SessionEvent::Lost { path, reason } = event;
        if self.bound_path() == Some(path) {
            warn!("Session on {} lost: {}", path, reason);
            self.teardown();
        }
    }

    /// Stop polling, release the device and stop hot-plug notifications
    pub fn dispose(&mut self) {
        if self.session.is_some() {
            info!("Disposing sensor session");
            self.teardown();
        }
        if let Some(registration) = self.hotplug.take() {
            self.watcher.unregister(registration);
        }
    }

    fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.poll.stop();
        session.channel.close();
        debug!("Session on {} torn down", session.path());
    }
}

impl Drop for SensorHost {
    fn drop(&mut self) {
        self.dispose();
    }
}

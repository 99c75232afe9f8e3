//! Hot-plug notifications for the configured device identity
//!
//! The registration covers the interface class and identity rather than one
//! bound path, so arrivals still reach the owner while no session exists.

use crate::usb::error::DeviceError;
use async_channel::Sender;
use common::{DeviceChange, HidBackend, NotificationType, SubscriptionId};
use protocol::{DeviceIdentity, DevicePath, InterfaceClass};
use std::sync::Arc;
use tracing::{debug, warn};

/// Active hot-plug registration for one device identity
#[derive(Debug)]
pub struct HotplugRegistration {
    subscription: SubscriptionId,
    identity: DeviceIdentity,
}

/// Subscribes to arrival/removal notifications of one interface class
pub struct HotplugWatcher {
    backend: Arc<dyn HidBackend>,
    class: InterfaceClass,
}

impl HotplugWatcher {
    pub fn new(backend: Arc<dyn HidBackend>, class: InterfaceClass) -> Self {
        Self { backend, class }
    }

    /// Request arrival/removal notifications for devices matching `identity`
    pub fn register(
        &self,
        identity: DeviceIdentity,
        events: Sender<DeviceChange>,
    ) -> Result<HotplugRegistration, DeviceError> {
        let subscription = self
            .backend
            .watch(self.class, identity, events)
            .map_err(DeviceError::Hotplug)?;

        debug!("Watching for {} hot-plug events", identity);
        Ok(HotplugRegistration {
            subscription,
            identity,
        })
    }

    /// Whether `change` refers to the device bound at `path`
    ///
    /// Only interface-level notifications are considered; names are
    /// compared ignoring ASCII case.
    pub fn matches(change: &DeviceChange, path: &DevicePath) -> bool {
        change.notification_type == NotificationType::Interface
            && path.matches_name(&change.device_name)
    }

    /// Stop notifications; failures are logged and swallowed
    pub fn unregister(&self, registration: HotplugRegistration) {
        match self.backend.unwatch(registration.subscription) {
            Ok(()) => debug!("Stopped watching for {}", registration.identity),
            Err(e) => warn!(
                "Failed to stop hot-plug notifications for {}: {}",
                registration.identity, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBackend, NIA_PATH};
    use common::{ChangeKind, create_event_bridge};
    use protocol::NIA_IDENTITY;

    #[test]
    fn test_matches_interface_notifications_only() {
        let path = DevicePath::new(NIA_PATH);

        let removal = DeviceChange::interface(ChangeKind::Removal, NIA_PATH.to_uppercase());
        assert!(HotplugWatcher::matches(&removal, &path));

        let handle_level = DeviceChange {
            notification_type: NotificationType::Handle,
            ..removal.clone()
        };
        assert!(!HotplugWatcher::matches(&handle_level, &path));

        let other = DeviceChange::interface(ChangeKind::Removal, "usb:002:007");
        assert!(!HotplugWatcher::matches(&other, &path));
    }

    #[test]
    fn test_register_and_unregister() {
        let backend = Arc::new(MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY));
        let watcher = HotplugWatcher::new(backend.clone(), InterfaceClass::HID);
        let (bridge, source) = create_event_bridge();

        let registration = watcher
            .register(NIA_IDENTITY, source.change_sender())
            .unwrap();
        assert_eq!(backend.watcher_count(), 1);

        backend.emit(DeviceChange::interface(ChangeKind::Arrival, NIA_PATH));
        assert_eq!(bridge.try_recv_change().unwrap().kind, ChangeKind::Arrival);

        watcher.unregister(registration);
        assert_eq!(backend.watcher_count(), 0);
    }

    #[test]
    fn test_unregister_failure_is_swallowed() {
        let backend = Arc::new(MockBackend::new());
        let watcher = HotplugWatcher::new(backend.clone(), InterfaceClass::HID);
        let (_bridge, source) = create_event_bridge();

        let registration = watcher
            .register(NIA_IDENTITY, source.change_sender())
            .unwrap();
        backend.set_fail_unwatch(true);

        watcher.unregister(registration);
        assert_eq!(backend.watcher_count(), 1);
    }
}

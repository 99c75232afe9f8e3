//! Event Bridge Integration Tests
//!
//! Tests for the async channel bridge between the blocking device side and
//! the Tokio owner, and for hot-plug delivery through the mock backend.
//!
//! Run with: `cargo test -p common --test event_bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockBackend, NIA_PATH, with_timeout};
use common::{ChangeKind, DeviceChange, HidBackend, SessionEvent, create_event_bridge};
use protocol::{DevicePath, InterfaceClass, NIA_IDENTITY};
use std::thread;

// ============================================================================
// Session Events
// ============================================================================

#[tokio::test]
async fn test_session_events_arrive_in_order() {
    let (bridge, source) = create_event_bridge();

    let handle = thread::spawn(move || {
        for i in 0..5 {
            source
                .send_session(SessionEvent::Lost {
                    path: DevicePath::new(format!("usb:001:{:03}", i)),
                    reason: "read timed out".to_string(),
                })
                .unwrap();
        }
    });

    for i in 0..5 {
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_session())
            .await
            .expect("timed out waiting for session event")
            .unwrap();
        let SessionEvent::Lost { path, .. } = event;
        assert_eq!(path.as_str(), format!("usb:001:{:03}", i));
    }

    handle.join().unwrap();
}

#[tokio::test]
async fn test_recv_fails_once_sources_dropped() {
    let (bridge, source) = create_event_bridge();
    let clone = source.clone();
    drop(source);
    drop(clone);

    let result = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_change()).await;
    assert!(matches!(result, Ok(Err(common::Error::Channel(_)))));
}

// ============================================================================
// Hot-plug Delivery
// ============================================================================

#[tokio::test]
async fn test_mock_hotplug_reaches_owner() {
    let backend = MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY);
    let (bridge, source) = create_event_bridge();

    let subscription = backend
        .watch(InterfaceClass::HID, NIA_IDENTITY, source.change_sender())
        .unwrap();
    assert_eq!(backend.watcher_count(), 1);

    let emitter = thread::spawn(move || {
        backend.emit(DeviceChange::interface(ChangeKind::Removal, NIA_PATH));
        backend
    });

    let change = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_change())
        .await
        .expect("timed out waiting for device change")
        .unwrap();
    assert_eq!(change.kind, ChangeKind::Removal);
    assert!(DevicePath::new(NIA_PATH).matches_name(&change.device_name));

    let backend = emitter.join().unwrap();
    backend.unwatch(subscription).unwrap();
    assert_eq!(backend.watcher_count(), 0);
}

#[test]
fn test_unwatched_backend_emits_nothing() {
    let backend = MockBackend::new();
    let (bridge, _source) = create_event_bridge();

    backend.emit(DeviceChange::interface(ChangeKind::Arrival, NIA_PATH));
    assert!(bridge.try_recv_change().is_none());
}

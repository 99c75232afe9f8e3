//! Background report polling
//!
//! The poll loop runs on a dedicated OS thread so that the bounded wait on
//! each input report never blocks the owner. Each iteration reads one report,
//! decodes it and records the samples. When the channel reports the session
//! lost, the loop notifies the owner through the event bridge and exits;
//! rediscovery is left to the owner.

use crate::signal::SignalState;
use crate::usb::channel::ReportChannel;
use crate::usb::error::DeviceError;
use common::{EventSource, SessionEvent};
use protocol::decode_report;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Running poll worker for one session
pub struct PollLoop {
    cancel: Arc<AtomicBool>,
    channel: Arc<ReportChannel>,
    thread: Option<JoinHandle<()>>,
}

impl PollLoop {
    /// Spawn the poll worker
    pub fn spawn(
        channel: Arc<ReportChannel>,
        signal: SignalState,
        events: EventSource,
        read_timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = PollWorker {
            channel: channel.clone(),
            signal,
            events,
            read_timeout,
            cancel: cancel.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("nia-poll".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            cancel,
            channel,
            thread: Some(thread),
        })
    }

    /// Whether the worker thread is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Cancel the worker and wait for it to exit
    ///
    /// Closing the channel wakes a read that is still waiting, so this
    /// returns without waiting out the read timeout.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.channel.close();

        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Poll worker for {} panicked", self.channel.path());
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollWorker {
    channel: Arc<ReportChannel>,
    signal: SignalState,
    events: EventSource,
    read_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl PollWorker {
    fn run(self) {
        let path = self.channel.path().clone();
        info!("Polling {} (read timeout {:?})", path, self.read_timeout);

        while !self.cancelled() {
            match self.channel.read_input_report(self.read_timeout) {
                Ok(report) => match decode_report(&report) {
                    Ok(packet) => {
                        let first = packet.timer_positions().next();
                        match first.zip(packet.timer_positions().last()) {
                            Some((first, last)) => trace!(
                                "Packet from {}: {} samples at {}..={}",
                                path,
                                packet.valid_count,
                                first,
                                last
                            ),
                            None => trace!("Empty packet from {} at {}", path, packet.packet_timer),
                        }
                        self.signal.record_packet(&packet);
                    }
                    Err(e) => warn!("Dropping report from {}: {}", path, e),
                },
                Err(e) if !e.is_session_lost() => {
                    warn!("Dropping report from {}: {}", path, e);
                }
                Err(e) => {
                    if self.cancelled() {
                        break;
                    }

                    error!("Session on {} lost: {}", path, e);
                    // Make sure nothing stays open whatever the failure was
                    self.channel.close();
                    let event = SessionEvent::Lost {
                        path: path.clone(),
                        reason: e.to_string(),
                    };
                    if let Err(e) = self.events.send_session(event) {
                        debug!("Session owner gone: {}", e);
                    }
                    break;
                }
            }
        }

        info!("Stopped polling {}", path);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::channel::TransferModes;
    use common::{HidBackend, create_event_bridge};
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockBackend, NIA_PATH, ScriptedWait, wait_until};
    use protocol::{DevicePath, NIA_IDENTITY};

    fn start(backend: &Arc<MockBackend>) -> (PollLoop, SignalState, common::EventBridge) {
        let channel = Arc::new(
            ReportChannel::open_for_session(
                backend.clone(),
                backend.sessions().acquire(&DevicePath::new(NIA_PATH)).unwrap(),
                TransferModes::default(),
            )
            .unwrap(),
        );
        let signal = SignalState::new();
        let (bridge, source) = create_event_bridge();
        let poll =
            PollLoop::spawn(channel, signal.clone(), source, Duration::from_secs(3)).unwrap();
        (poll, signal, bridge)
    }

    #[test]
    fn test_reports_reach_signal_state() {
        let backend = Arc::new(MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY));
        let (mut poll, signal, _bridge) = start(&backend);

        backend.push_samples(&[100, 200]);
        backend.push_samples(&[]);
        backend.push_samples(&[600]);

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || backend.queued_reports() == 0));
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            signal.with_history(|h| h.len()) == 2
        }));
        assert_eq!(signal.take_average(), 300.0);

        poll.stop();
        assert!(!poll.is_running());
        assert_eq!(backend.open_handle_count(), 0);
    }

    #[test]
    fn test_stop_interrupts_pending_read() {
        let backend = Arc::new(MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY));
        let (mut poll, _signal, bridge) = start(&backend);

        let started = std::time::Instant::now();
        poll.stop();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(bridge.try_recv_session().is_none());
    }

    #[test]
    fn test_timeout_reports_session_lost() {
        let backend = Arc::new(MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY));
        backend.script_wait(ScriptedWait::TimedOut);
        let (poll, _signal, bridge) = start(&backend);

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !poll.is_running()));

        let SessionEvent::Lost { path, reason } = bridge.try_recv_session().unwrap();
        assert_eq!(path.as_str(), NIA_PATH);
        assert!(reason.contains("timed out"));
        assert_eq!(backend.open_handle_count(), 0);
    }

    #[test]
    fn test_malformed_report_is_skipped() {
        let backend = Arc::new(MockBackend::new().with_device(NIA_PATH, NIA_IDENTITY));
        let (mut poll, signal, _bridge) = start(&backend);

        let mut bad = common::test_utils::build_report(&[], 0);
        bad[55] = 40;
        backend.push_report(bad);
        backend.push_samples(&[5]);

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            signal.with_history(|h| h.len()) == 1
        }));
        assert!(poll.is_running());
        poll.stop();
    }
}

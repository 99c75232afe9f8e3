//! Decoded signal state shared between the poll worker and the owner
//!
//! Everything the poll worker produces lands here under a single mutex: the
//! running accumulator read by `current_average`, the bounded per-tick
//! history the detector scans, and the raw sample tap.

use protocol::{DecodedPacket, Sample};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Maximum number of per-tick values kept for the detector
pub const HISTORY_CAPACITY: usize = 512;

/// Maximum number of raw samples kept between drains
pub const RAW_TAP_CAPACITY: usize = 4096;

/// Running sum and count of decoded samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAccumulator {
    sum: f64,
    count: f64,
}

impl RunningAccumulator {
    pub fn fold(&mut self, sample: Sample) {
        self.sum += f64::from(sample);
        self.count += 1.0;
    }

    /// sum / count, or 0 when nothing was folded
    pub fn average(&self) -> f64 {
        if self.count == 0.0 {
            0.0
        } else {
            self.sum / self.count
        }
    }

    /// Return the average and clear
    pub fn take_average(&mut self) -> f64 {
        let average = self.average();
        *self = Self::default();
        average
    }

    pub fn count(&self) -> u64 {
        self.count as u64
    }
}

/// Bounded FIFO of per-tick values
#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    values: VecDeque<Sample>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self {
            values: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append a value, evicting the oldest once full
    pub fn push(&mut self, value: Sample) {
        if self.values.len() == HISTORY_CAPACITY {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Most recent value
    pub fn latest(&self) -> Option<Sample> {
        self.values.back().copied()
    }

    /// Values from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.values.iter().copied()
    }
}

impl FromIterator<Sample> for SampleHistory {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut history = Self::new();
        for value in iter {
            history.push(value);
        }
        history
    }
}

/// Read-and-clear buffer of every decoded sample
#[derive(Debug, Default)]
struct RawTap {
    samples: VecDeque<Sample>,
    dropped: u64,
}

impl RawTap {
    fn extend(&mut self, samples: &[Sample]) {
        for &sample in samples {
            if self.samples.len() == RAW_TAP_CAPACITY {
                self.samples.pop_front();
                self.dropped += 1;
            }
            self.samples.push_back(sample);
        }
    }

    fn drain(&mut self) -> Vec<Sample> {
        self.samples.drain(..).collect()
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    accumulator: RunningAccumulator,
    history: SampleHistory,
    raw: RawTap,
}

/// Shared signal state; clones refer to the same state
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    inner: Arc<Mutex<SignalInner>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold a decoded packet in
    ///
    /// Every sample goes into the accumulator and the raw tap; the packet
    /// mean becomes one history tick. Packets without samples are ignored.
    pub fn record_packet(&self, packet: &DecodedPacket) {
        let Some(mean) = packet.mean() else {
            return;
        };

        let mut inner = self.lock();
        for &sample in &packet.samples {
            inner.accumulator.fold(sample);
        }
        inner.raw.extend(&packet.samples);
        inner.history.push(mean);

        trace!(
            "Recorded {} samples (mean {}), history {}",
            packet.samples.len(),
            mean,
            inner.history.len()
        );
    }

    /// Average since the last call, then clear
    pub fn take_average(&self) -> f64 {
        self.lock().accumulator.take_average()
    }

    /// Average since the last clear, without clearing
    pub fn peek_average(&self) -> f64 {
        self.lock().accumulator.average()
    }

    /// Run `f` over the history while holding the lock
    pub fn with_history<R>(&self, f: impl FnOnce(&SampleHistory) -> R) -> R {
        f(&self.lock().history)
    }

    /// Every sample decoded since the last drain, oldest first
    pub fn drain_raw(&self) -> Vec<Sample> {
        self.lock().raw.drain()
    }

    /// Samples evicted from the raw tap before being drained
    pub fn raw_dropped(&self) -> u64 {
        self.lock().raw.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(samples: &[Sample]) -> DecodedPacket {
        DecodedPacket {
            valid_count: samples.len(),
            packet_timer: 0,
            samples: samples.to_vec(),
        }
    }

    #[test]
    fn test_accumulator_average_then_clear() {
        let mut acc = RunningAccumulator::default();
        acc.fold(3);
        acc.fold(6);
        acc.fold(-3);

        assert_eq!(acc.take_average(), 2.0);
        assert_eq!(acc.take_average(), 0.0);
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn test_accumulator_fractional_average() {
        let mut acc = RunningAccumulator::default();
        acc.fold(1);
        acc.fold(2);
        assert_eq!(acc.average(), 1.5);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = SampleHistory::new();
        for i in 0..HISTORY_CAPACITY as Sample {
            history.push(i);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);

        history.push(9999);
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.iter().next(), Some(1));
        assert_eq!(history.latest(), Some(9999));
    }

    #[test]
    fn test_record_packet() {
        let state = SignalState::new();
        state.record_packet(&packet(&[10, 20, 30]));
        state.record_packet(&packet(&[]));

        assert_eq!(state.with_history(|h| h.iter().collect::<Vec<_>>()), vec![20]);
        assert_eq!(state.drain_raw(), vec![10, 20, 30]);
        assert!(state.drain_raw().is_empty());
        assert_eq!(state.peek_average(), 20.0);
        assert_eq!(state.take_average(), 20.0);
        assert_eq!(state.take_average(), 0.0);
    }

    #[test]
    fn test_raw_tap_is_bounded() {
        let state = SignalState::new();
        let samples: Vec<Sample> = (0..17).collect();
        for _ in 0..(RAW_TAP_CAPACITY / 17 + 10) {
            state.record_packet(&packet(&samples));
        }

        assert!(state.raw_dropped() > 0);
        assert_eq!(state.drain_raw().len(), RAW_TAP_CAPACITY);
    }

    #[test]
    fn test_concurrent_record_and_take() {
        let state = SignalState::new();
        let writer = {
            let state = state.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    state.record_packet(&packet(&[100, 100]));
                }
            })
        };

        for _ in 0..100 {
            let average = state.take_average();
            assert!(average == 0.0 || average == 100.0);
        }
        writer.join().unwrap();
    }
}

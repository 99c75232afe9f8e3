//! Blink counting over the sample history

use crate::signal::SampleHistory;
use protocol::Sample;

/// Values above this count as part of a blink
pub const BLINK_THRESHOLD: Sample = 600;

/// An above-threshold run this long is noise, not a blink
pub const NOISE_RUN: u32 = 12;

/// A below-threshold run longer than this ends the burst
pub const QUIET_RUN: u32 = 80;

/// More blinks than this in one burst means REM
pub const DREAMING_BLINKS: u32 = 6;

/// Reported blink counts saturate here
pub const MAX_REPORTED_BLINKS: u32 = 10;

/// Scan state; rebuilt from scratch on every classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorState {
    pub blink_count: u32,
    pub samples_above: u32,
    pub samples_below: u32,
    pub is_blinking: bool,
}

impl DetectorState {
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one value; returns true once the burst qualifies as dreaming
    pub fn step(&mut self, value: Sample, blink_interval: u32) -> bool {
        if value > BLINK_THRESHOLD {
            self.samples_above += 1;
            self.samples_below = 0;
        } else {
            self.samples_below += 1;
            self.samples_above = 0;
        }

        if !self.is_blinking {
            if self.samples_above >= 1 {
                self.is_blinking = true;
                self.blink_count += 1;
                self.samples_above = 0;
                self.samples_below = 0;
            }
        } else if self.samples_below >= blink_interval {
            self.is_blinking = false;
            self.samples_below = 0;
            self.samples_above = 0;
        } else if self.samples_above >= NOISE_RUN {
            self.reset();
        }

        if self.blink_count > DREAMING_BLINKS {
            return true;
        }

        if self.samples_above > NOISE_RUN || self.samples_below > QUIET_RUN {
            self.reset();
        }
        false
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstOutcome {
    /// More than [`DREAMING_BLINKS`] blinks in one burst
    Dreaming,
    /// Blinks counted at the end of the history
    Blinks(u32),
}

/// Scan the whole history
pub fn scan(history: &SampleHistory, blink_interval: u32) -> BurstOutcome {
    let mut state = DetectorState::default();
    for value in history.iter() {
        if state.step(value, blink_interval) {
            return BurstOutcome::Dreaming;
        }
    }
    BurstOutcome::Blinks(state.blink_count)
}

/// Map a scan outcome to the reported value
pub fn score(outcome: BurstOutcome) -> f64 {
    match outcome {
        BurstOutcome::Dreaming => super::DREAMING,
        BurstOutcome::Blinks(blinks) => f64::from(blinks.min(MAX_REPORTED_BLINKS) * 100),
    }
}

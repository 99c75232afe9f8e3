//! Artifact detection
//!
//! Two alternative classifiers run over the per-tick history:
//!
//! - [`DetectorMode::RemDetection`] counts isolated blinks in the whole
//!   history and reports `min(blinks, 10) * 100`, or [`DREAMING`] once a
//!   burst holds more than six blinks.
//! - [`DetectorMode::MotionDetection`] counts large spikes in the latest
//!   value across calls.

pub mod burst;
pub mod motion;

use crate::signal::SampleHistory;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub use burst::{BurstOutcome, DetectorState};
pub use motion::MotionCounter;

/// Sentinel reported for a dreaming classification
pub const DREAMING: f64 = 888.0;

/// Default below-run length that ends a blink
pub const DEFAULT_BLINK_INTERVAL: u32 = 28;

/// Classification algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorMode {
    /// Blink/REM burst counting
    #[default]
    RemDetection,
    /// Motion spike counting
    MotionDetection,
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorMode::RemDetection => f.write_str("rem-detection"),
            DetectorMode::MotionDetection => f.write_str("motion-detection"),
        }
    }
}

/// Artifact detector
#[derive(Debug, Clone)]
pub struct ArtifactDetector {
    mode: DetectorMode,
    blink_interval: u32,
    motion: MotionCounter,
}

impl ArtifactDetector {
    pub fn new(mode: DetectorMode, blink_interval: u32) -> Self {
        Self {
            mode,
            blink_interval,
            motion: MotionCounter::default(),
        }
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    pub fn blink_interval(&self) -> u32 {
        self.blink_interval
    }

    /// Classify the current history
    pub fn classify(&mut self, history: &SampleHistory) -> f64 {
        match self.mode {
            DetectorMode::RemDetection => {
                let outcome = burst::scan(history, self.blink_interval);
                debug!("Burst scan over {} ticks: {:?}", history.len(), outcome);
                burst::score(outcome)
            }
            DetectorMode::MotionDetection => self.motion.step(history.latest().unwrap_or(0)),
        }
    }
}

impl Default for ArtifactDetector {
    fn default() -> Self {
        Self::new(DetectorMode::default(), DEFAULT_BLINK_INTERVAL)
    }
}

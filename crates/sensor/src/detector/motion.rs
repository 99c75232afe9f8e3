//! Motion spike counting

use protocol::Sample;

/// Values above this count as motion
pub const MOTION_THRESHOLD: Sample = 980;

/// Consecutive-call spike count that completes an artifact
pub const SPIKES_PER_ARTIFACT: u32 = 5;

/// Ticks an artifact must be apart from the previous one to be reported
pub const STALE_ARTIFACT_TICKS: u32 = 19_200;

/// Per-call motion counters; persists across classifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionCounter {
    ticks_above: u32,
    ticks_since_artifact: u32,
}

impl MotionCounter {
    /// Feed the latest per-tick value
    ///
    /// The artifact counter is cleared before it is compared, so the
    /// stale-artifact branch never fires and this always returns 0. The
    /// behavior is kept as shipped until the intended rule is known.
    pub fn step(&mut self, latest: Sample) -> f64 {
        if latest > MOTION_THRESHOLD {
            self.ticks_above += 1;
            if self.ticks_above > SPIKES_PER_ARTIFACT {
                self.ticks_above = 0;
                self.ticks_since_artifact = 0;
                if self.ticks_since_artifact > STALE_ARTIFACT_TICKS {
                    return super::DREAMING;
                }
            }
        }

        self.ticks_since_artifact = self.ticks_since_artifact.saturating_add(1);
        0.0
    }

    pub fn ticks_above(&self) -> u32 {
        self.ticks_above
    }

    pub fn ticks_since_artifact(&self) -> u32 {
        self.ticks_since_artifact
    }
}

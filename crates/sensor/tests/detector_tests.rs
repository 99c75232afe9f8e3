//! Detector behavior over realistic histories

use protocol::Sample;
use sensor::detector::DEFAULT_BLINK_INTERVAL;
use sensor::signal::HISTORY_CAPACITY;
use sensor::{ArtifactDetector, DREAMING, DetectorMode, SampleHistory};

fn history(values: impl IntoIterator<Item = Sample>) -> SampleHistory {
    values.into_iter().collect()
}

/// `spikes` single-tick blinks, each followed by `gap` quiet ticks
fn blinks(spikes: usize, gap: usize) -> Vec<Sample> {
    let mut values = Vec::new();
    for _ in 0..spikes {
        values.push(750);
        values.extend(std::iter::repeat_n(120, gap));
    }
    values
}

#[test]
fn test_quiet_history_scores_zero() {
    let mut detector = ArtifactDetector::default();
    let full = history(std::iter::repeat_n(100, HISTORY_CAPACITY));
    assert_eq!(full.len(), HISTORY_CAPACITY);
    assert_eq!(detector.classify(&full), 0.0);
}

#[test]
fn test_empty_history_scores_zero() {
    let mut detector = ArtifactDetector::default();
    assert_eq!(detector.classify(&SampleHistory::new()), 0.0);
}

#[test]
fn test_three_blinks_score_300() {
    let mut detector = ArtifactDetector::default();
    let values = blinks(3, DEFAULT_BLINK_INTERVAL as usize + 2);
    assert_eq!(detector.classify(&history(values)), 300.0);
}

#[test]
fn test_seven_blinks_are_dreaming() {
    let mut detector = ArtifactDetector::default();
    let values = blinks(7, DEFAULT_BLINK_INTERVAL as usize + 2);
    assert_eq!(detector.classify(&history(values)), DREAMING);
}

#[test]
fn test_six_blinks_are_not_dreaming() {
    let mut detector = ArtifactDetector::default();
    let values = blinks(6, DEFAULT_BLINK_INTERVAL as usize + 2);
    assert_eq!(detector.classify(&history(values)), 600.0);
}

#[test]
fn test_old_burst_evicted_from_history() {
    let mut detector = ArtifactDetector::default();
    let mut values = blinks(7, 30);
    values.extend(std::iter::repeat_n(100, HISTORY_CAPACITY));

    let history = history(values);
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert_eq!(detector.classify(&history), 0.0);
}

#[test]
fn test_shorter_blink_interval_separates_close_spikes() {
    let values = blinks(3, 12);

    let mut default = ArtifactDetector::default();
    assert_eq!(default.classify(&history(values.clone())), 100.0);

    let mut tight = ArtifactDetector::new(DetectorMode::RemDetection, 10);
    assert_eq!(tight.classify(&history(values)), 300.0);
}

#[test]
fn test_classification_does_not_accumulate() {
    let mut detector = ArtifactDetector::default();
    let history = history(blinks(3, 30));
    assert_eq!(detector.classify(&history), 300.0);
    assert_eq!(detector.classify(&history), 300.0);
}

// Motion mode clears its artifact counter before testing it, so it can
// never report. These tests pin that behavior.

#[test]
fn test_motion_mode_never_reports() {
    let mut detector = ArtifactDetector::new(DetectorMode::MotionDetection, DEFAULT_BLINK_INTERVAL);
    let quiet = history([100]);
    let spike = history([1200]);

    for _ in 0..20_000 {
        assert_eq!(detector.classify(&quiet), 0.0);
    }
    for _ in 0..12 {
        assert_eq!(detector.classify(&spike), 0.0);
    }
}

#[test]
fn test_motion_mode_on_empty_history() {
    let mut detector = ArtifactDetector::new(DetectorMode::MotionDetection, DEFAULT_BLINK_INTERVAL);
    assert_eq!(detector.classify(&SampleHistory::new()), 0.0);
}

//! Range Merger Module
//!
//! Collapses per-timestamp detections into time ranges. Detections must be
//! fed in non-decreasing timestamp order; the merger never sorts.

use crate::pii_detector::{PiiCategory, PiiMatch};
use serde::Serialize;

/// Gap threshold used when none is configured, in seconds.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 1.0;

/// Everything the detector found in one sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampDetection {
    pub timestamp: f64,
    pub matches: Vec<PiiMatch>,
}

impl TimestampDetection {
    pub fn new(timestamp: f64, matches: Vec<PiiMatch>) -> Self {
        TimestampDetection { timestamp, matches }
    }
}

/// A span of the video in which PII was visible, with every match found in
/// it. Matches keep their order and duplicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
    pub matches: Vec<PiiMatch>,
}

impl TimeRange {
    fn seed(detection: TimestampDetection) -> Self {
        TimeRange {
            start: detection.timestamp,
            end: detection.timestamp,
            matches: detection.matches,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn values(&self, category: PiiCategory) -> impl Iterator<Item = &str> + '_ {
        self.matches
            .iter()
            .filter(move |m| m.category == category)
            .map(|m| m.value.as_str())
    }

    pub fn emails(&self) -> impl Iterator<Item = &str> + '_ {
        self.values(PiiCategory::Email)
    }

    pub fn passwords(&self) -> impl Iterator<Item = &str> + '_ {
        self.values(PiiCategory::Password)
    }
}

/// Accumulates detections into ranges.
///
/// Holds at most one open range. A detection within `threshold` seconds of
/// the open range's end extends it, anything further seals it and opens a new
/// one. `finalize` consumes the merger, so nothing can be absorbed afterwards.
#[derive(Debug)]
pub struct RangeMerger {
    threshold: f64,
    open: Option<TimeRange>,
    sealed: Vec<TimeRange>,
}

impl RangeMerger {
    pub fn new(threshold: f64) -> Self {
        RangeMerger {
            threshold,
            open: None,
            sealed: Vec::new(),
        }
    }

    /// True while a range is being extended.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Number of ranges already sealed.
    pub fn sealed_count(&self) -> usize {
        self.sealed.len()
    }

    pub fn absorb(&mut self, detection: TimestampDetection) {
        if let Some(current) = self.open.as_mut() {
            if detection.timestamp - current.end <= self.threshold {
                current.end = detection.timestamp;
                current.matches.extend(detection.matches);
                return;
            }
        }

        if let Some(done) = self.open.replace(TimeRange::seed(detection)) {
            self.sealed.push(done);
        }
    }

    /// Seals the open range, if any, and returns all ranges in order.
    pub fn finalize(mut self) -> Vec<TimeRange> {
        if let Some(current) = self.open.take() {
            self.sealed.push(current);
        }
        self.sealed
    }
}

impl Default for RangeMerger {
    fn default() -> Self {
        Self::new(DEFAULT_MERGE_THRESHOLD)
    }
}

/// Merges an ordered sequence of detections in one go.
pub fn merge_detections<I>(detections: I, threshold: f64) -> Vec<TimeRange>
where
    I: IntoIterator<Item = TimestampDetection>,
{
    let mut merger = RangeMerger::new(threshold);
    for detection in detections {
        merger.absorb(detection);
    }
    merger.finalize()
}

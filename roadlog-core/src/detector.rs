//! Hysteresis pothole detector
//!
//! The detector is BELOW until a magnitude rises past the threshold, then
//! ABOVE until one falls back under it. While ABOVE, every magnitude over the
//! threshold adds its excess to the interval severity. When the interval
//! closes it becomes a [`PotholeEvent`] geo-tagged at the midpoint of the
//! fixes seen at its start and end, unless its severity is below the
//! recording minimum.

use crate::config::DetectionSettings;
use crate::observer::{MotionObserver, MotionUpdate};
use crate::types::{Location, PotholeEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Detector state, reset on every rising crossing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectionState {
    pub armed: bool,
    pub cumulative_severity: f64,
    pub start: Location,
    pub end: Location,
}

#[derive(Debug, Clone)]
pub struct EventDetector {
    threshold: f64,
    minimal_severity: f64,
    state: DetectionState,
    previous: Option<f64>,
    events_emitted: u64,
    intervals_discarded: u64,
}

impl EventDetector {
    pub fn new(threshold: f64, minimal_severity: f64) -> Self {
        Self {
            threshold,
            minimal_severity,
            state: DetectionState::default(),
            previous: None,
            events_emitted: 0,
            intervals_discarded: 0,
        }
    }

    pub fn from_settings(settings: &DetectionSettings) -> Self {
        Self::new(settings.threshold, settings.minimal_severity)
    }

    /// Feed one magnitude with the location snapshot taken for it.
    ///
    /// Returns an event when this sample closes a qualifying interval.
    pub fn process(
        &mut self,
        magnitude: f64,
        timestamp_ms: i64,
        location: Option<Location>,
    ) -> Option<PotholeEvent> {
        let location = location.unwrap_or_default();
        let previous = self.previous.replace(magnitude);
        let t = self.threshold;

        if !self.state.armed {
            if magnitude > t && previous.is_some_and(|p| p <= t) {
                self.state = DetectionState {
                    armed: true,
                    cumulative_severity: 0.0,
                    start: location,
                    end: location,
                };
                tracing::trace!(magnitude, timestamp_ms, "Interval opened");
            }
        } else if magnitude < t && previous.is_some_and(|p| p >= t) {
            self.state.armed = false;
            self.state.end = location;
            return self.close_interval(timestamp_ms);
        }

        if self.state.armed && magnitude > t {
            self.state.cumulative_severity += magnitude - t;
        }
        None
    }

    fn close_interval(&mut self, timestamp_ms: i64) -> Option<PotholeEvent> {
        let severity = self.state.cumulative_severity;
        if severity < self.minimal_severity {
            self.intervals_discarded += 1;
            tracing::debug!(
                severity,
                minimum = self.minimal_severity,
                "Interval below minimal severity, discarded"
            );
            return None;
        }

        let midpoint = self.state.start.midpoint(&self.state.end);
        self.events_emitted += 1;
        tracing::debug!(severity, timestamp_ms, "Pothole detected");
        Some(PotholeEvent {
            timestamp_ms,
            severity,
            latitude: midpoint.latitude,
            longitude: midpoint.longitude,
            speed: midpoint.speed,
        })
    }

    pub fn is_above(&self) -> bool {
        self.state.armed
    }

    pub fn cumulative_severity(&self) -> f64 {
        self.state.cumulative_severity
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    pub fn intervals_discarded(&self) -> u64 {
        self.intervals_discarded
    }
}

/// Counts rising threshold crossings of the published magnitude stream.
///
/// Stands in for the audible alert: each crossing is logged at info level.
#[derive(Debug)]
pub struct CrossingAlert {
    threshold: f64,
    previous: Mutex<Option<f64>>,
    crossings: AtomicU64,
}

impl CrossingAlert {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            previous: Mutex::new(None),
            crossings: AtomicU64::new(0),
        }
    }

    pub fn crossings(&self) -> u64 {
        self.crossings.load(Ordering::Relaxed)
    }
}

impl MotionObserver for CrossingAlert {
    fn on_motion(&self, update: &MotionUpdate) {
        let previous = {
            let mut previous = self
                .previous
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            previous.replace(update.magnitude)
        };
        let rising =
            previous.is_some_and(|p| p < self.threshold) && update.magnitude > self.threshold;
        if rising {
            let count = self.crossings.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(
                magnitude = update.magnitude,
                threshold = self.threshold,
                count,
                "Threshold crossed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MINIMAL_SEVERITY_TO_RECORD;
    use crate::ring_buffer::RingBuffer;

    fn run(
        detector: &mut EventDetector,
        magnitudes: &[f64],
        location: Option<Location>,
    ) -> Vec<PotholeEvent> {
        magnitudes
            .iter()
            .enumerate()
            .filter_map(|(i, m)| detector.process(*m, i as i64, location))
            .collect()
    }

    #[test]
    fn test_single_interval_recorded() {
        let mut detector = EventDetector::new(2.0, 2.0);
        let fix = Some(Location::new(10.0, 20.0, 5.0));
        let events = run(&mut detector, &[1.0, 1.0, 3.0, 3.0, 1.0], fix);

        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.severity, 2.0);
        assert_eq!(event.timestamp_ms, 4);
        assert_eq!(
            (event.latitude, event.longitude, event.speed),
            (10.0, 20.0, 5.0)
        );
        assert!(!detector.is_above());
        assert_eq!(detector.events_emitted(), 1);
    }

    #[test]
    fn test_below_threshold_never_fires() {
        let mut detector = EventDetector::new(2.0, 2.0);
        let events = run(&mut detector, &[0.5, 1.9, 2.0, 1.0, 2.0, 0.0], None);
        assert!(events.is_empty());
        assert!(!detector.is_above());
    }

    #[test]
    fn test_severity_below_minimum_discarded() {
        let mut detector = EventDetector::new(2.0, 2.0);
        let events = run(&mut detector, &[1.0, 3.0, 1.0], None);
        assert!(events.is_empty());
        assert_eq!(detector.intervals_discarded(), 1);
    }

    #[test]
    fn test_severity_equal_to_minimum_recorded() {
        let mut detector = EventDetector::new(2.0, 1.0);
        let events = run(&mut detector, &[1.0, 3.0, 1.0], None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, 1.0);
    }

    #[test]
    fn test_minimal_severity_boundary_with_defaults() {
        let settings = DetectionSettings::default();
        let peak = settings.threshold + MINIMAL_SEVERITY_TO_RECORD;

        let mut detector = EventDetector::from_settings(&settings);
        let events = run(&mut detector, &[1.0, peak, 1.0], None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, MINIMAL_SEVERITY_TO_RECORD);

        let mut detector = EventDetector::from_settings(&settings);
        let events = run(&mut detector, &[1.0, peak - 1e-9, 1.0], None);
        assert!(events.is_empty());
        assert_eq!(detector.intervals_discarded(), 1);
    }

    #[test]
    fn test_session_starting_above_threshold_waits_for_drop() {
        let mut detector = EventDetector::new(2.0, 0.5);
        let events = run(&mut detector, &[5.0, 5.0, 1.0], None);
        assert!(events.is_empty());
        assert!(!detector.is_above());

        // A full dip and rise afterwards is detected normally
        let events: Vec<_> = [5.0, 1.0]
            .iter()
            .filter_map(|m| detector.process(*m, 10, None))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, 3.0);
    }

    #[test]
    fn test_sample_at_threshold_keeps_interval_open() {
        let mut detector = EventDetector::new(2.0, 0.0);
        let events = run(&mut detector, &[1.0, 3.0, 2.0, 4.0, 1.0], None);
        assert_eq!(events.len(), 1);
        // 1.0 from the rising sample plus 2.0 after the plateau
        assert_eq!(events[0].severity, 3.0);
    }

    #[test]
    fn test_location_midpoint_of_interval() {
        let mut detector = EventDetector::new(2.0, 0.0);
        assert!(detector
            .process(1.0, 0, Some(Location::new(10.0, 20.0, 4.0)))
            .is_none());
        assert!(detector
            .process(3.0, 1, Some(Location::new(10.0, 20.0, 4.0)))
            .is_none());
        let event = detector
            .process(1.0, 2, Some(Location::new(12.0, 22.0, 6.0)))
            .unwrap();
        assert_eq!(
            (event.latitude, event.longitude, event.speed),
            (11.0, 21.0, 5.0)
        );
    }

    #[test]
    fn test_missing_location_defaults_to_origin() {
        let mut detector = EventDetector::new(2.0, 0.0);
        let events = run(&mut detector, &[0.0, 4.0, 0.0], None);
        assert_eq!(events.len(), 1);
        assert_eq!(
            (events[0].latitude, events[0].longitude, events[0].speed),
            (0.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_severity_reset_between_intervals() {
        let mut detector = EventDetector::new(2.0, 0.0);
        let events = run(&mut detector, &[0.0, 5.0, 0.0, 3.0, 0.0], None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].severity, 3.0);
        assert_eq!(events[1].severity, 1.0);
    }

    #[test]
    fn test_crossing_alert_counts_rising_edges() {
        let alert = CrossingAlert::new(2.0);
        let buffer = RingBuffer::shared(8).unwrap();
        for magnitude in [1.0, 3.0, 3.0, 1.0, 2.0, 3.0, 1.0, 4.0] {
            alert.on_motion(&MotionUpdate {
                magnitude,
                buffer: buffer.clone(),
                location: None,
                timestamp_ms: 0,
            });
        }
        // 1->3 and 1->4 count; 2->3 starts exactly at the threshold
        assert_eq!(alert.crossings(), 2);
    }
}

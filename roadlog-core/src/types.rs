//! Core domain types for roadlog
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Sample** | One tri-axial accelerometer reading |
//! | **Magnitude** | Scalar derived per sample after gravity removal and differential smoothing |
//! | **Interval** | Span between a rising and the following falling threshold crossing |
//! | **Severity** | Accumulated excess-over-threshold across an interval |
//! | **Session** | One continuous logging run, from first fix (or bypass) to explicit stop |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================
// Sensor input
// ============================================

/// Accelerometer reading as delivered by the sensor source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl RawSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp_ms,
        }
    }

    pub fn axes(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Last-known geolocation fix
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in m/s
    pub speed: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, speed: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed,
        }
    }

    /// Arithmetic mean of two fixes, component-wise.
    pub fn midpoint(&self, other: &Location) -> Location {
        Location {
            latitude: (self.latitude + other.latitude) / 2.0,
            longitude: (self.longitude + other.longitude) / 2.0,
            speed: (self.speed + other.speed) / 2.0,
        }
    }
}

// ============================================
// Detected events
// ============================================

/// A qualifying hysteresis interval, geo-tagged at its midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PotholeEvent {
    pub timestamp_ms: i64,
    pub severity: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
}

impl PotholeEvent {
    /// Data file line: `timestamp,severity,lat,lon,speed`
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.timestamp_ms, self.severity, self.latitude, self.longitude, self.speed
        )
    }
}

// ============================================
// Recording sessions
// ============================================

/// Persisted record of one logging run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub data_file_path: PathBuf,
    pub event_count: i64,
    pub uploaded: bool,
}

impl RecordingSession {
    /// True once `finish` has stamped an end time.
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Wall-clock length of the session, if finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Data file name derived from the session start time.
pub fn data_file_name(start_time: DateTime<Utc>) -> String {
    format!("data{}.log", start_time.timestamp_millis())
}

/// Header written once at the top of every data file.
pub const DATA_FILE_HEADER: &str = "Time, Severity, Lat, Lon, Speed";

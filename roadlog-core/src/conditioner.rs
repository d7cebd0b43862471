//! Gravity removal and differential smoothing
//!
//! Each raw sample passes through two stages:
//!
//! 1. A per-axis exponential low-pass tracks gravity; subtracting it leaves
//!    linear acceleration.
//! 2. Linear acceleration is written into a per-axis circular window of
//!    `filter_factor` slots. The output magnitude is the mean absolute
//!    difference between adjacent slots, summed over all three axes.
//!
//! Adjacent differences are taken in slot order, not chronological order,
//! so the pair straddling the write pointer compares the oldest value with
//! the newest one.

use crate::config::{clamp_filter_factor, DetectionSettings};
use crate::types::RawSample;

/// Per-axis exponential moving average of the gravity component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityEstimate {
    alpha: f64,
    axes: [f64; 3],
}

impl GravityEstimate {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            axes: [0.0; 3],
        }
    }

    /// Fold one reading into the estimate and return the linear acceleration.
    pub fn remove_from(&mut self, raw: [f64; 3]) -> [f64; 3] {
        let mut linear = [0.0; 3];
        for (axis, value) in raw.iter().enumerate() {
            self.axes[axis] = self.alpha * self.axes[axis] + (1.0 - self.alpha) * value;
            linear[axis] = value - self.axes[axis];
        }
        linear
    }

    pub fn axes(&self) -> [f64; 3] {
        self.axes
    }
}

/// Turns raw samples into one smoothed motion magnitude each.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    gravity: GravityEstimate,
    windows: [Vec<f64>; 3],
    pointer: usize,
    filter_factor: usize,
    samples_processed: u64,
}

impl SignalConditioner {
    /// Create a conditioner with the given window length and gravity coefficient.
    ///
    /// Window lengths below 2 are clamped to 2.
    pub fn new(filter_factor: usize, gravity_alpha: f64) -> Self {
        let filter_factor = clamp_filter_factor(filter_factor as i64);
        Self {
            gravity: GravityEstimate::new(gravity_alpha),
            windows: [
                vec![0.0; filter_factor],
                vec![0.0; filter_factor],
                vec![0.0; filter_factor],
            ],
            pointer: 0,
            filter_factor,
            samples_processed: 0,
        }
    }

    pub fn from_settings(settings: &DetectionSettings) -> Self {
        Self::new(settings.filter_factor, settings.gravity_alpha)
    }

    /// Condition one sample.
    pub fn process(&mut self, sample: &RawSample) -> f64 {
        let linear = self.gravity.remove_from(sample.axes());
        for (window, value) in self.windows.iter_mut().zip(linear) {
            window[self.pointer] = value;
        }

        let total: f64 = self
            .windows
            .iter()
            .map(|window| {
                window
                    .windows(2)
                    .map(|pair| (pair[1] - pair[0]).abs())
                    .sum::<f64>()
            })
            .sum();
        let magnitude = total / (self.filter_factor as f64 * 3.0);

        self.pointer = (self.pointer + 1) % self.filter_factor;
        self.samples_processed += 1;
        magnitude
    }

    pub fn gravity(&self) -> [f64; 3] {
        self.gravity.axes()
    }

    pub fn filter_factor(&self) -> usize {
        self.filter_factor
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }
}

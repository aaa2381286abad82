//! Jolt classification over a bounded window of acceleration magnitudes.
//!
//! Every sample's magnitude is pushed into a fixed-capacity ring. Once enough samples are
//! buffered the window's mean and standard deviation are evaluated: an event fires only when
//! the window is both jerky (stddev above threshold) and displaced from gravity (mean deviation
//! above the profile-scaled threshold). Accepted events are rate limited by the profile cooldown.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::{MotionEvent, MotionTelemetry, SensorSample, STANDARD_GRAVITY};

use super::profile::SensitivityProfile;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub baseline: f64,
    pub stddev_threshold: f64,
    /// Gravity deviation threshold before the profile multiplier is applied.
    pub base_threshold: f64,
    /// Clear the buffer after an accepted event so the next one needs a fresh window.
    pub clear_on_accept: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            baseline: STANDARD_GRAVITY,
            stddev_threshold: 1.5,
            base_threshold: 3.0,
            clear_on_accept: true,
        }
    }
}

/// Ring of the most recent magnitudes, overwritten oldest-first.
#[derive(Debug, Clone)]
pub struct MotionBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl MotionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, magnitude: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(magnitude);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / self.values.len() as f64;
        variance.sqrt()
    }

    pub fn peak(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }
}

pub struct SampleClassifier {
    config: ClassifierConfig,
    profile: SensitivityProfile,
    buffer: MotionBuffer,
    last_motion_ms: Option<u64>,
    telemetry_tx: watch::Sender<MotionTelemetry>,
}

impl SampleClassifier {
    pub fn new(config: ClassifierConfig, profile: SensitivityProfile) -> Self {
        let (telemetry_tx, _) = watch::channel(MotionTelemetry::default());
        Self {
            buffer: MotionBuffer::new(profile.buffer_capacity),
            config,
            profile,
            last_motion_ms: None,
            telemetry_tx,
        }
    }

    pub fn profile(&self) -> &SensitivityProfile {
        &self.profile
    }

    /// Swap the active profile. The buffer is rebuilt at the new capacity and starts empty;
    /// the cooldown anchor is kept.
    pub fn set_profile(&mut self, profile: SensitivityProfile) {
        log_info!(
            "sensitivity set to {:?} (x{}, cooldown {}ms, window {})",
            profile.sensitivity,
            profile.threshold_multiplier,
            profile.cooldown_ms,
            profile.buffer_capacity
        );
        self.buffer = MotionBuffer::new(profile.buffer_capacity);
        self.profile = profile;
    }

    pub fn last_motion_ms(&self) -> Option<u64> {
        self.last_motion_ms
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Latest telemetry tuple. Purely observational.
    pub fn telemetry(&self) -> watch::Receiver<MotionTelemetry> {
        self.telemetry_tx.subscribe()
    }

    fn min_samples(&self) -> usize {
        self.profile.min_samples.max(1).min(self.buffer.capacity())
    }

    fn in_cooldown(&self, now_ms: u64) -> bool {
        self.last_motion_ms
            .map(|last| now_ms.saturating_sub(last) < self.profile.cooldown_ms)
            .unwrap_or(false)
    }

    pub fn ingest(&mut self, sample: SensorSample) -> Option<MotionEvent> {
        let now_ms = sample.timestamp_ms;
        let magnitude = sample.magnitude();

        self.telemetry_tx.send_replace(MotionTelemetry {
            timestamp_ms: now_ms,
            magnitude,
            since_last_motion_ms: self.last_motion_ms.map(|last| now_ms.saturating_sub(last)),
        });

        self.buffer.push(magnitude);
        if self.buffer.len() < self.min_samples() {
            return None;
        }

        let mean = self.buffer.mean();
        let stddev = self.buffer.stddev();
        let deviation = (mean - self.config.baseline).abs();

        let jerky = stddev > self.config.stddev_threshold;
        let displaced = deviation > self.config.base_threshold * self.profile.threshold_multiplier;
        if !(jerky && displaced) {
            return None;
        }

        if self.in_cooldown(now_ms) {
            log_debug!(
                "jolt at {}ms suppressed by cooldown (stddev {:.2}, deviation {:.2})",
                now_ms,
                stddev,
                deviation
            );
            return None;
        }

        let event = MotionEvent {
            timestamp_ms: now_ms,
            peak_magnitude: self.buffer.peak(),
            mean_magnitude: mean,
            stddev,
        };

        self.last_motion_ms = Some(now_ms);
        if self.config.clear_on_accept {
            self.buffer.clear();
        }

        log_info!(
            "motion detected at {}ms: peak {:.2}, mean {:.2}, stddev {:.2}",
            event.timestamp_ms,
            event.peak_magnitude,
            event.mean_magnitude,
            event.stddev
        );

        Some(event)
    }
}

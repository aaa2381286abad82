use serde::{Deserialize, Serialize};

/// One accelerometer reading in m/s². `timestamp_ms` is on the sensor's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp_ms: u64,
}

impl SensorSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: u64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp_ms,
        }
    }

    /// A device lying still: gravity on the z axis only.
    pub fn at_rest(timestamp_ms: u64) -> Self {
        Self::new(0.0, 0.0, super::STANDARD_GRAVITY, timestamp_ms)
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionEvent {
    pub timestamp_ms: u64,
    pub peak_magnitude: f64,
    pub mean_magnitude: f64,
    pub stddev: f64,
}

/// Observability tuple published for every ingested sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionTelemetry {
    pub timestamp_ms: u64,
    pub magnitude: f64,
    pub since_last_motion_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PocketState {
    pub in_pocket: bool,
    pub since_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PocketSignal {
    Quiet,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PocketStateChange {
    pub state: PocketState,
    pub signal: PocketSignal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_is_euclidean_norm() {
        let sample = SensorSample::new(3.0, 4.0, 12.0, 0);
        assert!((sample.magnitude() - 13.0).abs() < 1e-9);
    }
}

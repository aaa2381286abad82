use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Medium
    }
}

/// Tuning for one sensitivity level. Immutable once handed to the classifier; swapping it in
/// resets the magnitude buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityProfile {
    pub sensitivity: Sensitivity,
    /// Scales the gravity-deviation threshold. Larger is less sensitive.
    pub threshold_multiplier: f64,
    pub cooldown_ms: u64,
    pub buffer_capacity: usize,
    /// Samples required in the buffer before anything is evaluated.
    pub min_samples: usize,
}

impl SensitivityProfile {
    pub fn for_level(sensitivity: Sensitivity) -> Self {
        match sensitivity {
            Sensitivity::Low => Self::low(),
            Sensitivity::Medium => Self::medium(),
            Sensitivity::High => Self::high(),
        }
    }

    pub fn low() -> Self {
        Self {
            sensitivity: Sensitivity::Low,
            threshold_multiplier: 2.5,
            cooldown_ms: 15_000,
            buffer_capacity: 8,
            min_samples: 7,
        }
    }

    pub fn medium() -> Self {
        Self {
            sensitivity: Sensitivity::Medium,
            threshold_multiplier: 1.0,
            cooldown_ms: 10_000,
            buffer_capacity: 8,
            min_samples: 6,
        }
    }

    pub fn high() -> Self {
        Self {
            sensitivity: Sensitivity::High,
            threshold_multiplier: 0.8,
            cooldown_ms: 8_000,
            buffer_capacity: 8,
            min_samples: 5,
        }
    }
}

impl Default for SensitivityProfile {
    fn default() -> Self {
        Self::medium()
    }
}

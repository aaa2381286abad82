mod contact;
mod media;
mod sample;

pub use contact::{ChannelKind, ContactOutcome, DispatchOutcome, DispatchReport, EmergencyContact};
pub use media::{CaptureResult, MediaKind, MediaRef};
pub use sample::{
    MotionEvent, MotionTelemetry, PocketSignal, PocketState, PocketStateChange, SensorSample,
};

/// Gravitational baseline in m/s².
pub const STANDARD_GRAVITY: f64 = 9.81;

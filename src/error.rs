//! Error taxonomy.
//!
//! Component-local failures (one device, one channel, one contact) are absorbed and aggregated
//! by their coordinators; only the session-level aggregates below ever reach a caller.

use thiserror::Error;

use crate::models::ChannelKind;

/// Failure reported by an external collaborator (sensor, camera, channel, host...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Capture-stage failure. Retried by the session up to its attempt cap.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no camera became ready within {waited_ms}ms")]
    NoDeviceReady { waited_ms: u64 },

    #[error("all {attempted} capture(s) failed")]
    AllCapturesFailed {
        attempted: usize,
        errors: Vec<(String, BridgeError)>,
    },
}

/// Per-channel send failure. Recorded in the dispatch report, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{channel} send to {contact_id} failed: {source}")]
pub struct ChannelSendFailed {
    pub contact_id: String,
    pub channel: ChannelKind,
    #[source]
    pub source: BridgeError,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("an alert session is already active ({0})")]
    SessionActive(String),

    #[error("no captured evidence to redispatch")]
    NoEvidence,

    #[error("session is {0}, retry is only possible after a failure")]
    NotFailed(&'static str),

    #[error("every channel failed for every contact")]
    AllChannelsFailed,

    #[error("emergency contacts unavailable: {0}")]
    ContactsUnavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("background execution unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error(transparent)]
    Host(#[from] BridgeError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("motion sensor permission denied: {0}")]
    PermissionDenied(String),

    #[error("monitoring already active")]
    AlreadyRunning,

    #[error("monitoring loop is not running")]
    NotRunning,

    #[error(transparent)]
    Sensor(BridgeError),
}

impl From<BridgeError> for MonitorError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::PermissionDenied(reason) => MonitorError::PermissionDenied(reason),
            other => MonitorError::Sensor(other),
        }
    }
}

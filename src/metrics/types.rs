use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::MotionTelemetry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionOutcome {
    Started,
    Resolved,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    pub started: u64,
    pub resolved: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub recent_telemetry: VecDeque<MotionTelemetry>,
    pub sample_count: u64,
    pub motion_count: u64,
    pub dropped_triggers: u64,
    pub pocket_transitions: u64,
    pub capture_failures: u64,
    pub sessions: SessionCounters,
    pub last_session_at: Option<DateTime<Utc>>,
}

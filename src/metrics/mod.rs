mod types;

pub use types::{MetricsSnapshot, SessionCounters, SessionOutcome};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::MotionTelemetry;

const MAX_RECENT_TELEMETRY: usize = 20;

pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Default)]
struct MetricsState {
    snapshot: MetricsSnapshot,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::default())),
        }
    }

    pub async fn record_sample(&self, telemetry: MotionTelemetry) {
        let mut state = self.inner.lock().await;
        let snapshot = &mut state.snapshot;

        snapshot.sample_count += 1;
        if snapshot.recent_telemetry.len() == MAX_RECENT_TELEMETRY {
            snapshot.recent_telemetry.pop_front();
        }
        snapshot.recent_telemetry.push_back(telemetry);
    }

    pub async fn record_motion(&self) {
        self.inner.lock().await.snapshot.motion_count += 1;
    }

    /// A motion event arrived while a session was already running.
    pub async fn record_dropped_trigger(&self) {
        self.inner.lock().await.snapshot.dropped_triggers += 1;
    }

    pub async fn record_pocket_transition(&self) {
        self.inner.lock().await.snapshot.pocket_transitions += 1;
    }

    pub async fn record_capture_failure(&self) {
        self.inner.lock().await.snapshot.capture_failures += 1;
    }

    pub async fn record_session(&self, outcome: SessionOutcome) {
        let mut state = self.inner.lock().await;
        let sessions = &mut state.snapshot.sessions;
        match outcome {
            SessionOutcome::Started => sessions.started += 1,
            SessionOutcome::Resolved => sessions.resolved += 1,
            SessionOutcome::Failed => sessions.failed += 1,
            SessionOutcome::Cancelled => sessions.cancelled += 1,
        }
        if outcome == SessionOutcome::Started {
            state.snapshot.last_session_at = Some(Utc::now());
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.snapshot = MetricsSnapshot::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

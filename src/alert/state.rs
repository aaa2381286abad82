use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AlertError;
use crate::models::{CaptureResult, DispatchReport, EmergencyContact, MotionEvent};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlertState {
    Idle,
    CountdownActive,
    Capturing,
    Dispatching,
    Resolved,
    Cancelled,
    Failed,
}

impl Default for AlertState {
    fn default() -> Self {
        AlertState::Idle
    }
}

impl AlertState {
    /// A session is running and owns the pipeline.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AlertState::CountdownActive | AlertState::Capturing | AlertState::Dispatching
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AlertState::Resolved | AlertState::Cancelled | AlertState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Idle => "idle",
            AlertState::CountdownActive => "countdown",
            AlertState::Capturing => "capturing",
            AlertState::Dispatching => "dispatching",
            AlertState::Resolved => "resolved",
            AlertState::Cancelled => "cancelled",
            AlertState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AlertTrigger {
    Motion(MotionEvent),
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertConfig {
    pub countdown_secs: u32,
    /// Added to the countdown when it runs out before any camera is ready.
    pub grace_secs: u32,
    pub max_extensions: u32,
    pub max_capture_attempts: u32,
    pub capture_backoff_ms: u64,
    /// How long a resolved session stays visible before returning to idle.
    pub resolved_display_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            grace_secs: 3,
            max_extensions: 2,
            max_capture_attempts: 3,
            capture_backoff_ms: 5_000,
            resolved_display_ms: 3_000,
        }
    }
}

/// What a countdown tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Remaining(u32),
    Extended { remaining: u32, extensions: u32 },
    Capture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSession {
    pub state: AlertState,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub trigger: Option<AlertTrigger>,
    pub countdown_remaining: u32,
    pub extensions_used: u32,
    pub capture_attempts: u32,
    pub last_error: Option<String>,
    pub status_message: String,
    /// Kept after a failed dispatch so the same media can be sent again.
    pub evidence: Option<CaptureResult>,
    pub report: Option<DispatchReport>,
    /// Pulled once per session.
    #[serde(skip)]
    pub contacts: Option<Vec<EmergencyContact>>,
}

impl Default for AlertSession {
    fn default() -> Self {
        Self {
            state: AlertState::Idle,
            session_id: None,
            started_at: None,
            trigger: None,
            countdown_remaining: 0,
            extensions_used: 0,
            capture_attempts: 0,
            last_error: None,
            status_message: "Monitoring".into(),
            evidence: None,
            report: None,
            contacts: None,
        }
    }
}

impl AlertSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_current(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    pub fn begin(
        &mut self,
        session_id: String,
        trigger: AlertTrigger,
        started_at: DateTime<Utc>,
        config: &AlertConfig,
    ) {
        *self = Self {
            state: AlertState::CountdownActive,
            session_id: Some(session_id),
            started_at: Some(started_at),
            trigger: Some(trigger),
            countdown_remaining: config.countdown_secs,
            status_message: countdown_message(config.countdown_secs),
            ..Self::default()
        };
    }

    /// One countdown second. Only meaningful in `CountdownActive`.
    pub fn tick(&mut self, device_ready: bool, config: &AlertConfig) -> CountdownStep {
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        if self.countdown_remaining > 0 {
            self.status_message = countdown_message(self.countdown_remaining);
            return CountdownStep::Remaining(self.countdown_remaining);
        }

        if !device_ready && self.extensions_used < config.max_extensions {
            self.extensions_used += 1;
            self.countdown_remaining = config.grace_secs.max(1);
            self.status_message = format!(
                "Waiting for camera, alert in {}s",
                self.countdown_remaining
            );
            return CountdownStep::Extended {
                remaining: self.countdown_remaining,
                extensions: self.extensions_used,
            };
        }

        self.enter_capturing();
        CountdownStep::Capture
    }

    fn enter_capturing(&mut self) {
        self.state = AlertState::Capturing;
        self.status_message = format!("Capturing evidence (attempt {})", self.capture_attempts + 1);
    }

    /// Record a failed capture attempt. Returns whether another attempt is allowed.
    pub fn capture_failed(&mut self, error: String, config: &AlertConfig) -> bool {
        self.capture_attempts += 1;
        if self.capture_attempts >= config.max_capture_attempts.max(1) {
            self.state = AlertState::Failed;
            self.status_message = format!(
                "Capture failed after {} attempt(s): {}",
                self.capture_attempts, error
            );
            self.last_error = Some(error);
            return false;
        }
        self.status_message = format!("Capture failed ({error}), retrying");
        self.last_error = Some(error);
        true
    }

    pub fn retry_capture(&mut self) {
        self.enter_capturing();
    }

    pub fn capture_succeeded(&mut self, evidence: CaptureResult) {
        self.capture_attempts += 1;
        self.evidence = Some(evidence);
        self.state = AlertState::Dispatching;
        self.status_message = "Sending alert to emergency contacts".into();
    }

    pub fn dispatch_finished(&mut self, report: DispatchReport) {
        if report.success() {
            self.state = AlertState::Resolved;
            self.status_message = format!(
                "Alert sent to {} contact(s)",
                report.succeeded_contacts()
            );
            self.last_error = None;
        } else {
            self.state = AlertState::Failed;
            self.status_message = "Alert could not be delivered, retry available".into();
            self.last_error = Some(AlertError::AllChannelsFailed.to_string());
        }
        self.report = Some(report);
    }

    /// Move a failed session back to `Dispatching`, handing out the retained evidence.
    pub fn begin_redispatch(&mut self) -> Result<CaptureResult, AlertError> {
        if self.state != AlertState::Failed {
            return Err(AlertError::NotFailed(self.state.as_str()));
        }
        let evidence = self.evidence.clone().ok_or(AlertError::NoEvidence)?;
        self.state = AlertState::Dispatching;
        self.status_message = "Retrying alert delivery".into();
        Ok(evidence)
    }

    /// Returns false when there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = AlertState::Cancelled;
        self.countdown_remaining = 0;
        self.status_message = "Alert cancelled".into();
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn countdown_message(remaining: u32) -> String {
    format!("Alert in {remaining}s, cancel if this was a mistake")
}

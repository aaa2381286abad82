use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::{AlarmNotifier, ContactSource};
use crate::capture::{any_ready, CameraHandle, CaptureCoordinator};
use crate::dispatch::DispatchFanout;
use crate::error::{AlertError, BridgeError};
use crate::metrics::{MetricsCollector, SessionOutcome};
use crate::models::{CaptureResult, DispatchReport, EmergencyContact};

use super::{AlertConfig, AlertSession, AlertState, AlertTrigger, CountdownStep};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;
/// Alarm and notification calls are fire-and-forget; none may hold up a session.
const HOST_CALL_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AlertEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        session_id: String,
        state: AlertState,
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    CountdownTick { session_id: String, remaining: u32 },
    #[serde(rename_all = "camelCase")]
    CountdownExtended {
        session_id: String,
        remaining: u32,
        extensions: u32,
    },
    #[serde(rename_all = "camelCase")]
    CaptureFailed {
        session_id: String,
        attempt: u32,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Resolved {
        session_id: String,
        report: DispatchReport,
    },
    #[serde(rename_all = "camelCase")]
    Failed { session_id: String, error: String },
}

struct SessionRunner {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    config: AlertConfig,
    session: Mutex<AlertSession>,
    capture: CaptureCoordinator,
    cameras: Vec<CameraHandle>,
    fanout: DispatchFanout,
    contacts: Arc<dyn ContactSource>,
    alarm: Arc<dyn AlarmNotifier>,
    metrics: MetricsCollector,
    events: broadcast::Sender<AlertEvent>,
    /// Orders alarm start against alarm stop.
    alarm_gate: Mutex<()>,
}

/// Owns the single alert session and the task driving it.
#[derive(Clone)]
pub struct AlertController {
    shared: Arc<Shared>,
    runner: Arc<Mutex<Option<SessionRunner>>>,
}

pub struct AlertDeps {
    pub capture: CaptureCoordinator,
    pub cameras: Vec<CameraHandle>,
    pub fanout: DispatchFanout,
    pub contacts: Arc<dyn ContactSource>,
    pub alarm: Arc<dyn AlarmNotifier>,
    pub metrics: MetricsCollector,
}

impl AlertController {
    pub fn new(config: AlertConfig, deps: AlertDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                session: Mutex::new(AlertSession::new()),
                capture: deps.capture,
                cameras: deps.cameras,
                fanout: deps.fanout,
                contacts: deps.contacts,
                alarm: deps.alarm,
                metrics: deps.metrics,
                events,
                alarm_gate: Mutex::new(()),
            }),
            runner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.shared.events.subscribe()
    }

    pub async fn snapshot(&self) -> AlertSession {
        self.shared.session.lock().await.clone()
    }

    /// Begin a countdown. Fails with `SessionActive` while another session is running; a
    /// terminal session left on screen is replaced.
    pub async fn start(&self, trigger: AlertTrigger) -> Result<String, AlertError> {
        let mut runner = self.runner.lock().await;

        let session_id = Uuid::new_v4().to_string();
        {
            let mut session = self.shared.session.lock().await;
            if session.state.is_active() {
                let active = session.session_id.clone().unwrap_or_default();
                return Err(AlertError::SessionActive(active));
            }
            session.begin(session_id.clone(), trigger, Utc::now(), &self.shared.config);
        }

        if let Some(previous) = runner.take() {
            previous.token.cancel();
        }

        log_info!("alert session {} started ({:?})", session_id, trigger);
        self.shared.metrics.record_session(SessionOutcome::Started).await;
        self.shared.emit_state(&session_id).await;

        {
            let shared = Arc::clone(&self.shared);
            let session_id = session_id.clone();
            tokio::spawn(async move { shared.raise_alarm(&session_id, trigger).await });
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_session(
            Arc::clone(&self.shared),
            session_id.clone(),
            token.clone(),
        ));
        *runner = Some(SessionRunner { token, handle });

        Ok(session_id)
    }

    /// Cancel the running session. Results of an in-flight capture or dispatch are discarded.
    /// Returns false when nothing was active.
    pub async fn cancel(&self) -> bool {
        let session_id = {
            let mut session = self.shared.session.lock().await;
            if !session.cancel() {
                return false;
            }
            session.session_id.clone().unwrap_or_default()
        };

        if let Some(runner) = self.runner.lock().await.as_ref() {
            runner.token.cancel();
        }

        log_info!("alert session {} cancelled", session_id);
        self.shared.metrics.record_session(SessionOutcome::Cancelled).await;
        self.shared.stop_alarm().await;
        self.shared.emit_state(&session_id).await;
        true
    }

    /// Send the retained evidence again after a failed dispatch. Capture is not repeated.
    pub async fn retry_dispatch(&self) -> Result<(), AlertError> {
        let mut runner = self.runner.lock().await;

        let (session_id, evidence) = {
            let mut session = self.shared.session.lock().await;
            let evidence = session.begin_redispatch()?;
            (session.session_id.clone().unwrap_or_default(), evidence)
        };

        if let Some(previous) = runner.take() {
            previous.token.cancel();
        }

        log_info!("redispatching evidence for session {}", session_id);
        self.shared.emit_state(&session_id).await;

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let child = token.clone();
        let handle = tokio::spawn(async move {
            run_dispatch(&shared, &session_id, &child, evidence).await;
        });
        *runner = Some(SessionRunner { token, handle });

        Ok(())
    }

    /// Send a marked test alert to every contact over every channel. The session is untouched.
    pub async fn send_test(&self) -> Result<DispatchReport, AlertError> {
        let contacts = self.shared.load_contacts().await?;
        Ok(self.shared.fanout.dispatch_test(&contacts).await)
    }

    /// Acknowledge a finished session and return to idle.
    pub async fn dismiss(&self) -> Result<(), AlertError> {
        let mut session = self.shared.session.lock().await;
        if session.state.is_active() {
            let active = session.session_id.clone().unwrap_or_default();
            return Err(AlertError::SessionActive(active));
        }
        if session.state.is_terminal() {
            let session_id = session.session_id.clone().unwrap_or_default();
            session.reset();
            drop(session);
            self.shared.emit_idle(&session_id);
        }
        Ok(())
    }

    /// Wait for the current session task to finish.
    pub async fn settle(&self) {
        let handle = self.runner.lock().await.take().map(|runner| runner.handle);
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log_error!("alert session task failed to join: {}", err);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.cancel().await;
        let runner = self.runner.lock().await.take();
        if let Some(runner) = runner {
            runner.token.cancel();
            let _ = runner.handle.await;
        }
        self.shared.stop_alarm().await;
    }
}

impl Shared {
    fn emit(&self, event: AlertEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn emit_state(&self, session_id: &str) {
        let (state, status) = {
            let session = self.session.lock().await;
            (session.state, session.status_message.clone())
        };
        self.emit(AlertEvent::StateChanged {
            session_id: session_id.to_string(),
            state,
            status,
        });
    }

    fn emit_idle(&self, session_id: &str) {
        self.emit(AlertEvent::StateChanged {
            session_id: session_id.to_string(),
            state: AlertState::Idle,
            status: AlertSession::default().status_message,
        });
    }

    /// Sound the alarm and announce the countdown, unless the session already ended.
    async fn raise_alarm(&self, session_id: &str, trigger: AlertTrigger) {
        {
            let _gate = self.alarm_gate.lock().await;
            {
                let session = self.session.lock().await;
                if !session.is_current(session_id) || !session.state.is_active() {
                    return;
                }
            }
            fire_and_forget("alarm start", self.alarm.start_alarm()).await;
        }

        let (title, body) = match trigger {
            AlertTrigger::Motion(_) => (
                "Motion detected",
                "Unexpected motion detected. Your contacts will be alerted unless you cancel.",
            ),
            AlertTrigger::Manual => (
                "Emergency alert started",
                "Your contacts will be alerted unless you cancel.",
            ),
        };
        self.notify(title, body).await;
    }

    async fn stop_alarm(&self) {
        let _gate = self.alarm_gate.lock().await;
        fire_and_forget("alarm stop", self.alarm.stop_alarm()).await;
    }

    async fn notify(&self, title: &str, body: &str) {
        fire_and_forget("notification", self.alarm.notify(title, body)).await;
    }

    async fn load_contacts(&self) -> Result<Vec<EmergencyContact>, AlertError> {
        let timeout_ms = self.fanout.config().contacts_timeout_ms;
        match time::timeout(Duration::from_millis(timeout_ms), self.contacts.contacts()).await {
            Ok(Ok(contacts)) => Ok(contacts),
            Ok(Err(err)) => Err(AlertError::ContactsUnavailable(err.to_string())),
            Err(_) => Err(AlertError::ContactsUnavailable(
                BridgeError::Timeout(timeout_ms).to_string(),
            )),
        }
    }

    async fn contacts_for(&self, session_id: &str) -> Vec<EmergencyContact> {
        {
            let session = self.session.lock().await;
            if let Some(contacts) = session.contacts.as_ref() {
                return contacts.clone();
            }
        }

        // A failed lookup is not cached, so a redispatch asks the host again.
        let contacts = match self.load_contacts().await {
            Ok(contacts) => contacts,
            Err(err) => {
                log_error!("{}", err);
                return Vec::new();
            }
        };

        let mut session = self.session.lock().await;
        if session.is_current(session_id) {
            session.contacts = Some(contacts.clone());
        }
        contacts
    }
}

async fn fire_and_forget<F>(what: &str, call: F)
where
    F: Future<Output = Result<(), BridgeError>>,
{
    match time::timeout(Duration::from_millis(HOST_CALL_TIMEOUT_MS), call).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log_warn!("{} failed: {}", what, err),
        Err(_) => log_warn!("{} timed out after {}ms", what, HOST_CALL_TIMEOUT_MS),
    }
}

async fn run_session(shared: Arc<Shared>, session_id: String, token: CancellationToken) {
    if !run_countdown(&shared, &session_id, &token).await {
        return;
    }
    let Some(evidence) = run_capture(&shared, &session_id, &token).await else {
        return;
    };
    run_dispatch(&shared, &session_id, &token, evidence).await;
}

/// Returns true once the session has moved to `Capturing`.
async fn run_countdown(shared: &Shared, session_id: &str, token: &CancellationToken) -> bool {
    let period = Duration::from_secs(1);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = ticker.tick() => {}
        }

        let ready = any_ready(&shared.cameras);
        let step = {
            let mut session = shared.session.lock().await;
            // A cancel that won the lock ends the countdown here.
            if !session.is_current(session_id) || session.state != AlertState::CountdownActive {
                return false;
            }
            session.tick(ready, &shared.config)
        };

        match step {
            CountdownStep::Remaining(remaining) => shared.emit(AlertEvent::CountdownTick {
                session_id: session_id.to_string(),
                remaining,
            }),
            CountdownStep::Extended {
                remaining,
                extensions,
            } => {
                log_info!(
                    "no camera ready, countdown extended to {}s ({} of {})",
                    remaining,
                    extensions,
                    shared.config.max_extensions
                );
                shared.emit(AlertEvent::CountdownExtended {
                    session_id: session_id.to_string(),
                    remaining,
                    extensions,
                });
            }
            CountdownStep::Capture => {
                if !ready {
                    log_warn!("countdown extensions exhausted, capturing without a ready camera");
                }
                shared.emit_state(session_id).await;
                return true;
            }
        }
    }
}

async fn run_capture(
    shared: &Shared,
    session_id: &str,
    token: &CancellationToken,
) -> Option<CaptureResult> {
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return None,
            result = shared.capture.capture(&shared.cameras) => result,
        };

        let mut session = shared.session.lock().await;
        if !session.is_current(session_id) || session.state != AlertState::Capturing {
            return None;
        }

        let error = match result {
            Ok(evidence) => {
                session.capture_succeeded(evidence.clone());
                drop(session);
                shared.emit_state(session_id).await;
                return Some(evidence);
            }
            Err(err) => err,
        };

        let retry = session.capture_failed(error.to_string(), &shared.config);
        let attempt = session.capture_attempts;
        drop(session);

        log_warn!("capture attempt {} for {} failed: {}", attempt, session_id, error);
        shared.metrics.record_capture_failure().await;
        shared.emit(AlertEvent::CaptureFailed {
            session_id: session_id.to_string(),
            attempt,
            error: error.to_string(),
        });

        if !retry {
            finish_failed(shared, session_id, error.to_string()).await;
            return None;
        }

        tokio::select! {
            _ = token.cancelled() => return None,
            _ = time::sleep(Duration::from_millis(shared.config.capture_backoff_ms)) => {}
        }

        let mut session = shared.session.lock().await;
        if !session.is_current(session_id) || session.state != AlertState::Capturing {
            return None;
        }
        session.retry_capture();
    }
}

async fn run_dispatch(
    shared: &Shared,
    session_id: &str,
    token: &CancellationToken,
    evidence: CaptureResult,
) {
    let report = tokio::select! {
        _ = token.cancelled() => return,
        report = async {
            let contacts = shared.contacts_for(session_id).await;
            shared.fanout.dispatch(&evidence, &contacts).await
        } => report,
    };

    let state = {
        let mut session = shared.session.lock().await;
        if !session.is_current(session_id) || session.state != AlertState::Dispatching {
            return;
        }
        session.dispatch_finished(report.clone());
        session.state
    };
    shared.emit_state(session_id).await;

    if state != AlertState::Resolved {
        finish_failed(shared, session_id, AlertError::AllChannelsFailed.to_string()).await;
        return;
    }

    let reached = report.succeeded_contacts();
    log_info!("alert session {} resolved, {} contact(s) reached", session_id, reached);
    shared.metrics.record_session(SessionOutcome::Resolved).await;
    shared.stop_alarm().await;
    join_all(
        report
            .contacts
            .iter()
            .filter(|contact| contact.success)
            .map(|contact| {
                let body = format!("{} was informed about the alert.", contact.contact_name);
                async move { shared.notify("Emergency contact notified", &body).await }
            }),
    )
    .await;
    shared
        .notify(
            "Emergency alert sent",
            &format!("Your emergency alert was delivered to {reached} contact(s)."),
        )
        .await;
    shared.emit(AlertEvent::Resolved {
        session_id: session_id.to_string(),
        report,
    });

    tokio::select! {
        _ = token.cancelled() => return,
        _ = time::sleep(Duration::from_millis(shared.config.resolved_display_ms)) => {}
    }

    let mut session = shared.session.lock().await;
    if session.is_current(session_id) && session.state == AlertState::Resolved {
        session.reset();
        drop(session);
        shared.emit_idle(session_id);
    }
}

async fn finish_failed(shared: &Shared, session_id: &str, error: String) {
    log_error!("alert session {} failed: {}", session_id, error);
    shared.metrics.record_session(SessionOutcome::Failed).await;
    shared.stop_alarm().await;
    shared.emit_state(session_id).await;

    let status = shared.session.lock().await.status_message.clone();
    shared.notify("Emergency alert failed", &status).await;
    shared.emit(AlertEvent::Failed {
        session_id: session_id.to_string(),
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::bridge::sim::{LogAlarm, MemoryContacts, SimCamera, SimChannel};
    use crate::bridge::{Channel, OutboundMessage};
    use crate::capture::CaptureConfig;
    use crate::dispatch::{ChannelHandle, DispatchConfig};
    use crate::error::BridgeError;
    use crate::models::{ChannelKind, MediaKind};

    struct Harness {
        controller: AlertController,
        camera: Arc<SimCamera>,
        alarm: Arc<LogAlarm>,
        metrics: MetricsCollector,
    }

    fn anna() -> Arc<dyn ContactSource> {
        Arc::new(MemoryContacts::new(vec![
            EmergencyContact::new("anna", "Anna", "+4911").with_email("anna@example.org")
        ]))
    }

    fn controller(
        camera: &Arc<SimCamera>,
        channels: Vec<ChannelHandle>,
        contacts: Arc<dyn ContactSource>,
        alarm: Arc<dyn AlarmNotifier>,
        metrics: &MetricsCollector,
    ) -> AlertController {
        AlertController::new(
            AlertConfig::default(),
            AlertDeps {
                capture: CaptureCoordinator::new(CaptureConfig::default()),
                cameras: vec![Arc::clone(camera) as CameraHandle],
                fanout: DispatchFanout::new(DispatchConfig::default(), channels),
                contacts,
                alarm,
                metrics: metrics.clone(),
            },
        )
    }

    fn harness(camera: SimCamera, channels: Vec<ChannelHandle>) -> Harness {
        let camera = Arc::new(camera);
        let alarm = Arc::new(LogAlarm::new());
        let metrics = MetricsCollector::new();
        let controller = controller(
            &camera,
            channels,
            anna(),
            Arc::clone(&alarm) as Arc<dyn AlarmNotifier>,
            &metrics,
        );
        Harness {
            controller,
            camera,
            alarm,
            metrics,
        }
    }

    fn sms() -> Vec<ChannelHandle> {
        vec![Arc::new(SimChannel::reliable(ChannelKind::Sms)) as ChannelHandle]
    }

    /// Channel whose outcome can be flipped between dispatches.
    struct SwitchChannel {
        working: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Channel for SwitchChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Sms
        }

        async fn send(&self, _message: &OutboundMessage, _destination: &str) -> Result<(), BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.working.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BridgeError::Failed("carrier rejected".into()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_countdown_never_captures() {
        let h = harness(SimCamera::new("back").ready(), sms());
        h.controller.start(AlertTrigger::Manual).await.expect("start");

        time::sleep(Duration::from_millis(2_500)).await;
        assert!(h.alarm.is_sounding());
        assert_eq!(h.alarm.notifications()[0].0, "Emergency alert started");
        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::CountdownActive);
        assert!(snapshot.countdown_remaining > 0);

        assert!(h.controller.cancel().await);
        time::sleep(Duration::from_secs(20)).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::Cancelled);
        assert_eq!(h.camera.captures(), 0);
        assert!(!h.alarm.is_sounding());
        assert_eq!(h.metrics.get_snapshot().await.sessions.cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_extends_while_no_camera_is_ready() {
        let h = harness(SimCamera::new("back"), sms());
        let mut events = h.controller.subscribe();
        h.controller.start(AlertTrigger::Manual).await.expect("start");

        time::sleep(Duration::from_millis(5_500)).await;
        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::CountdownActive);
        assert_eq!(snapshot.countdown_remaining, 3);
        assert_eq!(snapshot.extensions_used, 1);

        let mut extended = false;
        while let Ok(event) = events.try_recv() {
            if let AlertEvent::CountdownExtended { remaining, .. } = event {
                assert_eq!(remaining, 3);
                extended = true;
            }
        }
        assert!(extended);

        h.camera.mark_ready();
        h.controller.settle().await;
        assert_eq!(h.controller.snapshot().await.state, AlertState::Idle);
        assert_eq!(h.camera.captures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failing_every_attempt_fails_the_session() {
        let h = harness(SimCamera::new("back").ready().failing(), sms());
        h.controller.start(AlertTrigger::Manual).await.expect("start");
        h.controller.settle().await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::Failed);
        assert_eq!(snapshot.capture_attempts, 3);
        assert!(snapshot.evidence.is_none());
        assert_eq!(h.camera.captures(), 3);
        assert!(!h.alarm.is_sounding());
        let titles: Vec<String> = h.alarm.notifications().into_iter().map(|(title, _)| title).collect();
        assert_eq!(titles, vec!["Emergency alert started", "Emergency alert failed"]);
        assert_eq!(
            h.controller.retry_dispatch().await.unwrap_err(),
            AlertError::NoEvidence
        );
    }

    #[tokio::test(start_paused = true)]
    async fn capture_recovers_after_a_retry() {
        let camera = SimCamera::new("back").ready();
        camera.fail_next(1);
        let h = harness(camera, sms());
        let mut events = h.controller.subscribe();
        h.controller.start(AlertTrigger::Manual).await.expect("start");

        let mut saw_failure = false;
        let mut resolved = None;
        while let Ok(event) = events.recv().await {
            match event {
                AlertEvent::CaptureFailed { attempt, .. } => {
                    assert_eq!(attempt, 1);
                    saw_failure = true;
                }
                AlertEvent::Resolved { report, .. } => {
                    resolved = Some(report);
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_failure);
        assert!(resolved.expect("resolved").success());
        assert_eq!(h.controller.snapshot().await.capture_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn redispatch_reuses_evidence() {
        let channel = Arc::new(SwitchChannel {
            working: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let h = harness(
            SimCamera::new("back").ready(),
            vec![Arc::clone(&channel) as ChannelHandle],
        );

        h.controller.start(AlertTrigger::Manual).await.expect("start");
        h.controller.settle().await;

        let failed = h.controller.snapshot().await;
        assert_eq!(failed.state, AlertState::Failed);
        assert_eq!(
            failed.last_error.as_deref(),
            Some("every channel failed for every contact")
        );
        let evidence = failed.evidence.clone().expect("evidence retained");

        channel.working.store(true, Ordering::SeqCst);
        h.controller.retry_dispatch().await.expect("retry");
        time::sleep(Duration::from_millis(500)).await;

        let resolved = h.controller.snapshot().await;
        assert_eq!(resolved.state, AlertState::Resolved);
        assert_eq!(resolved.evidence, Some(evidence));
        assert_eq!(h.camera.captures(), 1);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 2);

        h.controller.settle().await;
        assert_eq!(h.controller.snapshot().await.state, AlertState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_is_rejected_while_active() {
        let h = harness(SimCamera::new("back").ready(), sms());
        let first = h.controller.start(AlertTrigger::Manual).await.expect("start");

        match h.controller.start(AlertTrigger::Manual).await {
            Err(AlertError::SessionActive(active)) => assert_eq!(active, first),
            other => panic!("expected SessionActive, got {other:?}"),
        }
        assert_eq!(h.controller.dismiss().await, Err(AlertError::SessionActive(first)));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_session_returns_to_idle() {
        let h = harness(SimCamera::new("back").ready(), sms());
        let mut events = h.controller.subscribe();
        h.controller.start(AlertTrigger::Manual).await.expect("start");

        loop {
            if let AlertEvent::Resolved { .. } = events.recv().await.expect("event") {
                break;
            }
        }
        let resolved_at = Instant::now();
        assert_eq!(h.controller.snapshot().await.state, AlertState::Resolved);
        assert!(!h.alarm.is_sounding());
        let notifications = h.alarm.notifications();
        assert_eq!(notifications.len(), 3);
        assert_eq!(notifications[1].0, "Emergency contact notified");
        assert!(notifications[1].1.starts_with("Anna"));
        assert_eq!(notifications[2].0, "Emergency alert sent");

        h.controller.settle().await;
        assert!(resolved_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(h.controller.snapshot().await.state, AlertState::Idle);
        assert_eq!(h.metrics.get_snapshot().await.sessions.resolved, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_clears_a_cancelled_session() {
        let h = harness(SimCamera::new("back").ready(), sms());
        h.controller.start(AlertTrigger::Manual).await.expect("start");
        h.controller.cancel().await;

        h.controller.dismiss().await.expect("dismiss");
        assert_eq!(h.controller.snapshot().await.state, AlertState::Idle);
        assert!(!h.controller.cancel().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_capturing_discards_the_evidence() {
        let h = harness(
            SimCamera::new("back")
                .ready()
                .with_capture_delay(Duration::from_secs(4)),
            sms(),
        );
        h.controller.start(AlertTrigger::Manual).await.expect("start");

        time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(h.controller.snapshot().await.state, AlertState::Capturing);
        assert_eq!(h.camera.captures(), 1);

        assert!(h.controller.cancel().await);
        time::sleep(Duration::from_secs(60)).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::Cancelled);
        assert!(snapshot.evidence.is_none());
        assert!(snapshot.report.is_none());
        assert!(!h.alarm.is_sounding());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_dispatching_discards_the_report() {
        let channel = Arc::new(
            SimChannel::reliable(ChannelKind::Sms).with_latency(Duration::from_secs(5)),
        );
        let h = harness(
            SimCamera::new("back").ready(),
            vec![Arc::clone(&channel) as ChannelHandle],
        );
        let mut events = h.controller.subscribe();
        h.controller.start(AlertTrigger::Manual).await.expect("start");

        time::sleep(Duration::from_millis(7_000)).await;
        assert_eq!(h.controller.snapshot().await.state, AlertState::Dispatching);

        assert!(h.controller.cancel().await);
        time::sleep(Duration::from_secs(60)).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::Cancelled);
        assert!(snapshot.report.is_none());
        assert_eq!(h.metrics.get_snapshot().await.sessions.resolved, 0);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, AlertEvent::Resolved { .. }));
        }
    }

    /// Host collaborator that never answers.
    struct Unresponsive;

    #[async_trait]
    impl AlarmNotifier for Unresponsive {
        async fn start_alarm(&self) -> Result<(), BridgeError> {
            futures::future::pending().await
        }

        async fn stop_alarm(&self) -> Result<(), BridgeError> {
            futures::future::pending().await
        }

        async fn notify(&self, _title: &str, _body: &str) -> Result<(), BridgeError> {
            futures::future::pending().await
        }
    }

    #[async_trait]
    impl ContactSource for Unresponsive {
        async fn contacts(&self) -> Result<Vec<EmergencyContact>, BridgeError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_alarm_does_not_block_the_session() {
        let camera = Arc::new(SimCamera::new("back").ready());
        let metrics = MetricsCollector::new();
        let controller = controller(&camera, sms(), anna(), Arc::new(Unresponsive), &metrics);

        time::timeout(Duration::from_millis(10), controller.start(AlertTrigger::Manual))
            .await
            .expect("start returns without waiting for the alarm")
            .expect("start");

        controller.settle().await;
        assert_eq!(controller.snapshot().await.state, AlertState::Idle);
        assert_eq!(metrics.get_snapshot().await.sessions.resolved, 1);

        controller.start(AlertTrigger::Manual).await.expect("start");
        assert!(time::timeout(Duration::from_secs(10), controller.cancel())
            .await
            .expect("cancel is bounded"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_contact_lookup_fails_the_session() {
        let camera = Arc::new(SimCamera::new("back").ready());
        let alarm = Arc::new(LogAlarm::new());
        let metrics = MetricsCollector::new();
        let controller = controller(
            &camera,
            sms(),
            Arc::new(Unresponsive),
            Arc::clone(&alarm) as Arc<dyn AlarmNotifier>,
            &metrics,
        );

        controller.start(AlertTrigger::Manual).await.expect("start");
        time::sleep(Duration::from_secs(3_600)).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::Failed);
        assert!(snapshot.evidence.is_some());
        assert!(!alarm.is_sounding());
        assert!(matches!(
            controller.send_test().await,
            Err(AlertError::ContactsUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_video_is_announced_as_video() {
        let channel = Arc::new(SimChannel::reliable(ChannelKind::Sms));
        let h = harness(
            SimCamera::new("back").ready().recording(3_000),
            vec![Arc::clone(&channel) as ChannelHandle],
        );
        h.controller.start(AlertTrigger::Manual).await.expect("start");
        time::sleep(Duration::from_secs(10)).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state, AlertState::Resolved);
        let evidence = snapshot.evidence.expect("evidence");
        assert_eq!(evidence.primary().expect("primary").kind, MediaKind::Video);

        match &channel.sent()[0].1 {
            OutboundMessage::Text(text) => assert!(text.contains("Security video was taken")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_leaves_the_session_alone() {
        let channel = Arc::new(SimChannel::reliable(ChannelKind::Sms));
        let h = harness(
            SimCamera::new("back").ready(),
            vec![Arc::clone(&channel) as ChannelHandle],
        );

        let report = h.controller.send_test().await.expect("contacts");
        assert!(report.success());
        assert_eq!(h.controller.snapshot().await.state, AlertState::Idle);
        assert_eq!(h.camera.captures(), 0);
        assert!(!h.alarm.is_sounding());
        match &channel.sent()[0].1 {
            OutboundMessage::Text(text) => assert!(text.starts_with("[TEST] ")),
            other => panic!("unexpected message {other:?}"),
        }
    }
}

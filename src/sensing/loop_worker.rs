use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertController, AlertTrigger};
use crate::error::AlertError;
use crate::metrics::MetricsCollector;
use crate::models::{MotionEvent, MotionTelemetry, PocketState, SensorSample};

use super::classifier::SampleClassifier;
use super::pocket::PocketHeuristic;
use super::profile::{Sensitivity, SensitivityProfile};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const POCKET_TICK_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorCommand {
    SetArmed(bool),
    /// Let the pocket state drive arming.
    SetAutoMode(bool),
    SetSensitivity(Sensitivity),
    Light { lux: f64 },
    /// Treat the current instant as an accepted motion event.
    SimulateMotion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    /// Monitoring switched on in settings. Auto mode never arms a disabled monitor.
    pub enabled: bool,
    pub armed: bool,
    pub auto_mode: bool,
    pub pocket: PocketState,
    pub sensitivity: Sensitivity,
    pub last_sample_ms: Option<u64>,
    pub samples_seen: u64,
    pub motion_events: u64,
}

/// Sensor-clock estimate: the last sample's timestamp advanced by the time since it arrived.
struct SampleClock {
    anchor_ms: u64,
    anchor: Instant,
}

impl SampleClock {
    fn new() -> Self {
        Self {
            anchor_ms: 0,
            anchor: Instant::now(),
        }
    }

    fn observe(&mut self, timestamp_ms: u64) {
        self.anchor_ms = timestamp_ms;
        self.anchor = Instant::now();
    }

    fn now_ms(&self) -> u64 {
        self.anchor_ms
            .saturating_add(self.anchor.elapsed().as_millis() as u64)
    }
}

pub(crate) struct MonitorLoop {
    pub classifier: SampleClassifier,
    pub pocket: PocketHeuristic,
    pub enabled: bool,
    pub armed: bool,
    pub auto_mode: bool,
    pub debug_samples: bool,
    pub alerts: AlertController,
    pub metrics: MetricsCollector,
    pub status_tx: watch::Sender<MonitorStatus>,
}

pub(crate) async fn monitoring_loop(
    mut state: MonitorLoop,
    mut samples: mpsc::Receiver<SensorSample>,
    mut commands: mpsc::Receiver<MonitorCommand>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(POCKET_TICK_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let telemetry = state.classifier.telemetry();
    let mut clock = SampleClock::new();
    let mut samples_open = true;

    state.publish(|status| status.running = true);
    log_info!(
        "monitoring loop started (armed: {}, auto: {})",
        state.armed,
        state.auto_mode
    );

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("monitoring loop shutting down");
                break;
            }
            sample = samples.recv(), if samples_open => match sample {
                Some(sample) => {
                    clock.observe(sample.timestamp_ms);
                    state.on_sample(sample).await;
                    let latest = *telemetry.borrow();
                    state.metrics.record_sample(latest).await;
                }
                None => {
                    log_warn!("sensor stream closed");
                    samples_open = false;
                }
            },
            command = commands.recv() => match command {
                Some(command) => state.on_command(command, clock.now_ms()).await,
                None => {
                    log_info!("monitor handle dropped, stopping loop");
                    break;
                }
            },
            _ = ticker.tick() => state.on_pocket_tick(clock.now_ms()).await,
        }
    }

    state.publish(|status| status.running = false);
}

impl MonitorLoop {
    fn auto_arming(&self) -> bool {
        self.auto_mode && self.enabled
    }

    fn publish(&self, update: impl FnOnce(&mut MonitorStatus)) {
        self.status_tx.send_modify(|status| {
            status.enabled = self.enabled;
            status.armed = self.armed;
            status.auto_mode = self.auto_mode;
            status.pocket = self.pocket.state();
            status.sensitivity = self.classifier.profile().sensitivity;
            update(status);
        });
    }

    async fn on_sample(&mut self, sample: SensorSample) {
        if self.debug_samples {
            log_debug!(
                "sample at {}ms: ({:.2}, {:.2}, {:.2}) |a|={:.2}",
                sample.timestamp_ms,
                sample.x,
                sample.y,
                sample.z,
                sample.magnitude()
            );
        }

        self.pocket.record_sample(sample.timestamp_ms);
        let event = self.classifier.ingest(sample);

        self.publish(|status| {
            status.samples_seen += 1;
            status.last_sample_ms = Some(sample.timestamp_ms);
        });

        if let Some(event) = event {
            self.on_motion(event).await;
        }
    }

    async fn on_motion(&mut self, event: MotionEvent) {
        self.pocket.record_motion(event.timestamp_ms);
        self.metrics.record_motion().await;
        self.publish(|status| status.motion_events += 1);

        if !self.armed {
            log_info!("motion at {}ms ignored, monitoring disarmed", event.timestamp_ms);
            return;
        }

        match self.alerts.start(AlertTrigger::Motion(event)).await {
            Ok(session_id) => log_info!("motion at {}ms started alert {}", event.timestamp_ms, session_id),
            Err(AlertError::SessionActive(active)) => {
                log_info!("motion at {}ms dropped, alert {} already active", event.timestamp_ms, active);
                self.metrics.record_dropped_trigger().await;
            }
            Err(err) => log_error!("could not start alert: {}", err),
        }
    }

    async fn on_command(&mut self, command: MonitorCommand, now_ms: u64) {
        match command {
            MonitorCommand::SetArmed(armed) => {
                if armed != self.armed {
                    log_info!("monitoring {}", if armed { "armed" } else { "disarmed" });
                }
                self.armed = armed;
            }
            MonitorCommand::SetAutoMode(on) => {
                self.auto_mode = on;
                if self.auto_arming() {
                    self.armed = self.pocket.state().in_pocket;
                }
                log_info!("auto mode {} (armed: {})", on, self.armed);
            }
            MonitorCommand::SetSensitivity(sensitivity) => {
                self.classifier
                    .set_profile(SensitivityProfile::for_level(sensitivity));
            }
            MonitorCommand::Light { lux } => {
                self.pocket.record_light(lux, now_ms);
            }
            MonitorCommand::SimulateMotion => {
                let telemetry: MotionTelemetry = *self.classifier.telemetry().borrow();
                let event = MotionEvent {
                    timestamp_ms: now_ms,
                    peak_magnitude: telemetry.magnitude,
                    mean_magnitude: telemetry.magnitude,
                    stddev: 0.0,
                };
                log_info!("simulated motion at {}ms", now_ms);
                self.on_motion(event).await;
            }
        }
        self.publish(|_| {});
    }

    async fn on_pocket_tick(&mut self, now_ms: u64) {
        let Some(change) = self.pocket.tick(now_ms) else {
            return;
        };

        log_info!(
            "pocket state -> {} ({:?} signal) at {}ms",
            if change.state.in_pocket { "stowed" } else { "exposed" },
            change.signal,
            now_ms
        );
        self.metrics.record_pocket_transition().await;

        if self.auto_arming() && self.armed != change.state.in_pocket {
            self.armed = change.state.in_pocket;
            log_info!("auto mode {} monitoring", if self.armed { "armed" } else { "disarmed" });
        }
        self.publish(|_| {});
    }
}

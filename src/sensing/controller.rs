use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertController;
use crate::bridge::SensorSource;
use crate::error::MonitorError;
use crate::metrics::MetricsCollector;

use super::classifier::{ClassifierConfig, SampleClassifier};
use super::loop_worker::{monitoring_loop, MonitorCommand, MonitorLoop, MonitorStatus};
use super::pocket::{PocketConfig, PocketHeuristic};
use super::profile::{Sensitivity, SensitivityProfile};

use log::{error, info};

const SAMPLE_QUEUE: usize = 256;
const COMMAND_QUEUE: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub auto_mode: bool,
    pub sensitivity: Sensitivity,
    pub sensor_rate_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_mode: false,
            sensitivity: Sensitivity::Medium,
            sensor_rate_ms: 100,
        }
    }
}

/// Everything the monitoring loop is configured with.
#[derive(Debug, Clone, Default)]
pub struct MonitorSetup {
    pub monitoring: MonitoringConfig,
    pub classifier: ClassifierConfig,
    pub pocket: PocketConfig,
    pub debug_samples: bool,
}

/// Cheap handle for talking to a running loop.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    status: watch::Receiver<MonitorStatus>,
}

impl MonitorHandle {
    pub async fn send(&self, command: MonitorCommand) -> Result<(), MonitorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MonitorError::NotRunning)
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }
}

pub struct SensingController {
    sensor: Arc<dyn SensorSource>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    monitor: Option<MonitorHandle>,
}

impl SensingController {
    pub fn new(sensor: Arc<dyn SensorSource>) -> Self {
        Self {
            sensor,
            handle: None,
            cancel_token: None,
            monitor: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn monitor(&self) -> Option<MonitorHandle> {
        self.monitor.clone()
    }

    /// Register with the sensor and spawn the monitoring loop. A refused sensor permission is
    /// returned as `MonitorError::PermissionDenied` and nothing is spawned.
    pub async fn start_monitoring(
        &mut self,
        setup: MonitorSetup,
        alerts: AlertController,
        metrics: MetricsCollector,
    ) -> Result<MonitorHandle, MonitorError> {
        if self.handle.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE);
        self.sensor.set_rate(setup.monitoring.sensor_rate_ms);
        self.sensor.register(sample_tx)?;

        let armed = setup.monitoring.enabled && !setup.monitoring.auto_mode;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (status_tx, status_rx) = watch::channel(MonitorStatus {
            running: true,
            enabled: setup.monitoring.enabled,
            armed,
            auto_mode: setup.monitoring.auto_mode,
            sensitivity: setup.monitoring.sensitivity,
            ..MonitorStatus::default()
        });

        let profile = SensitivityProfile::for_level(setup.monitoring.sensitivity);
        let state = MonitorLoop {
            classifier: SampleClassifier::new(setup.classifier, profile),
            pocket: PocketHeuristic::new(setup.pocket),
            enabled: setup.monitoring.enabled,
            armed,
            auto_mode: setup.monitoring.auto_mode,
            debug_samples: setup.debug_samples,
            alerts,
            metrics,
            status_tx,
        };

        info!(
            "starting monitoring at {}ms/sample, {:?} sensitivity",
            setup.monitoring.sensor_rate_ms, setup.monitoring.sensitivity
        );

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(monitoring_loop(
            state,
            sample_rx,
            command_rx,
            cancel_token.clone(),
        ));

        let monitor = MonitorHandle {
            commands: command_tx,
            status: status_rx,
        };
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.monitor = Some(monitor.clone());
        Ok(monitor)
    }

    /// Stop the loop and release the sensor. Safe to call when not running.
    pub async fn stop_monitoring(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.sensor.unregister();
        self.monitor = None;

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!("monitoring loop task failed to join: {err}");
            }
        }
    }
}

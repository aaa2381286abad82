use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::alert::{AlertController, AlertDeps, AlertTrigger};
use crate::background::{BackgroundScheduler, TickResult};
use crate::bridge::{
    AlarmNotifier, BackgroundHost, ContactSource, LightSensor, MediaStore, SensorSource,
};
use crate::capture::{CameraHandle, CaptureCoordinator};
use crate::dispatch::{ChannelHandle, DispatchFanout};
use crate::error::{AlertError, MonitorError, SchedulerError};
use crate::metrics::MetricsCollector;
use crate::models::DispatchReport;
use crate::sensing::{MonitorHandle, MonitorSetup, SensingController};
use crate::settings::GuardianSettings;

/// Host-side collaborators the guardian is wired to.
pub struct Bridge {
    pub sensor: Arc<dyn SensorSource>,
    pub cameras: Vec<CameraHandle>,
    pub channels: Vec<ChannelHandle>,
    pub contacts: Arc<dyn ContactSource>,
    pub alarm: Arc<dyn AlarmNotifier>,
    pub media_store: Option<Arc<dyn MediaStore>>,
    pub light: Option<Arc<dyn LightSensor>>,
    pub background: Arc<dyn BackgroundHost>,
}

/// The whole pipeline behind one owner: monitoring loop, alert sessions, background scheduler
/// and metrics.
pub struct Guardian {
    settings: GuardianSettings,
    debug_samples: bool,
    sensing: Mutex<SensingController>,
    alerts: AlertController,
    scheduler: BackgroundScheduler,
    metrics: MetricsCollector,
}

impl Guardian {
    pub fn new(settings: GuardianSettings, bridge: Bridge) -> Self {
        let metrics = MetricsCollector::new();

        let mut capture = CaptureCoordinator::new(settings.capture.clone());
        if let Some(store) = bridge.media_store {
            capture = capture.with_store(store);
        }

        let alerts = AlertController::new(
            settings.alert.clone(),
            AlertDeps {
                capture,
                cameras: bridge.cameras,
                fanout: DispatchFanout::new(settings.dispatch.clone(), bridge.channels),
                contacts: bridge.contacts,
                alarm: bridge.alarm,
                metrics: metrics.clone(),
            },
        );

        let mut scheduler = BackgroundScheduler::new(
            bridge.background,
            Duration::from_secs(settings.background.interval_secs),
        );
        if let Some(light) = bridge.light {
            scheduler = scheduler.with_light_sensor(light);
        }

        Self {
            settings,
            debug_samples: false,
            sensing: Mutex::new(SensingController::new(bridge.sensor)),
            alerts,
            scheduler,
            metrics,
        }
    }

    pub fn with_debug_samples(mut self, enabled: bool) -> Self {
        self.debug_samples = enabled;
        self
    }

    pub fn settings(&self) -> &GuardianSettings {
        &self.settings
    }

    pub fn alerts(&self) -> &AlertController {
        &self.alerts
    }

    pub fn scheduler(&self) -> &BackgroundScheduler {
        &self.scheduler
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn monitor(&self) -> Option<MonitorHandle> {
        self.sensing.lock().await.monitor()
    }

    pub async fn start_monitoring(&self) -> Result<MonitorHandle, MonitorError> {
        let setup = MonitorSetup {
            monitoring: self.settings.monitoring.clone(),
            classifier: self.settings.classifier.clone(),
            pocket: self.settings.pocket.clone(),
            debug_samples: self.debug_samples,
        };

        let handle = self
            .sensing
            .lock()
            .await
            .start_monitoring(setup, self.alerts.clone(), self.metrics.clone())
            .await?;
        self.scheduler.attach(handle.clone()).await;
        Ok(handle)
    }

    pub async fn stop_monitoring(&self) {
        self.scheduler.detach().await;
        self.sensing.lock().await.stop_monitoring().await;
    }

    /// Register background execution when enabled. Unavailability is not fatal: the guardian
    /// keeps running in the foreground and reports it through the scheduler status.
    pub async fn register_background(&self) -> Result<(), SchedulerError> {
        if !self.settings.background.enabled {
            info!("background execution disabled in settings");
            return Ok(());
        }
        match self.scheduler.register().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("staying foreground-only: {err}");
                Err(err)
            }
        }
    }

    pub async fn background_tick(&self, now: DateTime<Utc>) -> TickResult {
        self.scheduler.on_tick(now).await
    }

    /// Start an alert without a motion event, e.g. from a panic button.
    pub async fn trigger_manual(&self) -> Result<String, AlertError> {
        self.alerts.start(AlertTrigger::Manual).await
    }

    /// Check the delivery path with a message marked as a test. No session is started and
    /// nothing is captured.
    pub async fn test_dispatch(&self) -> Result<DispatchReport, AlertError> {
        self.alerts.send_test().await
    }

    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        self.alerts.shutdown().await;
    }
}

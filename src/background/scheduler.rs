//! Periodic re-arming while the host may suspend the process.
//!
//! The host's background facility calls [`BackgroundScheduler::on_tick`] whenever it sees fit,
//! possibly never. Each tick is cheap and idempotent: refresh the light input, decide whether
//! monitoring should be armed, report what changed.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{self, Duration};

use crate::bridge::{BackgroundHost, HostAvailability, LightSensor};
use crate::error::{BridgeError, SchedulerError};
use crate::sensing::{MonitorCommand, MonitorHandle};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const BACKGROUND_TASK: &str = "background-motion-detection";

const MIN_INTERVAL_SECS: u64 = 15;
const THROTTLE_FACTOR: i64 = 4;
const LIGHT_READ_TIMEOUT_MS: u64 = 2_000;
const HOST_CALL_TIMEOUT_MS: u64 = 2_000;

async fn host_call<T>(call: impl Future<Output = T>) -> Result<T, BridgeError> {
    time::timeout(Duration::from_millis(HOST_CALL_TIMEOUT_MS), call)
        .await
        .map_err(|_| BridgeError::Timeout(HOST_CALL_TIMEOUT_MS))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FetchResult {
    NewData,
    NoData,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerMode {
    Background,
    ForegroundOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TickResult {
    pub fetch: FetchResult,
    /// Armed decision after this tick, when a monitor could be consulted.
    pub armed: Option<bool>,
    pub light_refreshed: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub available: bool,
    pub registered: bool,
    pub mode: SchedulerMode,
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub throttled: bool,
    pub interval_secs: u64,
}

#[derive(Default)]
struct SchedulerState {
    registered: bool,
    registered_at: Option<DateTime<Utc>>,
    ticks: u64,
    last_tick: Option<DateTime<Utc>>,
}

pub struct BackgroundScheduler {
    host: Arc<dyn BackgroundHost>,
    light: Option<Arc<dyn LightSensor>>,
    monitor: Mutex<Option<MonitorHandle>>,
    interval: Duration,
    state: Mutex<SchedulerState>,
}

impl BackgroundScheduler {
    /// `interval` is clamped to the platform minimum of 15 s.
    pub fn new(host: Arc<dyn BackgroundHost>, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_secs(MIN_INTERVAL_SECS));
        Self {
            host,
            light: None,
            monitor: Mutex::new(None),
            interval,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn with_light_sensor(mut self, light: Arc<dyn LightSensor>) -> Self {
        self.light = Some(light);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn attach(&self, monitor: MonitorHandle) {
        *self.monitor.lock().await = Some(monitor);
    }

    pub async fn detach(&self) {
        self.monitor.lock().await.take();
    }

    /// Register the periodic task. Already registered counts as success.
    pub async fn register(&self) -> Result<(), SchedulerError> {
        match host_call(self.host.availability()).await? {
            HostAvailability::Available => {}
            other => {
                log_warn!("background execution {:?}, running foreground-only", other);
                return Err(SchedulerError::SchedulerUnavailable(format!("{other:?}")));
            }
        }

        let registered = host_call(self.host.is_registered(BACKGROUND_TASK))
            .await
            .unwrap_or(false);
        if !registered {
            host_call(self.host.register(BACKGROUND_TASK, self.interval)).await??;
            log_info!(
                "registered {} every {}s",
                BACKGROUND_TASK,
                self.interval.as_secs()
            );
        }

        let mut state = self.state.lock().await;
        if !state.registered {
            state.registered = true;
            state.registered_at = Some(Utc::now());
        }
        Ok(())
    }

    pub async fn deregister(&self) -> Result<(), SchedulerError> {
        host_call(self.host.unregister(BACKGROUND_TASK)).await??;
        let mut state = self.state.lock().await;
        state.registered = false;
        state.registered_at = None;
        log_info!("deregistered {}", BACKGROUND_TASK);
        Ok(())
    }

    pub async fn on_tick(&self, now: DateTime<Utc>) -> TickResult {
        {
            let mut state = self.state.lock().await;
            state.ticks += 1;
            state.last_tick = Some(now);
        }

        let monitor = self.monitor.lock().await.clone();
        let Some(monitor) = monitor else {
            return TickResult {
                fetch: FetchResult::NoData,
                armed: None,
                light_refreshed: false,
                at: now,
            };
        };

        let status = monitor.status();
        if !status.running {
            log_warn!("background tick while monitoring is stopped");
            return TickResult {
                fetch: FetchResult::Failed,
                armed: None,
                light_refreshed: false,
                at: now,
            };
        }

        let light_refreshed = self.refresh_light(&monitor).await;

        let mut fetch = if light_refreshed {
            FetchResult::NewData
        } else {
            FetchResult::NoData
        };

        let armed = if status.auto_mode && status.enabled {
            status.pocket.in_pocket
        } else {
            status.armed
        };
        if armed != status.armed {
            match monitor.send(MonitorCommand::SetArmed(armed)).await {
                Ok(()) => {
                    log_info!("background tick re-armed monitoring: {}", armed);
                    fetch = FetchResult::NewData;
                }
                Err(err) => {
                    log_warn!("could not update armed state: {}", err);
                    fetch = FetchResult::Failed;
                }
            }
        }

        TickResult {
            fetch,
            armed: Some(armed),
            light_refreshed,
            at: now,
        }
    }

    async fn refresh_light(&self, monitor: &MonitorHandle) -> bool {
        let Some(light) = &self.light else {
            return false;
        };

        let read = time::timeout(
            Duration::from_millis(LIGHT_READ_TIMEOUT_MS),
            light.read_lux(),
        )
        .await;
        match read {
            Ok(Ok(lux)) => monitor.send(MonitorCommand::Light { lux }).await.is_ok(),
            Ok(Err(err)) => {
                log_warn!("light read failed: {}", err);
                false
            }
            Err(_) => {
                log_warn!("light read timed out after {}ms", LIGHT_READ_TIMEOUT_MS);
                false
            }
        }
    }

    pub async fn get_status(&self) -> SchedulerStatus {
        self.status_at(Utc::now()).await
    }

    pub async fn status_at(&self, now: DateTime<Utc>) -> SchedulerStatus {
        let available = matches!(
            host_call(self.host.availability()).await,
            Ok(HostAvailability::Available)
        );
        let state = self.state.lock().await;

        let window = chrono::Duration::seconds(self.interval.as_secs() as i64 * THROTTLE_FACTOR);
        let throttled = state.registered
            && state
                .last_tick
                .or(state.registered_at)
                .map(|since| now - since > window)
                .unwrap_or(false);

        let mode = if available && state.registered && !throttled {
            SchedulerMode::Background
        } else {
            SchedulerMode::ForegroundOnly
        };

        SchedulerStatus {
            available,
            registered: state.registered,
            mode,
            ticks: state.ticks,
            last_tick: state.last_tick,
            throttled,
            interval_secs: self.interval.as_secs(),
        }
    }
}

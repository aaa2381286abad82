use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration, Instant};

use crate::bridge::{Camera, MediaStore};
use crate::error::{BridgeError, CaptureError};
use crate::models::{CaptureResult, MediaRef};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub type CameraHandle = Arc<dyn Camera>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    pub readiness_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Once one device is ready, how long the others still get.
    pub companion_grace_ms: u64,
    pub capture_timeout_ms: u64,
    /// Upper bound for each gallery write. Storage is best-effort.
    pub persist_timeout_ms: u64,
    /// Device whose media becomes the primary evidence when it produced any.
    pub preferred_primary: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 5_000,
            poll_interval_ms: 200,
            companion_grace_ms: 1_000,
            capture_timeout_ms: 10_000,
            persist_timeout_ms: 2_000,
            preferred_primary: "back".into(),
        }
    }
}

pub fn any_ready(devices: &[CameraHandle]) -> bool {
    devices.iter().any(|device| device.is_ready())
}

pub struct CaptureCoordinator {
    config: CaptureConfig,
    store: Option<Arc<dyn MediaStore>>,
}

impl CaptureCoordinator {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MediaStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Capture from every device that becomes ready in time, concurrently.
    ///
    /// Succeeds when at least one device produced media. Individual device failures and timeouts
    /// are collected and only surface when every device failed.
    pub async fn capture(&self, devices: &[CameraHandle]) -> Result<CaptureResult, CaptureError> {
        let ready = self.wait_for_ready(devices).await;
        if ready.is_empty() {
            log_warn!(
                "no camera ready after {}ms ({} known)",
                self.config.readiness_timeout_ms,
                devices.len()
            );
            return Err(CaptureError::NoDeviceReady {
                waited_ms: self.config.readiness_timeout_ms,
            });
        }

        let ids: Vec<String> = ready.iter().map(|device| device.id().to_string()).collect();
        let timeout_ms = self.config.capture_timeout_ms;
        log_info!("capturing from {}", ids.join(", "));

        let tasks = ready.into_iter().map(|device| {
            tokio::spawn(async move {
                match time::timeout(Duration::from_millis(timeout_ms), device.capture()).await {
                    Ok(result) => result,
                    Err(_) => Err(BridgeError::Timeout(timeout_ms)),
                }
            })
        });
        let joined = join_all(tasks).await;

        let mut per_device = BTreeMap::new();
        let mut errors = Vec::new();
        for (id, outcome) in ids.iter().zip(joined) {
            match outcome {
                Ok(Ok(media)) => {
                    per_device.insert(id.clone(), media);
                }
                Ok(Err(err)) => {
                    log_warn!("capture on {} failed: {}", id, err);
                    errors.push((id.clone(), err));
                }
                Err(join_err) => {
                    log_warn!("capture task for {} aborted: {}", id, join_err);
                    errors.push((
                        id.clone(),
                        BridgeError::Failed(format!("capture task aborted: {join_err}")),
                    ));
                }
            }
        }

        if per_device.is_empty() {
            return Err(CaptureError::AllCapturesFailed {
                attempted: ids.len(),
                errors,
            });
        }

        self.persist_all(&per_device).await;

        let primary_device = if per_device.contains_key(&self.config.preferred_primary) {
            self.config.preferred_primary.clone()
        } else {
            ids.iter()
                .find(|id| per_device.contains_key(*id))
                .cloned()
                .unwrap_or_default()
        };

        log_info!(
            "captured {} of {} device(s), primary {}",
            per_device.len(),
            ids.len(),
            primary_device
        );

        Ok(CaptureResult {
            per_device,
            primary_device,
            timestamp: Utc::now(),
        })
    }

    async fn wait_for_ready(&self, devices: &[CameraHandle]) -> Vec<CameraHandle> {
        if devices.is_empty() {
            return Vec::new();
        }

        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(self.config.readiness_timeout_ms);
        let grace = Duration::from_millis(self.config.companion_grace_ms);
        let mut companion_deadline: Option<Instant> = None;

        loop {
            let ready: Vec<CameraHandle> = devices
                .iter()
                .filter(|device| device.is_ready())
                .cloned()
                .collect();
            if ready.len() == devices.len() {
                return ready;
            }

            let now = Instant::now();
            if !ready.is_empty() {
                let companion = *companion_deadline.get_or_insert(now + grace);
                if now >= companion {
                    return ready;
                }
            }
            if now >= deadline {
                return ready;
            }

            time::sleep(poll).await;
        }
    }

    async fn persist_all(&self, media: &BTreeMap<String, MediaRef>) {
        let Some(store) = &self.store else {
            return;
        };
        let timeout_ms = self.config.persist_timeout_ms;
        let writes = media.iter().map(|(device, item)| async move {
            match time::timeout(Duration::from_millis(timeout_ms), store.persist(item)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log_warn!("could not persist {} media {}: {}", device, item.uri, err)
                }
                Err(_) => log_warn!(
                    "persisting {} media {} timed out after {}ms",
                    device,
                    item.uri,
                    timeout_ms
                ),
            }
        });
        join_all(writes).await;
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::alert::AlertConfig;
use crate::background::BackgroundConfig;
use crate::bridge::ContactSource;
use crate::capture::CaptureConfig;
use crate::dispatch::DispatchConfig;
use crate::error::BridgeError;
use crate::models::EmergencyContact;
use crate::sensing::{ClassifierConfig, MonitoringConfig, PocketConfig};

pub const CONFIG_ENV: &str = "POCKETGUARD_CONFIG";
pub const DEBUG_ENV: &str = "POCKETGUARD_DEBUG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GuardianSettings {
    pub monitoring: MonitoringConfig,
    pub classifier: ClassifierConfig,
    pub pocket: PocketConfig,
    pub alert: AlertConfig,
    pub capture: CaptureConfig,
    pub dispatch: DispatchConfig,
    pub background: BackgroundConfig,
    pub contacts: Vec<EmergencyContact>,
}

/// Settings file selected through `POCKETGUARD_CONFIG`, if any.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// `POCKETGUARD_DEBUG=1` (or `true`) turns on per-sample logging.
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<GuardianSettings>,
}

impl SettingsStore {
    /// Load from `path`. A missing file yields defaults; a malformed one yields defaults with a
    /// warning, and is overwritten on the next update.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("ignoring malformed settings in {}: {err}", path.display());
                GuardianSettings::default()
            })
        } else {
            GuardianSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Not backed by a file; updates only live in memory.
    pub fn in_memory(settings: GuardianSettings) -> Self {
        Self {
            path: None,
            data: RwLock::new(settings),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GuardianSettings> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GuardianSettings> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> GuardianSettings {
        self.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.read().monitoring.clone()
    }

    pub fn contacts(&self) -> Vec<EmergencyContact> {
        self.read().contacts.clone()
    }

    pub fn update_monitoring(&self, monitoring: MonitoringConfig) -> Result<()> {
        self.update(|settings| settings.monitoring = monitoring)
    }

    pub fn set_contacts(&self, contacts: Vec<EmergencyContact>) -> Result<()> {
        self.update(|settings| settings.contacts = contacts)
    }

    pub fn update(&self, change: impl FnOnce(&mut GuardianSettings)) -> Result<()> {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)
    }

    fn persist(&self, data: &GuardianSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let data: GuardianSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed settings in {}", path.display()))?;
        *self.write() = data;
        Ok(())
    }
}

#[async_trait]
impl ContactSource for SettingsStore {
    async fn contacts(&self) -> Result<Vec<EmergencyContact>, BridgeError> {
        Ok(SettingsStore::contacts(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::Sensitivity;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("pocketguard-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_path()).expect("store");
        assert_eq!(store.snapshot(), GuardianSettings::default());
        assert_eq!(store.snapshot().alert.countdown_secs, 5);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = temp_path();
        fs::write(
            &path,
            r#"{ "monitoring": { "sensitivity": "high", "autoMode": true }, "alert": { "countdownSecs": 10 } }"#,
        )
        .expect("write");

        let store = SettingsStore::new(path.clone()).expect("store");
        let settings = store.snapshot();
        assert_eq!(settings.monitoring.sensitivity, Sensitivity::High);
        assert!(settings.monitoring.auto_mode);
        assert_eq!(settings.monitoring.sensor_rate_ms, 100);
        assert_eq!(settings.alert.countdown_secs, 10);
        assert_eq!(settings.alert.grace_secs, 3);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = temp_path();
        fs::write(&path, "{ not json").expect("write");
        let store = SettingsStore::new(path.clone()).expect("store");
        assert_eq!(store.snapshot(), GuardianSettings::default());
        assert!(store.reload().is_err());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn updates_are_persisted() {
        let path = temp_path();
        let store = SettingsStore::new(path.clone()).expect("store");
        store
            .set_contacts(vec![EmergencyContact::new("anna", "Anna", "+4911")])
            .expect("persist");

        let reopened = SettingsStore::new(path.clone()).expect("store");
        assert_eq!(reopened.contacts().len(), 1);
        assert_eq!(reopened.contacts()[0].id, "anna");
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn serves_contacts_to_the_alert_pipeline() {
        let store = SettingsStore::in_memory(GuardianSettings {
            contacts: vec![EmergencyContact::new("anna", "Anna", "+4911")],
            ..GuardianSettings::default()
        });
        let source: &dyn ContactSource = &store;
        assert_eq!(source.contacts().await.expect("contacts").len(), 1);
    }
}

pub mod alert;
pub mod background;
pub mod bridge;
pub mod capture;
pub mod dispatch;
pub mod error;
pub mod guardian;
pub mod metrics;
pub mod models;
pub mod sensing;
pub mod settings;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use alert::AlertEvent;
use bridge::sim::{
    LogAlarm, MemoryContacts, MemoryMediaStore, ScriptedLight, SimBackgroundHost, SimCamera,
    SimChannel, SimSensor,
};
use bridge::{ContactSource, HostAvailability, LightSensor, MediaStore};
use capture::CameraHandle;
use dispatch::ChannelHandle;
use models::{ChannelKind, EmergencyContact};
use settings::{GuardianSettings, SettingsStore};

pub use guardian::{Bridge, Guardian};

const DEMO_JOLT_AT_MS: u64 = 3_000;
const DEMO_TIMEOUT_SECS: u64 = 90;

fn demo_contacts() -> Vec<EmergencyContact> {
    vec![
        EmergencyContact::new("c-anna", "Anna", "+49 151 0000001").with_email("anna@example.org"),
        EmergencyContact::new("c-ben", "Ben", "+49 151 0000002"),
    ]
}

/// Demo entry point: the full pipeline against the simulated bridge, driven by one scripted
/// jolt. Prints the final session, metrics and scheduler status as JSON.
pub fn run() -> Result<()> {
    let debug = settings::debug_from_env();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let store = match settings::config_path_from_env() {
        Some(path) => SettingsStore::new(path)?,
        None => SettingsStore::in_memory(GuardianSettings::default()),
    };
    let settings = store.snapshot();
    let contacts: Arc<dyn ContactSource> = if store.contacts().is_empty() {
        info!("no contacts configured, using demo contacts");
        Arc::new(MemoryContacts::new(demo_contacts()))
    } else {
        Arc::new(store)
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(demo(settings, contacts, debug))
}

async fn demo(
    settings: GuardianSettings,
    contacts: Arc<dyn ContactSource>,
    debug: bool,
) -> Result<()> {
    let back = Arc::new(SimCamera::new("back"));
    let front = Arc::new(SimCamera::new("front"));
    {
        let (back, front) = (Arc::clone(&back), Arc::clone(&front));
        tokio::spawn(async move {
            // camera previews come up after a short warm-up
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            back.mark_ready();
            tokio::time::sleep(Duration::from_millis(300)).await;
            front.mark_ready();
        });
    }

    let bridge = Bridge {
        sensor: Arc::new(SimSensor::new().with_jolts(vec![DEMO_JOLT_AT_MS])),
        cameras: vec![back as CameraHandle, front as CameraHandle],
        channels: vec![
            Arc::new(SimChannel::new(ChannelKind::Image, 0.7)) as ChannelHandle,
            Arc::new(SimChannel::new(ChannelKind::Sms, 0.9)) as ChannelHandle,
            Arc::new(SimChannel::new(ChannelKind::Email, 0.8)) as ChannelHandle,
        ],
        contacts,
        alarm: Arc::new(LogAlarm::new()),
        media_store: Some(Arc::new(MemoryMediaStore::new()) as Arc<dyn MediaStore>),
        light: Some(Arc::new(ScriptedLight::new(vec![350.0])) as Arc<dyn LightSensor>),
        background: Arc::new(SimBackgroundHost::new(HostAvailability::Available)),
    };

    let guardian = Guardian::new(settings, bridge).with_debug_samples(debug);
    let mut events = guardian.alerts().subscribe();

    guardian.start_monitoring().await?;
    if let Err(err) = guardian.register_background().await {
        warn!("background scheduling unavailable: {err}");
    }
    let tick = guardian.background_tick(Utc::now()).await;
    info!("background tick: {:?}", tick.fetch);

    let deadline = tokio::time::sleep(Duration::from_secs(DEMO_TIMEOUT_SECS));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("no alert outcome within {DEMO_TIMEOUT_SECS}s");
                break;
            }
            event = events.recv() => match event {
                Ok(AlertEvent::Resolved { .. }) | Ok(AlertEvent::Failed { .. }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    let snapshot = guardian.alerts().snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&guardian.metrics().get_snapshot().await)?
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&guardian.scheduler().get_status().await)?
    );

    guardian.shutdown().await;
    Ok(())
}

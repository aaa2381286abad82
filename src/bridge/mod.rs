//! Boundary to the host platform.
//!
//! Everything the core needs from the device (accelerometer, cameras, contact list, delivery
//! channels, alarm, gallery, light sensor, background execution) is reached through these traits.
//! The host wires in its native implementations; `sim` provides in-process stand-ins.

pub mod sim;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BridgeError;
use crate::models::{ChannelKind, EmergencyContact, MediaRef, SensorSample};

/// Push source of accelerometer samples.
pub trait SensorSource: Send + Sync {
    fn set_rate(&self, interval_ms: u64);

    /// Start pushing samples into `sink`. Fails with `PermissionDenied` when the host refuses
    /// sensor access.
    fn register(&self, sink: mpsc::Sender<SensorSample>) -> Result<(), BridgeError>;

    /// Stop pushing. Calling it when nothing is registered is a no-op.
    fn unregister(&self);
}

#[async_trait]
pub trait Camera: Send + Sync {
    fn id(&self) -> &str;

    /// Flipped by the host's ready callback once the preview is live.
    fn is_ready(&self) -> bool;

    async fn capture(&self) -> Result<MediaRef, BridgeError>;
}

#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn contacts(&self) -> Result<Vec<EmergencyContact>, BridgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Media(MediaRef),
    Text(String),
    Email {
        subject: String,
        body: String,
        attachments: Vec<MediaRef>,
    },
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, message: &OutboundMessage, destination: &str) -> Result<(), BridgeError>;
}

/// Audible alarm and local notifications. Fire-and-forget from the core's point of view.
#[async_trait]
pub trait AlarmNotifier: Send + Sync {
    async fn start_alarm(&self) -> Result<(), BridgeError>;
    async fn stop_alarm(&self) -> Result<(), BridgeError>;
    async fn notify(&self, title: &str, body: &str) -> Result<(), BridgeError>;
}

/// Gallery / media library.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn persist(&self, media: &MediaRef) -> Result<(), BridgeError>;
}

#[async_trait]
pub trait LightSensor: Send + Sync {
    async fn read_lux(&self) -> Result<f64, BridgeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostAvailability {
    Available,
    Restricted,
    Denied,
}

/// The platform's periodic background-execution facility.
#[async_trait]
pub trait BackgroundHost: Send + Sync {
    async fn availability(&self) -> HostAvailability;
    async fn is_registered(&self, task: &str) -> bool;
    async fn register(&self, task: &str, min_interval: Duration) -> Result<(), BridgeError>;
    async fn unregister(&self, task: &str) -> Result<(), BridgeError>;
}

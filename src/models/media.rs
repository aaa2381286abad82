use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Photo,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub uri: String,
    pub kind: MediaKind,
    pub duration_ms: Option<u64>,
}

impl MediaRef {
    pub fn photo(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: MediaKind::Photo,
            duration_ms: None,
        }
    }

    pub fn video(uri: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            uri: uri.into(),
            kind: MediaKind::Video,
            duration_ms: Some(duration_ms),
        }
    }

    /// Only local file handles can be attached to outgoing mail.
    pub fn is_attachable(&self) -> bool {
        self.uri.starts_with("file://") || self.uri.starts_with("content://")
    }
}

/// Evidence from one capture attempt. Never mutated after the coordinator builds it, so a failed
/// dispatch can be retried with exactly the same media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub per_device: BTreeMap<String, MediaRef>,
    /// Device whose media goes out on the image channel.
    pub primary_device: String,
    pub timestamp: DateTime<Utc>,
}

impl CaptureResult {
    pub fn primary(&self) -> Option<&MediaRef> {
        self.per_device
            .get(&self.primary_device)
            .or_else(|| self.per_device.values().next())
    }

    pub fn media(&self) -> impl Iterator<Item = &MediaRef> {
        self.per_device.values()
    }

    pub fn device_count(&self) -> usize {
        self.per_device.len()
    }
}

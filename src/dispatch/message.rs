//! Alert text and e-mail rendering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{CaptureResult, MediaKind, MediaRef};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const EMAIL_SUBJECT: &str = "EMERGENCY ALERT: unexpected motion detected";
pub const TEST_SUBJECT: &str = "TEST: emergency alert check, no action needed";

const TEST_PREFIX: &str = "[TEST] ";
const TEST_MEDIA_URI: &str = "test://pocketguard/test.jpg";

/// Everything sent for one dispatch, rendered once and shared by all contacts.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub subject: String,
    pub text: String,
    pub body: String,
    pub attachments: Vec<MediaRef>,
}

pub fn render(evidence: &CaptureResult) -> Rendered {
    Rendered {
        subject: EMAIL_SUBJECT.to_string(),
        text: alert_text(evidence),
        body: email_body(evidence),
        attachments: attachments(evidence),
    }
}

/// Same layout as a real alert, clearly marked so nobody acts on it.
pub fn render_test(evidence: &CaptureResult) -> Rendered {
    let mut body = String::from(
        "This is a test of the emergency alert system. No action is needed.\n\n",
    );
    body.push_str(&email_body(evidence));
    Rendered {
        subject: TEST_SUBJECT.to_string(),
        text: format!("{TEST_PREFIX}{}", alert_text(evidence)),
        body,
        attachments: attachments(evidence),
    }
}

/// Placeholder evidence for a test send; nothing is captured.
pub fn test_evidence(at: DateTime<Utc>) -> CaptureResult {
    let mut per_device = BTreeMap::new();
    per_device.insert("back".to_string(), MediaRef::photo(TEST_MEDIA_URI));
    CaptureResult {
        per_device,
        primary_device: "back".into(),
        timestamp: at,
    }
}

fn timestamp(evidence: &CaptureResult) -> String {
    evidence.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn camera_info(evidence: &CaptureResult) -> &'static str {
    let has = |device: &str| evidence.per_device.contains_key(device);
    if evidence.media().any(|media| media.kind == MediaKind::Video) {
        return "Security video was";
    }
    match (has("front"), has("back")) {
        (true, true) => "Photos from both cameras were",
        (true, false) => "Photo from the front camera was",
        (false, true) => "Photo from the back camera was",
        (false, false) => "Security photo was",
    }
}

pub fn alert_text(evidence: &CaptureResult) -> String {
    format!(
        "EMERGENCY ALERT: unexpected motion detected at {}. {} taken automatically.",
        timestamp(evidence),
        camera_info(evidence)
    )
}

pub fn email_body(evidence: &CaptureResult) -> String {
    let mut body = String::new();
    body.push_str("Dear emergency contact,\n\n");
    body.push_str(&format!(
        "Unexpected motion was detected on a monitored device at {}.\n\n",
        timestamp(evidence)
    ));
    body.push_str("Captured media:\n");
    for (device, media) in &evidence.per_device {
        let kind = match media.kind {
            MediaKind::Photo => "photo".to_string(),
            MediaKind::Video => match media.duration_ms {
                Some(ms) => format!("video, {}s", ms / 1_000),
                None => "video".to_string(),
            },
        };
        body.push_str(&format!("  - {device} camera ({kind})\n"));
    }
    body.push_str(
        "\nPlease try to reach the owner immediately. If you cannot reach them and believe they \
         are in danger, contact the local emergency services.\n",
    );
    body
}

/// Media that can be attached to mail. Anything that is not a local file handle is skipped.
pub fn attachments(evidence: &CaptureResult) -> Vec<MediaRef> {
    evidence
        .media()
        .filter(|media| {
            if media.is_attachable() {
                true
            } else {
                log_warn!("skipping attachment with unsupported uri {}", media.uri);
                false
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn evidence(entries: Vec<(&str, MediaRef)>) -> CaptureResult {
        let per_device: BTreeMap<String, MediaRef> = entries
            .into_iter()
            .map(|(device, media)| (device.to_string(), media))
            .collect();
        CaptureResult {
            primary_device: "back".into(),
            per_device,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap(),
        }
    }

    #[test]
    fn text_names_both_cameras() {
        let evidence = evidence(vec![
            ("back", MediaRef::photo("file:///b.jpg")),
            ("front", MediaRef::photo("file:///f.jpg")),
        ]);
        assert_eq!(
            alert_text(&evidence),
            "EMERGENCY ALERT: unexpected motion detected at 2024-03-01 22:15:00 UTC. \
             Photos from both cameras were taken automatically."
        );
    }

    #[test]
    fn text_mentions_video() {
        let evidence = evidence(vec![("back", MediaRef::video("file:///b.mp4", 10_000))]);
        assert!(alert_text(&evidence).contains("Security video was taken"));
        assert!(email_body(&evidence).contains("back camera (video, 10s)"));
    }

    #[test]
    fn remote_uris_are_not_attached() {
        let evidence = evidence(vec![
            ("back", MediaRef::photo("content://media/1")),
            ("front", MediaRef::photo("https://cdn.example/f.jpg")),
        ]);
        let attached = attachments(&evidence);
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].uri, "content://media/1");
    }

    #[test]
    fn test_render_is_marked_and_attaches_nothing() {
        let rendered = render_test(&test_evidence(Utc::now()));
        assert!(rendered.text.starts_with("[TEST] EMERGENCY ALERT"));
        assert_eq!(rendered.subject, TEST_SUBJECT);
        assert!(rendered.body.starts_with("This is a test"));
        assert!(rendered.attachments.is_empty());
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::{self, Duration};

use crate::bridge::{Channel, OutboundMessage};
use crate::error::{BridgeError, ChannelSendFailed};
use crate::models::{
    CaptureResult, ChannelKind, ContactOutcome, DispatchOutcome, DispatchReport, EmergencyContact,
};

use super::message::{self, Rendered};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub type ChannelHandle = Arc<dyn Channel>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatchConfig {
    pub max_concurrent_contacts: usize,
    pub channel_timeout_ms: u64,
    /// Bound on loading the contact list before a dispatch.
    pub contacts_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_contacts: 4,
            channel_timeout_ms: 30_000,
            contacts_timeout_ms: 5_000,
        }
    }
}

struct Attempt {
    channel: ChannelHandle,
    message: OutboundMessage,
    destination: String,
}

pub struct DispatchFanout {
    config: DispatchConfig,
    channels: BTreeMap<ChannelKind, ChannelHandle>,
}

impl DispatchFanout {
    /// One channel per kind; a later handle of the same kind replaces an earlier one.
    pub fn new(config: DispatchConfig, channels: Vec<ChannelHandle>) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| (channel.kind(), channel))
            .collect();
        Self { config, channels }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Send the evidence to every contact over every applicable channel.
    ///
    /// Every contact runs in its own task with at most `max_concurrent_contacts` in flight, and
    /// every channel of a contact runs concurrently under its own timeout. All results are kept:
    /// a failing channel, contact or even a panicking task only turns into failed outcomes.
    pub async fn dispatch(
        &self,
        evidence: &CaptureResult,
        contacts: &[EmergencyContact],
    ) -> DispatchReport {
        self.send_rendered(evidence, &message::render(evidence), contacts)
            .await
    }

    /// Exercise every channel for every contact with a clearly marked test message and
    /// placeholder evidence.
    pub async fn dispatch_test(&self, contacts: &[EmergencyContact]) -> DispatchReport {
        let evidence = message::test_evidence(Utc::now());
        log_info!("sending test alert to {} contact(s)", contacts.len());
        self.send_rendered(&evidence, &message::render_test(&evidence), contacts)
            .await
    }

    async fn send_rendered(
        &self,
        evidence: &CaptureResult,
        rendered: &Rendered,
        contacts: &[EmergencyContact],
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut planned = Vec::new();
        for contact in contacts {
            let attempts = self.plan(evidence, contact, rendered);
            if attempts.is_empty() {
                log_warn!("no applicable channel for contact {}", contact.id);
                report.skipped.push(contact.id.clone());
            } else {
                planned.push((contact, attempts));
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_contacts.max(1)));
        let timeout_ms = self.config.channel_timeout_ms;

        let mut expected: Vec<Vec<ChannelKind>> = Vec::with_capacity(planned.len());
        let mut tasks = Vec::with_capacity(planned.len());
        for (contact, attempts) in &mut planned {
            expected.push(attempts.iter().map(|attempt| attempt.channel.kind()).collect());
            let attempts = std::mem::take(attempts);
            let contact_id = contact.id.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                send_all(&contact_id, attempts, timeout_ms).await
            }));
        }
        let joined = join_all(tasks).await;

        for (((contact, _), kinds), outcome) in planned.iter().zip(expected).zip(joined) {
            let channels = match outcome {
                Ok(outcomes) => outcomes,
                Err(join_err) => {
                    log_error!("dispatch task for {} aborted: {}", contact.id, join_err);
                    kinds
                        .into_iter()
                        .map(|channel| DispatchOutcome {
                            contact_id: contact.id.clone(),
                            channel,
                            success: false,
                            error: Some(format!("dispatch task aborted: {join_err}")),
                        })
                        .collect()
                }
            };
            let success = channels.iter().any(|outcome| outcome.success);
            report.contacts.push(ContactOutcome {
                contact_id: contact.id.clone(),
                contact_name: contact.name.clone(),
                success,
                channels,
            });
        }

        log_info!(
            "dispatch finished: {}/{} contact(s) reached, {} skipped",
            report.succeeded_contacts(),
            report.contacts.len(),
            report.skipped.len()
        );
        report
    }

    fn plan(
        &self,
        evidence: &CaptureResult,
        contact: &EmergencyContact,
        rendered: &Rendered,
    ) -> Vec<Attempt> {
        let mut attempts = Vec::new();
        let phone = contact.phone.trim();

        if !phone.is_empty() {
            if let (Some(channel), Some(primary)) =
                (self.channels.get(&ChannelKind::Image), evidence.primary())
            {
                attempts.push(Attempt {
                    channel: Arc::clone(channel),
                    message: OutboundMessage::Media(primary.clone()),
                    destination: phone.to_string(),
                });
            }
            if let Some(channel) = self.channels.get(&ChannelKind::Sms) {
                attempts.push(Attempt {
                    channel: Arc::clone(channel),
                    message: OutboundMessage::Text(rendered.text.clone()),
                    destination: phone.to_string(),
                });
            }
        }

        if let (Some(channel), Some(email)) = (
            self.channels.get(&ChannelKind::Email),
            contact.email.as_deref().filter(|email| !email.trim().is_empty()),
        ) {
            attempts.push(Attempt {
                channel: Arc::clone(channel),
                message: OutboundMessage::Email {
                    subject: rendered.subject.clone(),
                    body: rendered.body.clone(),
                    attachments: rendered.attachments.clone(),
                },
                destination: email.to_string(),
            });
        }

        attempts
    }
}

async fn send_all(contact_id: &str, attempts: Vec<Attempt>, timeout_ms: u64) -> Vec<DispatchOutcome> {
    join_all(
        attempts
            .into_iter()
            .map(|attempt| send_one(contact_id, attempt, timeout_ms)),
    )
    .await
}

async fn send_one(contact_id: &str, attempt: Attempt, timeout_ms: u64) -> DispatchOutcome {
    let kind = attempt.channel.kind();
    let sent = attempt.channel.send(&attempt.message, &attempt.destination);
    let result = match time::timeout(Duration::from_millis(timeout_ms), sent).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Timeout(timeout_ms)),
    };

    match result {
        Ok(()) => DispatchOutcome {
            contact_id: contact_id.to_string(),
            channel: kind,
            success: true,
            error: None,
        },
        Err(source) => {
            let failure = ChannelSendFailed {
                contact_id: contact_id.to_string(),
                channel: kind,
                source,
            };
            log_warn!("{}", failure);
            DispatchOutcome {
                contact_id: failure.contact_id,
                channel: kind,
                success: false,
                error: Some(failure.source.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::sim::SimChannel;
    use crate::models::MediaRef;
    use async_trait::async_trait;
    use tokio::time::Instant;

    fn evidence() -> CaptureResult {
        let mut per_device = BTreeMap::new();
        per_device.insert("back".to_string(), MediaRef::photo("file:///back.jpg"));
        per_device.insert("front".to_string(), MediaRef::photo("file:///front.jpg"));
        CaptureResult {
            per_device,
            primary_device: "back".into(),
            timestamp: Utc::now(),
        }
    }

    fn handle(channel: SimChannel) -> ChannelHandle {
        Arc::new(channel)
    }

    #[tokio::test(start_paused = true)]
    async fn three_contacts_partial_success() {
        let contacts = vec![
            EmergencyContact::new("anna", "Anna", "+4911"),
            EmergencyContact::new("ben", "Ben", "+4922").with_email("ben@example.org"),
            EmergencyContact::new("cleo", "Cleo", "+4933").with_email("cleo@example.org"),
        ];
        let fanout = DispatchFanout::new(
            DispatchConfig::default(),
            vec![
                handle(SimChannel::broken(ChannelKind::Image)),
                handle(SimChannel::reliable(ChannelKind::Sms).failing_for("+4922")),
                handle(SimChannel::broken(ChannelKind::Email)),
            ],
        );

        let report = fanout.dispatch(&evidence(), &contacts).await;

        assert!(report.success());
        assert_eq!(report.contacts.len(), 3);
        assert!(report.skipped.is_empty());

        let by_id = |id: &str| {
            report
                .contacts
                .iter()
                .find(|contact| contact.contact_id == id)
                .expect("aggregate present")
        };
        assert!(by_id("anna").success);
        assert_eq!(by_id("anna").channels.len(), 2);
        assert!(!by_id("ben").success);
        assert_eq!(by_id("ben").channels.len(), 3);
        assert!(by_id("cleo").success);
        assert_eq!(report.succeeded_contacts(), 2);

        let sms_ok: Vec<_> = report
            .outcomes()
            .filter(|outcome| outcome.channel == ChannelKind::Sms && outcome.success)
            .map(|outcome| outcome.contact_id.as_str())
            .collect();
        assert_eq!(sms_ok.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_channel_failing_is_not_a_success() {
        let contacts = vec![EmergencyContact::new("anna", "Anna", "+4911")];
        let fanout = DispatchFanout::new(
            DispatchConfig::default(),
            vec![handle(SimChannel::broken(ChannelKind::Sms))],
        );

        let report = fanout.dispatch(&evidence(), &contacts).await;
        assert!(!report.success());
        assert!(report.contacts[0].channels[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn contact_without_applicable_channel_is_skipped() {
        let contacts = vec![
            EmergencyContact::new("mail-only", "Mia", "").with_email("mia@example.org"),
            EmergencyContact::new("anna", "Anna", "+4911"),
        ];
        let fanout = DispatchFanout::new(
            DispatchConfig::default(),
            vec![handle(SimChannel::reliable(ChannelKind::Sms))],
        );

        let report = fanout.dispatch(&evidence(), &contacts).await;
        assert_eq!(report.skipped, vec!["mail-only".to_string()]);
        assert_eq!(report.contacts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn email_carries_attachments() {
        let email = Arc::new(SimChannel::reliable(ChannelKind::Email));
        let fanout = DispatchFanout::new(
            DispatchConfig::default(),
            vec![Arc::clone(&email) as ChannelHandle],
        );
        let contacts =
            vec![EmergencyContact::new("ben", "Ben", "+4922").with_email("ben@example.org")];

        fanout.dispatch(&evidence(), &contacts).await;

        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ben@example.org");
        match &sent[0].1 {
            OutboundMessage::Email {
                subject,
                attachments,
                ..
            } => {
                assert_eq!(subject, message::EMAIL_SUBJECT);
                assert_eq!(attachments.len(), 2);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_channel_times_out() {
        let fanout = DispatchFanout::new(
            DispatchConfig {
                channel_timeout_ms: 1_000,
                ..DispatchConfig::default()
            },
            vec![handle(
                SimChannel::reliable(ChannelKind::Sms).with_latency(Duration::from_secs(5)),
            )],
        );
        let contacts = vec![EmergencyContact::new("anna", "Anna", "+4911")];

        let report = fanout.dispatch(&evidence(), &contacts).await;
        let outcome = &report.contacts[0].channels[0];
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("timed out after 1000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_is_bounded() {
        let fanout = DispatchFanout::new(
            DispatchConfig {
                max_concurrent_contacts: 1,
                ..DispatchConfig::default()
            },
            vec![handle(
                SimChannel::reliable(ChannelKind::Sms).with_latency(Duration::from_millis(500)),
            )],
        );
        let contacts: Vec<_> = (0..3)
            .map(|i| EmergencyContact::new(format!("c{i}"), "C", format!("+49{i}")))
            .collect();

        let started = Instant::now();
        let report = fanout.dispatch(&evidence(), &contacts).await;
        assert_eq!(report.succeeded_contacts(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1_500));
    }

    struct CrashingChannel;

    #[async_trait]
    impl Channel for CrashingChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Sms
        }

        async fn send(&self, _message: &OutboundMessage, destination: &str) -> Result<(), BridgeError> {
            if destination == "+0000" {
                panic!("driver crashed");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_contact_does_not_abort_siblings() {
        let fanout = DispatchFanout::new(DispatchConfig::default(), vec![Arc::new(CrashingChannel) as ChannelHandle]);
        let contacts = vec![
            EmergencyContact::new("crash", "X", "+0000"),
            EmergencyContact::new("anna", "Anna", "+4911"),
        ];

        let report = fanout.dispatch(&evidence(), &contacts).await;
        assert_eq!(report.contacts.len(), 2);
        assert!(!report.contacts[0].success);
        assert!(report.contacts[0].channels[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("aborted"));
        assert!(report.contacts[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reaches_every_channel_marked_as_test() {
        let sms = Arc::new(SimChannel::reliable(ChannelKind::Sms));
        let email = Arc::new(SimChannel::reliable(ChannelKind::Email));
        let fanout = DispatchFanout::new(
            DispatchConfig::default(),
            vec![
                Arc::clone(&sms) as ChannelHandle,
                Arc::clone(&email) as ChannelHandle,
            ],
        );
        let contacts =
            vec![EmergencyContact::new("ben", "Ben", "+4922").with_email("ben@example.org")];

        let report = fanout.dispatch_test(&contacts).await;
        assert!(report.success());
        assert_eq!(report.contacts[0].channels.len(), 2);

        match &sms.sent()[0].1 {
            OutboundMessage::Text(text) => assert!(text.starts_with("[TEST] ")),
            other => panic!("unexpected message {other:?}"),
        }
        match &email.sent()[0].1 {
            OutboundMessage::Email {
                subject,
                attachments,
                ..
            } => {
                assert_eq!(subject, message::TEST_SUBJECT);
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}

//! In-process stand-ins for the host collaborators, used by the demo entry point and tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::models::{ChannelKind, EmergencyContact, MediaRef, SensorSample, STANDARD_GRAVITY};

use super::{
    AlarmNotifier, BackgroundHost, Camera, Channel, ContactSource, HostAvailability, LightSensor,
    MediaStore, OutboundMessage, SensorSource,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Synthetic accelerometer. Samples can be injected by hand, and an optional generator emits
/// resting noise with hard impacts at scripted offsets.
pub struct SimSensor {
    granted: bool,
    rate_ms: AtomicU64,
    jolts_at_ms: Vec<u64>,
    sink: Mutex<Option<mpsc::Sender<SensorSample>>>,
    generator: Mutex<Option<CancellationToken>>,
    unregister_calls: AtomicUsize,
}

impl SimSensor {
    pub fn new() -> Self {
        Self {
            granted: true,
            rate_ms: AtomicU64::new(100),
            jolts_at_ms: Vec::new(),
            sink: Mutex::new(None),
            generator: Mutex::new(None),
            unregister_calls: AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            ..Self::new()
        }
    }

    /// Generate samples at the configured rate, with a one-second impact burst at each offset.
    pub fn with_jolts(mut self, jolts_at_ms: Vec<u64>) -> Self {
        self.jolts_at_ms = jolts_at_ms;
        self
    }

    pub fn rate_ms(&self) -> u64 {
        self.rate_ms.load(Ordering::Relaxed)
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.sink).is_some()
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::Relaxed)
    }

    pub async fn inject(&self, sample: SensorSample) -> Result<(), BridgeError> {
        let sink = lock(&self.sink).clone();
        match sink {
            Some(sink) => sink
                .send(sample)
                .await
                .map_err(|_| BridgeError::Unavailable("sample sink closed".into())),
            None => Err(BridgeError::Unavailable("sensor not registered".into())),
        }
    }

    fn spawn_generator(&self, sink: mpsc::Sender<SensorSample>) -> CancellationToken {
        let token = CancellationToken::new();
        let child = token.clone();
        let rate = Duration::from_millis(self.rate_ms().max(1));
        let jolts = self.jolts_at_ms.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = time::interval(rate);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let now_ms = started.elapsed().as_millis() as u64;
                        let in_jolt = jolts
                            .iter()
                            .any(|at| now_ms >= *at && now_ms < at + 1_000);
                        let noise = (rand::random::<f64>() - 0.5) * 0.3;
                        let z = if in_jolt {
                            STANDARD_GRAVITY * 3.5 + noise * 20.0
                        } else {
                            STANDARD_GRAVITY + noise
                        };
                        let sample = SensorSample::new(noise, -noise, z, now_ms);
                        if sink.send(sample).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        token
    }
}

impl Default for SimSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimSensor {
    fn set_rate(&self, interval_ms: u64) {
        self.rate_ms.store(interval_ms, Ordering::Relaxed);
    }

    fn register(&self, sink: mpsc::Sender<SensorSample>) -> Result<(), BridgeError> {
        if !self.granted {
            return Err(BridgeError::PermissionDenied("accelerometer".into()));
        }
        if !self.jolts_at_ms.is_empty() {
            let token = self.spawn_generator(sink.clone());
            if let Some(previous) = lock(&self.generator).replace(token) {
                previous.cancel();
            }
        }
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    fn unregister(&self) {
        self.unregister_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(token) = lock(&self.generator).take() {
            token.cancel();
        }
        lock(&self.sink).take();
    }
}

pub struct SimCamera {
    id: String,
    ready: AtomicBool,
    video_ms: Option<u64>,
    capture_delay: Duration,
    failures_left: AtomicU32,
    always_fail: AtomicBool,
    captures: AtomicUsize,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ready: AtomicBool::new(false),
            video_ms: None,
            capture_delay: Duration::from_millis(300),
            failures_left: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn ready(self) -> Self {
        self.ready.store(true, Ordering::SeqCst);
        self
    }

    /// Record video clips of the given length instead of photos.
    pub fn recording(mut self, duration_ms: u64) -> Self {
        self.video_ms = Some(duration_ms);
        self
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn failing(self) -> Self {
        self.always_fail.store(true, Ordering::SeqCst);
        self
    }

    /// The host's ready callback.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn fail_next(&self, attempts: u32) {
        self.failures_left.store(attempts, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn capture(&self) -> Result<MediaRef, BridgeError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .video_ms
            .map(Duration::from_millis)
            .unwrap_or(self.capture_delay);
        time::sleep(delay).await;

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(BridgeError::Failed(format!("{} camera error", self.id)));
        }
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if consumed.is_ok() {
            return Err(BridgeError::Failed(format!("{} returned an empty frame", self.id)));
        }

        let name = Uuid::new_v4();
        Ok(match self.video_ms {
            Some(duration_ms) => {
                MediaRef::video(format!("file:///sim/{}/{name}.mp4", self.id), duration_ms)
            }
            None => MediaRef::photo(format!("file:///sim/{}/{name}.jpg", self.id)),
        })
    }
}

pub struct MemoryContacts {
    contacts: Vec<EmergencyContact>,
}

impl MemoryContacts {
    pub fn new(contacts: Vec<EmergencyContact>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ContactSource for MemoryContacts {
    async fn contacts(&self) -> Result<Vec<EmergencyContact>, BridgeError> {
        Ok(self.contacts.clone())
    }
}

/// Delivery channel that succeeds with the given probability after a fixed latency.
pub struct SimChannel {
    kind: ChannelKind,
    success_rate: f64,
    latency: Duration,
    failing_destinations: HashSet<String>,
    sent: Mutex<Vec<(String, OutboundMessage)>>,
}

impl SimChannel {
    pub fn new(kind: ChannelKind, success_rate: f64) -> Self {
        Self {
            kind,
            success_rate,
            latency: Duration::from_millis(500),
            failing_destinations: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn reliable(kind: ChannelKind) -> Self {
        Self::new(kind, 1.0)
    }

    pub fn broken(kind: ChannelKind) -> Self {
        Self::new(kind, 0.0)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Always fail for this destination regardless of the success rate.
    pub fn failing_for(mut self, destination: impl Into<String>) -> Self {
        self.failing_destinations.insert(destination.into());
        self
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Channel for SimChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, message: &OutboundMessage, destination: &str) -> Result<(), BridgeError> {
        time::sleep(self.latency).await;

        if self.failing_destinations.contains(destination)
            || rand::random::<f64>() >= self.success_rate
        {
            return Err(BridgeError::Failed(format!(
                "{} delivery to {destination} rejected",
                self.kind
            )));
        }

        lock(&self.sent).push((destination.to_string(), message.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct LogAlarm {
    alarm_on: AtomicBool,
    notifications: Mutex<Vec<(String, String)>>,
}

impl LogAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sounding(&self) -> bool {
        self.alarm_on.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        lock(&self.notifications).clone()
    }
}

#[async_trait]
impl AlarmNotifier for LogAlarm {
    async fn start_alarm(&self) -> Result<(), BridgeError> {
        info!("alarm sounding");
        self.alarm_on.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_alarm(&self) -> Result<(), BridgeError> {
        if self.alarm_on.swap(false, Ordering::SeqCst) {
            info!("alarm stopped");
        }
        Ok(())
    }

    async fn notify(&self, title: &str, body: &str) -> Result<(), BridgeError> {
        info!("notification: {title}: {body}");
        lock(&self.notifications).push((title.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMediaStore {
    failing: AtomicBool,
    stored: Mutex<Vec<MediaRef>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<MediaRef> {
        lock(&self.stored).clone()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn persist(&self, media: &MediaRef) -> Result<(), BridgeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::PermissionDenied("media library".into()));
        }
        lock(&self.stored).push(media.clone());
        Ok(())
    }
}

/// Replays lux readings in order, repeating the last one.
pub struct ScriptedLight {
    readings: Mutex<VecDeque<f64>>,
    last: Mutex<Option<f64>>,
}

impl ScriptedLight {
    pub fn new(readings: Vec<f64>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LightSensor for ScriptedLight {
    async fn read_lux(&self) -> Result<f64, BridgeError> {
        let next = lock(&self.readings).pop_front();
        let mut last = lock(&self.last);
        if let Some(value) = next {
            *last = Some(value);
        }
        last.ok_or_else(|| BridgeError::Unavailable("no light reading".into()))
    }
}

pub struct SimBackgroundHost {
    availability: Mutex<HostAvailability>,
    registered: Mutex<HashSet<String>>,
}

impl SimBackgroundHost {
    pub fn new(availability: HostAvailability) -> Self {
        Self {
            availability: Mutex::new(availability),
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_availability(&self, availability: HostAvailability) {
        *lock(&self.availability) = availability;
    }
}

#[async_trait]
impl BackgroundHost for SimBackgroundHost {
    async fn availability(&self) -> HostAvailability {
        *lock(&self.availability)
    }

    async fn is_registered(&self, task: &str) -> bool {
        lock(&self.registered).contains(task)
    }

    async fn register(&self, task: &str, min_interval: Duration) -> Result<(), BridgeError> {
        if *lock(&self.availability) != HostAvailability::Available {
            warn!("background registration of {task} refused");
            return Err(BridgeError::Unavailable("background fetch disabled".into()));
        }
        info!("registered {task} every {}s", min_interval.as_secs());
        lock(&self.registered).insert(task.to_string());
        Ok(())
    }

    async fn unregister(&self, task: &str) -> Result<(), BridgeError> {
        lock(&self.registered).remove(task);
        Ok(())
    }
}

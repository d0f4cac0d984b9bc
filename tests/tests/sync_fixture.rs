//! Shared fixtures for the synchronization integration tests.
//!
//! `FakeMediaElement` stands in for a platform media player: position,
//! duration, buffered ranges, and pause state are all test-controlled, and
//! every seek is recorded so assertions can check exactly where the
//! corrector pointed the element. `FakeBackend` vends these elements in
//! open order, and `ManualClock` replaces the system wall clock so tests
//! can place "now" anywhere on the schedule.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use playback_sync::{
    BufferedRange, MediaBackend, MediaElement, MediaEvent, SyncError, SyncResult, WallClock,
};
use tokio::sync::broadcast;
use url::Url;

/// Test-controlled wall clock, milliseconds since the Unix epoch.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_ms: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now_ms)))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.0.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ElementState {
    url: Option<Url>,
    position_sec: f64,
    duration_sec: Option<f64>,
    buffered: Vec<BufferedRange>,
    paused: bool,
    volume: f32,
    disposed: bool,
    reject_autoplay: bool,
    seeks: Vec<f64>,
}

impl Default for ElementState {
    fn default() -> Self {
        Self {
            url: None,
            position_sec: 0.0,
            duration_sec: None,
            buffered: Vec::new(),
            paused: true,
            volume: 1.0,
            disposed: false,
            reject_autoplay: false,
            seeks: Vec::new(),
        }
    }
}

/// In-memory media element with scripted state.
pub struct FakeMediaElement {
    state: Mutex<ElementState>,
    events: broadcast::Sender<MediaEvent>,
}

impl FakeMediaElement {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(ElementState::default()),
            events,
        })
    }

    pub fn with_duration(duration_sec: f64) -> Arc<Self> {
        let element = Self::new();
        element.script_duration(duration_sec);
        element
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ElementState> {
        self.state.lock().unwrap()
    }

    /// Set the duration as if the manifest had loaded, with the matching
    /// metadata event.
    pub fn script_duration(&self, duration_sec: f64) {
        self.lock().duration_sec = Some(duration_sec);
        let _ = self.events.send(MediaEvent::LoadedMetadata {
            duration: duration_sec,
        });
    }

    pub fn script_position(&self, position_sec: f64) {
        self.lock().position_sec = position_sec;
    }

    pub fn script_buffered(&self, ranges: Vec<BufferedRange>) {
        self.lock().buffered = ranges;
    }

    pub fn script_autoplay_rejection(&self, reject: bool) {
        self.lock().reject_autoplay = reject;
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.lock().seeks.clone()
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn url(&self) -> Option<Url> {
        self.lock().url.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

impl MediaElement for FakeMediaElement {
    fn load(&self, url: &Url) -> SyncResult<()> {
        self.lock().url = Some(url.clone());
        Ok(())
    }

    fn play(&self) -> SyncResult<()> {
        let mut state = self.lock();
        if state.reject_autoplay {
            return Err(SyncError::AutoplayRejected);
        }
        let was_paused = state.paused;
        state.paused = false;
        drop(state);
        if was_paused {
            let _ = self.events.send(MediaEvent::Playing);
        }
        Ok(())
    }

    fn pause(&self) {
        self.lock().paused = true;
    }

    fn current_time(&self) -> f64 {
        self.lock().position_sec
    }

    fn set_current_time(&self, seconds: f64) {
        {
            let mut state = self.lock();
            state.seeks.push(seconds);
            state.position_sec = seconds;
        }
        let _ = self.events.send(MediaEvent::Seeked);
    }

    fn duration(&self) -> Option<f64> {
        self.lock().duration_sec
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.lock().buffered.clone()
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn set_volume(&self, volume: f32) {
        self.lock().volume = volume;
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        state.paused = true;
    }
}

/// Backend that vends [`FakeMediaElement`]s and records them in open order.
pub struct FakeBackend {
    opened: Mutex<Vec<(Url, Arc<FakeMediaElement>)>>,
    /// Duration pre-seeded into every opened element, as if metadata were
    /// available immediately.
    auto_duration: Mutex<Option<f64>>,
    /// URLs whose elements refuse autoplay.
    reject_autoplay_for: Mutex<Vec<Url>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            auto_duration: Mutex::new(None),
            reject_autoplay_for: Mutex::new(Vec::new()),
        })
    }

    pub fn with_auto_duration(duration_sec: f64) -> Arc<Self> {
        let backend = Self::new();
        *backend.auto_duration.lock().unwrap() = Some(duration_sec);
        backend
    }

    pub fn set_auto_duration(&self, duration_sec: Option<f64>) {
        *self.auto_duration.lock().unwrap() = duration_sec;
    }

    pub fn script_reject_autoplay_for(&self, url: Url) {
        self.reject_autoplay_for.lock().unwrap().push(url);
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn element(&self, index: usize) -> Option<Arc<FakeMediaElement>> {
        self.opened.lock().unwrap().get(index).map(|(_, e)| e.clone())
    }

    pub fn opened_urls(&self) -> Vec<Url> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn open(&self, url: &Url) -> SyncResult<Arc<dyn MediaElement>> {
        let element = FakeMediaElement::new();
        element.load(url)?;
        if let Some(duration) = *self.auto_duration.lock().unwrap() {
            element.lock().duration_sec = Some(duration);
        }
        if self.reject_autoplay_for.lock().unwrap().contains(url) {
            element.script_autoplay_rejection(true);
        }
        self.opened
            .lock()
            .unwrap()
            .push((url.clone(), element.clone()));
        Ok(element)
    }
}

pub fn test_url(path: &str) -> Url {
    format!("https://media.test/{path}")
        .parse()
        .expect("static test URL must parse")
}

//! Run a synchronized session end to end against a simulated media backend.
//!
//! The simulated element plays in real time (position advances with the
//! host clock) and reports a fully buffered one-hour recording, so the
//! corrector's decisions are visible in the logs without any network.
//!
//! ```sh
//! RUST_LOG=playback_sync=debug cargo run --example live_session
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use playback_sync::{
    BufferedRange, MediaBackend, MediaElement, MediaEvent, PlaybackSyncSession, ScheduleSpec,
    SessionConfig, SessionEvent, SyncResult, SyncSettings, TrackInfo,
};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

const MEDIA_DURATION_SEC: f64 = 3600.0;

struct SimState {
    playing_since: Option<Instant>,
    base_position_sec: f64,
    paused: bool,
    volume: f32,
    disposed: bool,
}

/// Media element that plays in real time against the host clock.
struct SimulatedElement {
    state: Mutex<SimState>,
    events: broadcast::Sender<MediaEvent>,
}

impl SimulatedElement {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let element = Arc::new(Self {
            state: Mutex::new(SimState {
                playing_since: None,
                base_position_sec: 0.0,
                paused: true,
                volume: 1.0,
                disposed: false,
            }),
            events,
        });
        let _ = element.events.send(MediaEvent::LoadedMetadata {
            duration: MEDIA_DURATION_SEC,
        });
        element
    }

    fn position(state: &SimState) -> f64 {
        let running = state
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        state.base_position_sec + running
    }
}

impl MediaElement for SimulatedElement {
    fn load(&self, _url: &Url) -> SyncResult<()> {
        Ok(())
    }

    fn play(&self) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.paused && !state.disposed {
            state.paused = false;
            state.playing_since = Some(Instant::now());
            let _ = self.events.send(MediaEvent::Playing);
        }
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.base_position_sec = Self::position(&state);
        state.playing_since = None;
        state.paused = true;
    }

    fn current_time(&self) -> f64 {
        Self::position(&self.state.lock().unwrap())
    }

    fn set_current_time(&self, seconds: f64) {
        let mut state = self.state.lock().unwrap();
        state.base_position_sec = seconds;
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
        drop(state);
        let _ = self.events.send(MediaEvent::Seeked);
    }

    fn duration(&self) -> Option<f64> {
        Some(MEDIA_DURATION_SEC)
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        vec![BufferedRange::new(0.0, MEDIA_DURATION_SEC)]
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    fn dispose(&self) {
        let mut state = self.state.lock().unwrap();
        state.disposed = true;
        state.paused = true;
        state.playing_since = None;
    }
}

struct SimulatedBackend;

#[async_trait]
impl MediaBackend for SimulatedBackend {
    async fn open(&self, url: &Url) -> SyncResult<Arc<dyn MediaElement>> {
        info!(%url, "opening simulated element");
        Ok(SimulatedElement::new())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("playback_sync=debug,live_session=info")),
        )
        .init();

    // Advertised start 10 seconds from now, 5 second connecting phase.
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_millis() as i64;
    let schedule = ScheduleSpec::new(
        now_ms + 10_000,
        Duration::from_secs(5),
        Duration::from_secs(120),
    );

    let resolver = Arc::new(|track: &TrackInfo| -> Option<Url> {
        format!("sim://tracks/{}.mp3", track.id).parse().ok()
    });
    let config = SessionConfig::new(schedule, "sim://session/primary".parse()?)
        .track_url_resolver(resolver)
        .fallback_track_ids(vec!["aurora".into(), "meridian".into(), "easterly".into()]);

    let mut session = PlaybackSyncSession::new(
        config,
        Arc::new(SimulatedBackend),
        SyncSettings::default(),
    );
    let mut events = session.subscribe();
    let _loop_handle = session.start().expect("session metadata is complete");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged(state)) => info!(?state, "phase changed"),
                Ok(SessionEvent::ConfidenceChanged(level)) => info!(?level, "confidence changed"),
                Ok(SessionEvent::Synchronizing(active)) => info!(active, "synchronizing overlay"),
                Ok(SessionEvent::Sample(sample)) => {
                    info!(drift = sample.drift_sec, position = sample.actual_position_sec, "sync sample");
                }
                Ok(SessionEvent::StreamEnded) => {
                    info!("stream ended");
                    break;
                }
                Ok(SessionEvent::FatalError { message }) => {
                    info!(message, "fatal media error");
                    break;
                }
                Err(_) => break,
            },
        }
    }

    session.dispose();
    Ok(())
}

//! The playback synchronization session.
//!
//! [`PlaybackSyncSession`] owns everything with a lifecycle: the connection
//! state machine, the optimistic estimator, one drift corrector per bound
//! media element, the background-audio track player, and the cooperative
//! timer loop that drives them. Slow work (the duration probe, the catalog
//! fetch, volume fades) runs on detached cancellable tasks that report back
//! through channels, so the loop always proceeds to the next tick
//! regardless of pending I/O.
//!
//! Every timer and subscription registered here is torn down when the
//! session is cancelled or dropped, including disposal of media elements,
//! which otherwise leak open network connections.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::catalog::fetch_catalog;
use crate::clock::{SystemClock, WallClock};
use crate::connection::ConnectionStateMachine;
use crate::corrector::{DriftCorrector, ElementRole, TickOutcome};
use crate::error::SyncError;
use crate::estimator::{self, OptimisticEstimator};
use crate::media::{MediaBackend, MediaElement, MediaEvent};
use crate::model::{
    ConfidenceLevel, ConnectionState, ScheduleSpec, SessionEvent, SyncSample, TrackInfo,
};
use crate::scheduler::{
    fade_curve, fallback_tracks, music_window_start_ms, seed_for_session, shuffle_tracks,
    TrackPlayer, TrackStart,
};
use crate::settings::SyncSettings;

/// Resolves a catalog track to its media URL.
///
/// Boxed callback in the configuration, cheap to clone across tasks.
pub type TrackUrlResolver = dyn Fn(&TrackInfo) -> Option<Url> + Send + Sync;

/// Inputs supplied by the session metadata collaborator.
///
/// A missing schedule or primary URL yields the terminal `Unavailable`
/// connection state rather than an error.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// The shared schedule all viewers derive their position from.
    pub schedule: Option<ScheduleSpec>,
    /// Primary (audio-bearing) media URL; the sync source.
    pub primary_url: Option<Url>,
    /// Optional secondary (visual-only) media URL, kept aligned to the
    /// primary rather than to the schedule.
    pub secondary_url: Option<Url>,
    /// Manifest URL for the estimator's background probe. Defaults to the
    /// primary URL.
    pub manifest_url: Option<Url>,
    /// Track catalog document URL, fetched once per session.
    pub catalog_url: Option<Url>,
    /// Resolves catalog tracks to media URLs. Background audio is disabled
    /// when absent.
    pub track_url_resolver: Option<Arc<TrackUrlResolver>>,
    /// Known track ids for fallback mode when the catalog cannot be
    /// fetched.
    pub fallback_track_ids: Vec<String>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print `track_url_resolver` to keep Debug output clean.
        f.debug_struct("SessionConfig")
            .field("schedule", &self.schedule)
            .field("primary_url", &self.primary_url)
            .field("secondary_url", &self.secondary_url)
            .field("manifest_url", &self.manifest_url)
            .field("catalog_url", &self.catalog_url)
            .field("fallback_track_ids", &self.fallback_track_ids)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(schedule: ScheduleSpec, primary_url: Url) -> Self {
        Self {
            schedule: Some(schedule),
            primary_url: Some(primary_url),
            ..Self::default()
        }
    }

    pub fn secondary_url(mut self, url: Url) -> Self {
        self.secondary_url = Some(url);
        self
    }

    pub fn manifest_url(mut self, url: Url) -> Self {
        self.manifest_url = Some(url);
        self
    }

    pub fn catalog_url(mut self, url: Url) -> Self {
        self.catalog_url = Some(url);
        self
    }

    pub fn track_url_resolver(mut self, resolver: Arc<TrackUrlResolver>) -> Self {
        self.track_url_resolver = Some(resolver);
        self
    }

    pub fn fallback_track_ids(mut self, ids: Vec<String>) -> Self {
        self.fallback_track_ids = ids;
        self
    }
}

/// Inbound commands from the UI layer.
#[derive(Debug, Clone, Copy)]
enum SessionCommand {
    /// Manual correction trigger.
    SyncNow,
}

/// State visible to accessors between loop iterations.
#[derive(Debug, Clone)]
struct Snapshot {
    state: ConnectionState,
    confidence: ConfidenceLevel,
    synchronizing: bool,
    last_sample: Option<SyncSample>,
}

/// Wall-clock-synchronized playback session.
///
/// Construct with [`PlaybackSyncSession::new`], then call
/// [`start`](Self::start) to spawn the control loop. Dropping the session
/// (or calling [`dispose`](Self::dispose)) cancels the loop and releases
/// all media elements.
pub struct PlaybackSyncSession {
    shared: Arc<RwLock<Snapshot>>,
    event_tx: broadcast::Sender<SessionEvent>,
    command_tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    runner: Option<SessionRunner>,
}

impl PlaybackSyncSession {
    /// Create a session using the system wall clock.
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn MediaBackend>,
        settings: SyncSettings,
    ) -> Self {
        Self::with_clock(config, backend, settings, Arc::new(SystemClock))
    }

    /// Create a session with an explicit wall clock (used by tests).
    pub fn with_clock(
        config: SessionConfig,
        backend: Arc<dyn MediaBackend>,
        settings: SyncSettings,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(settings.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let available = config.schedule.is_some() && config.primary_url.is_some();
        let shared = Arc::new(RwLock::new(Snapshot {
            state: if available {
                ConnectionState::Countdown
            } else {
                ConnectionState::Unavailable
            },
            confidence: ConfidenceLevel::Low,
            synchronizing: false,
            last_sample: None,
        }));

        let runner = available.then(|| SessionRunner {
            config,
            settings,
            backend,
            clock,
            shared: shared.clone(),
            event_tx: event_tx.clone(),
            command_rx,
            cancel: cancel.clone(),
        });

        Self {
            shared,
            event_tx,
            command_tx,
            cancel,
            runner,
        }
    }

    /// Spawn the control loop. Returns `None` when the session is
    /// unavailable or already started.
    pub fn start(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        let runner = self.runner.take()?;
        Some(tokio::spawn(runner.run()))
    }

    /// Current UI phase.
    pub fn state(&self) -> ConnectionState {
        self.shared
            .read()
            .map(|g| g.state)
            .unwrap_or(ConnectionState::Unavailable)
    }

    /// Current position-estimate confidence.
    pub fn confidence(&self) -> ConfidenceLevel {
        self.shared
            .read()
            .map(|g| g.confidence)
            .unwrap_or(ConfidenceLevel::Low)
    }

    /// Whether the "still synchronizing" overlay is raised.
    pub fn is_synchronizing(&self) -> bool {
        self.shared.read().map(|g| g.synchronizing).unwrap_or(false)
    }

    /// Most recent correction measurement, if any.
    pub fn last_sample(&self) -> Option<SyncSample> {
        self.shared.read().ok().and_then(|g| g.last_sample)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Manual correction trigger, for the UI to call when the page or app
    /// regains visibility after being backgrounded (timers may have been
    /// throttled while hidden). Bursts coalesce: when the command channel
    /// is full the request is already pending.
    pub fn sync_now(&self) {
        let _ = self.command_tx.try_send(SessionCommand::SyncNow);
    }

    /// Cancel the control loop and release all media elements.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PlaybackSyncSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owned state moved into the spawned control loop.
struct SessionRunner {
    config: SessionConfig,
    settings: SyncSettings,
    backend: Arc<dyn MediaBackend>,
    clock: Arc<dyn WallClock>,
    shared: Arc<RwLock<Snapshot>>,
    event_tx: broadcast::Sender<SessionEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionRunner {
    #[instrument(skip(self))]
    async fn run(self) {
        let SessionRunner {
            config,
            settings,
            backend,
            clock,
            shared,
            event_tx,
            mut command_rx,
            cancel,
        } = self;

        // `start()` refuses to spawn without these, but stay robust.
        let (Some(spec), Some(primary_url)) = (config.schedule, config.primary_url.clone()) else {
            return;
        };

        let primary = match backend.open(&primary_url).await {
            Ok(element) => element,
            Err(e) => {
                warn!(error = %e, "failed to open primary element");
                let _ = event_tx.send(SessionEvent::FatalError {
                    message: e.to_string(),
                });
                return;
            }
        };
        let secondary = match &config.secondary_url {
            Some(url) => match backend.open(url).await {
                Ok(element) => Some(element),
                Err(e) => {
                    // The visual-only feed is not load-bearing; go on
                    // without it.
                    warn!(error = %e, "failed to open secondary element");
                    None
                }
            },
            None => None,
        };

        // The catalog fetch runs concurrently with the loop so a slow or
        // unreachable catalog host cannot delay the countdown and live
        // transitions; the player arrives through its own select arm.
        let (catalog_tx, mut catalog_rx) = mpsc::channel::<TrackPlayer>(1);
        if config.track_url_resolver.is_some() {
            spawn_catalog_load(&config, &settings, spec, cancel.child_token(), catalog_tx);
        } else {
            drop(catalog_tx);
        }

        let secondary_corrector = secondary
            .as_ref()
            .map(|_| DriftCorrector::new(spec, ElementRole::Secondary, &settings));

        let mut primary_events = Some(primary.subscribe());
        let mut secondary_events = secondary.as_ref().map(|s| s.subscribe());
        let mut music_events: Option<broadcast::Receiver<MediaEvent>> = None;

        let probe_url = config
            .manifest_url
            .clone()
            .unwrap_or_else(|| primary_url.clone());
        let (probe_tx, mut probe_rx) = mpsc::channel::<crate::SyncResult<f64>>(1);
        let mut probe_spawned = false;

        let mut engine = Engine {
            settings: settings.clone(),
            clock,
            backend,
            cancel: cancel.clone(),
            shared,
            event_tx,
            machine: ConnectionStateMachine::new(Some(spec), true, settings.min_connecting_dwell),
            estimator: OptimisticEstimator::new(spec, settings.confidence_drift_threshold_sec),
            primary,
            secondary,
            primary_corrector: DriftCorrector::new(spec, ElementRole::Primary, &settings),
            secondary_corrector,
            track_player: None,
            track_resolver: config.track_url_resolver.clone(),
            music_element: None,
            last_sample: None,
            stream_ended_emitted: false,
        };

        let mut state_poll = tokio::time::interval(settings.state_poll_interval);
        state_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut estimator_refresh = tokio::time::interval(settings.estimator_refresh_interval);
        estimator_refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut music_poll = tokio::time::interval(settings.music_poll_interval);
        music_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let drift_timer = tokio::time::sleep(settings.first_correction_delay);
        tokio::pin!(drift_timer);

        debug!("session loop started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(command) = command_rx.recv() => match command {
                    SessionCommand::SyncNow => {
                        trace!("manual sync requested");
                        engine.correction_pass(true);
                    }
                },

                _ = state_poll.tick() => {
                    let entered_live = engine.poll_state();
                    if entered_live
                        && !probe_spawned
                        && engine.estimator.confidence() < ConfidenceLevel::High
                    {
                        probe_spawned = true;
                        spawn_probe(
                            engine.backend.clone(),
                            probe_url.clone(),
                            cancel.child_token(),
                            settings.probe_timeout,
                            probe_tx.clone(),
                        );
                    }
                }

                _ = estimator_refresh.tick() => {
                    engine.refresh_estimator();
                }

                () = &mut drift_timer => {
                    engine.correction_pass(false);
                    drift_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + settings.correction_interval);
                }

                Some(player) = catalog_rx.recv() => {
                    engine.track_player = Some(player);
                }

                Some(result) = probe_rx.recv() => match result {
                    Ok(duration) => engine.apply_probe_duration(duration),
                    Err(e) => warn!(error = %e, "manifest probe failed"),
                },

                event = next_media_event(&mut primary_events) => {
                    if let Some(event) = event {
                        engine.handle_primary_event(event);
                    }
                }

                event = next_media_event(&mut secondary_events) => {
                    if let Some(event) = event {
                        engine.handle_secondary_event(event);
                    }
                }

                event = next_media_event(&mut music_events) => {
                    if let Some(MediaEvent::Ended) = event {
                        if let Some(next) = engine.music_advance() {
                            music_events = engine.start_track(next).await;
                        } else {
                            music_events = None;
                        }
                    }
                }

                _ = music_poll.tick() => {
                    if engine.machine.state() == ConnectionState::Countdown {
                        if let Some(start) = engine.music_select() {
                            music_events = engine.start_track(start).await;
                        }
                    } else if engine.stop_music() {
                        music_events = None;
                    }
                }
            }
        }

        engine.teardown();
        debug!("session loop stopped");
    }
}

/// Resolve the track catalog (or fallback) into a deterministic player on a
/// background task, delivering it through `tx`.
fn spawn_catalog_load(
    config: &SessionConfig,
    settings: &SyncSettings,
    spec: ScheduleSpec,
    cancel: CancellationToken,
    tx: mpsc::Sender<TrackPlayer>,
) {
    let catalog_url = config.catalog_url.clone();
    let fallback_ids = config.fallback_track_ids.clone();
    let catalog_timeout = settings.catalog_timeout;
    let fallback_duration = settings.fallback_track_duration_sec;
    let window_lead_ms = settings.music_window_lead.as_millis() as i64;

    tokio::spawn(async move {
        let fetched: Option<Vec<TrackInfo>> = match &catalog_url {
            Some(url) => {
                let client = reqwest::Client::new();
                let fetch = fetch_catalog(&client, url, catalog_timeout);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    result = fetch => match result {
                        Ok(tracks) if !tracks.is_empty() => Some(tracks),
                        Ok(_) => None,
                        Err(e) => {
                            warn!(error = %e, "catalog fetch failed; using fallback durations");
                            None
                        }
                    },
                }
            }
            None => None,
        };

        let tracks = match fetched {
            Some(tracks) => tracks,
            None if !fallback_ids.is_empty() => {
                fallback_tracks(&fallback_ids, fallback_duration)
            }
            None => return,
        };

        let seed = seed_for_session(&spec);
        let order = shuffle_tracks(&tracks, seed);
        let window_start = music_window_start_ms(&spec, window_lead_ms);
        debug!(seed, tracks = order.ordered.len(), "track schedule built");
        let _ = tx.send(TrackPlayer::new(order, window_start)).await;
    });
}

fn spawn_probe(
    backend: Arc<dyn MediaBackend>,
    url: Url,
    cancel: CancellationToken,
    timeout: Duration,
    tx: mpsc::Sender<crate::SyncResult<f64>>,
) {
    tokio::spawn(async move {
        let result = estimator::probe_duration(backend, url, cancel, timeout).await;
        let _ = tx.send(result).await;
    });
}

/// Receive the next event from an optional subscription.
///
/// Pends forever on an empty slot so closed or absent elements simply
/// disable their select arm; lagged receivers skip quietly.
async fn next_media_event(
    slot: &mut Option<broadcast::Receiver<MediaEvent>>,
) -> Option<MediaEvent> {
    loop {
        if slot.is_none() {
            std::future::pending::<()>().await;
        }
        let closed = match slot.as_mut() {
            Some(rx) => match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "media event receiver lagged");
                    false
                }
                Err(broadcast::error::RecvError::Closed) => true,
            },
            None => return None,
        };
        if closed {
            *slot = None;
            return None;
        }
    }
}

/// Everything the loop mutates between ticks.
struct Engine {
    settings: SyncSettings,
    clock: Arc<dyn WallClock>,
    backend: Arc<dyn MediaBackend>,
    cancel: CancellationToken,
    shared: Arc<RwLock<Snapshot>>,
    event_tx: broadcast::Sender<SessionEvent>,
    machine: ConnectionStateMachine,
    estimator: OptimisticEstimator,
    primary: Arc<dyn MediaElement>,
    secondary: Option<Arc<dyn MediaElement>>,
    primary_corrector: DriftCorrector,
    secondary_corrector: Option<DriftCorrector>,
    track_player: Option<TrackPlayer>,
    track_resolver: Option<Arc<TrackUrlResolver>>,
    music_element: Option<Arc<dyn MediaElement>>,
    last_sample: Option<SyncSample>,
    stream_ended_emitted: bool,
}

impl Engine {
    /// Evaluate the connection machine. Returns true when this poll
    /// entered the live phase.
    fn poll_state(&mut self) -> bool {
        let now = self.clock.now_ms();
        let before = self.machine.state();
        let after = self.machine.evaluate(now, self.estimator.confidence());

        let entered_live = before != ConnectionState::Live && after == ConnectionState::Live;
        if entered_live {
            self.enter_live(now);
        }
        if after == ConnectionState::Live {
            self.ensure_playing();
        }
        if before != ConnectionState::Ended && after == ConnectionState::Ended {
            self.primary.pause();
            if let Some(secondary) = &self.secondary {
                secondary.pause();
            }
        }
        self.publish();
        entered_live
    }

    fn enter_live(&mut self, now_ms: i64) {
        info!("entering live phase");
        // Coarse estimate first (low→medium), then seed the first
        // correction with the best value available.
        self.estimator.refresh(now_ms);
        let seed = self.estimator.estimate(now_ms);
        self.primary_corrector.set_optimistic_seed(seed);

        if let Err(e) = self.primary.play() {
            warn!(error = %e, "primary playback start deferred");
        }
        if let Some(secondary) = &self.secondary {
            if let Err(e) = secondary.play() {
                warn!(error = %e, "secondary playback start deferred");
            }
        }
    }

    /// Autoplay rejection is recoverable: keep retrying while live.
    fn ensure_playing(&self) {
        if self.primary.is_paused() {
            if let Err(e) = self.primary.play() {
                trace!(error = %e, "primary play retry failed");
            }
        }
        if let Some(secondary) = &self.secondary {
            if secondary.is_paused() {
                if let Err(e) = secondary.play() {
                    trace!(error = %e, "secondary play retry failed");
                }
            }
        }
    }

    fn refresh_estimator(&mut self) {
        if self.machine.state() != ConnectionState::Live || self.estimator.is_ended() {
            return;
        }
        self.estimator.refresh(self.clock.now_ms());
        self.publish();
    }

    fn apply_probe_duration(&mut self, duration_sec: f64) {
        self.estimator
            .on_probe_duration(duration_sec, self.clock.now_ms());
        if self.estimator.is_ended() {
            self.signal_stream_ended();
        }
        self.publish();
    }

    /// One full correction pass: primary against the schedule, secondary
    /// against the primary's actual position.
    fn correction_pass(&mut self, forced: bool) {
        if self.machine.state() != ConnectionState::Live {
            return;
        }
        let now = self.clock.now_ms();

        match self.primary_corrector.tick(self.primary.as_ref(), now, forced) {
            TickOutcome::StreamEnded => {
                self.signal_stream_ended();
                return;
            }
            TickOutcome::InSync { sample }
            | TickOutcome::Seeked { sample, .. }
            | TickOutcome::CaughtUpToBuffer { sample, .. } => self.record_sample(sample),
            TickOutcome::Skipped(reason) => trace!(?reason, "primary tick skipped"),
        }

        self.correct_secondary(now, forced);
        self.publish();
    }

    fn correct_secondary(&mut self, now_ms: i64, forced: bool) {
        let (Some(corrector), Some(secondary)) =
            (self.secondary_corrector.as_mut(), self.secondary.as_ref())
        else {
            return;
        };
        let target = self.primary.current_time();
        match corrector.tick_against(secondary.as_ref(), target, now_ms, forced) {
            TickOutcome::Skipped(reason) => trace!(?reason, "secondary tick skipped"),
            outcome => trace!(?outcome, "secondary corrected"),
        }
    }

    fn handle_primary_event(&mut self, event: MediaEvent) {
        match event {
            // Correct immediately when playback state jumps.
            MediaEvent::Seeked | MediaEvent::Playing => self.correction_pass(true),
            MediaEvent::Ended => self.signal_stream_ended(),
            MediaEvent::FatalError { message } => {
                warn!(message, "primary media element failed");
                let _ = self
                    .event_tx
                    .send(SessionEvent::FatalError { message });
            }
            _ => {}
        }
    }

    fn handle_secondary_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Seeked | MediaEvent::Playing => {
                if self.machine.state() == ConnectionState::Live {
                    self.correct_secondary(self.clock.now_ms(), true);
                }
            }
            MediaEvent::FatalError { message } => {
                // The visual feed failing does not end the session.
                warn!(message, "secondary media element failed");
            }
            _ => {}
        }
    }

    fn signal_stream_ended(&mut self) {
        if !self.stream_ended_emitted {
            self.stream_ended_emitted = true;
            info!("primary stream ended");
            let _ = self.event_tx.send(SessionEvent::StreamEnded);
        }
        self.machine.on_stream_ended();
        self.publish();
    }

    fn record_sample(&mut self, sample: SyncSample) {
        self.last_sample = Some(sample);
        let _ = self.event_tx.send(SessionEvent::Sample(sample));
    }

    // ----------------------------
    // Background audio
    // ----------------------------

    fn music_select(&mut self) -> Option<TrackStart> {
        let now = self.clock.now_ms();
        self.track_player.as_mut()?.select(now)
    }

    fn music_advance(&mut self) -> Option<TrackStart> {
        self.track_player.as_mut()?.on_track_ended()
    }

    /// Start (or switch to) a scheduled track: fade the old one out, open
    /// the new element, seek to the deterministic offset, fade in.
    ///
    /// The fades run on detached tasks so the control loop keeps ticking
    /// while volume ramps.
    ///
    /// Returns the new element's event subscription, or `None` when the
    /// start was superseded or failed.
    async fn start_track(
        &mut self,
        mut start: TrackStart,
    ) -> Option<broadcast::Receiver<MediaEvent>> {
        let resolver = self.track_resolver.clone()?;
        let cycle_len = self
            .track_player
            .as_ref()
            .map(|p| p.order().ordered.len())
            .unwrap_or(1);

        // At most one full cycle of autoplay rejections before giving up.
        for _ in 0..cycle_len.max(1) {
            let Some(url) = resolver(&start.track) else {
                debug!(track = %start.track.id, "track has no resolvable URL; skipping");
                start = self.music_advance()?;
                continue;
            };

            if let Some(old) = self.music_element.take() {
                self.spawn_fade_out_and_dispose(old);
            }

            let element = match self.backend.open(&url).await {
                Ok(element) => element,
                Err(e) => {
                    warn!(error = %e, track = %start.track.id, "track open failed");
                    return None;
                }
            };

            // A newer selection may have superseded this load while the
            // open was in flight; stale attempts are discarded.
            let stale = self
                .track_player
                .as_ref()
                .map(|p| !p.is_current_attempt(start.attempt))
                .unwrap_or(true);
            if stale {
                trace!(attempt = start.attempt, "discarding superseded track start");
                element.dispose();
                return None;
            }

            element.set_volume(0.0);
            element.set_current_time(start.offset_sec);
            match element.play() {
                Ok(()) => {
                    let events = element.subscribe();
                    debug!(track = %start.track.id, offset = start.offset_sec, "track started");
                    self.spawn_fade_in(element.clone());
                    self.music_element = Some(element);
                    return Some(events);
                }
                Err(SyncError::AutoplayRejected) => {
                    debug!(track = %start.track.id, "autoplay rejected; advancing");
                    element.dispose();
                    start = self.music_advance()?;
                }
                Err(e) => {
                    warn!(error = %e, track = %start.track.id, "track playback failed");
                    element.dispose();
                    return None;
                }
            }
        }
        None
    }

    /// Fade out and release the current track. Returns true when there was
    /// one to stop.
    fn stop_music(&mut self) -> bool {
        let Some(element) = self.music_element.take() else {
            return false;
        };
        self.spawn_fade_out_and_dispose(element);
        if let Some(player) = &mut self.track_player {
            player.stop();
        }
        true
    }

    fn spawn_fade_in(&self, element: Arc<dyn MediaElement>) {
        let steps = self.fade_steps();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            for volume in fade_curve(steps) {
                if cancel.is_cancelled() {
                    return;
                }
                element.set_volume(volume);
                tokio::time::sleep(FADE_STEP).await;
            }
        });
    }

    /// Ramp the element down and dispose it. Cancellation cuts the ramp
    /// short but still disposes, so the element cannot leak its network
    /// session.
    fn spawn_fade_out_and_dispose(&self, element: Arc<dyn MediaElement>) {
        let steps = self.fade_steps();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            for volume in fade_curve(steps).into_iter().rev() {
                if cancel.is_cancelled() {
                    break;
                }
                element.set_volume(volume);
                tokio::time::sleep(FADE_STEP).await;
            }
            element.set_volume(0.0);
            element.dispose();
        });
    }

    fn fade_steps(&self) -> usize {
        (self.settings.track_fade.as_millis() / FADE_STEP.as_millis()).max(1) as usize
    }

    // ----------------------------
    // Publication
    // ----------------------------

    /// Push the current snapshot to accessors and emit change events.
    fn publish(&mut self) {
        let next = Snapshot {
            state: self.machine.state(),
            confidence: self.estimator.confidence(),
            synchronizing: self.machine.is_synchronizing(),
            last_sample: self.last_sample,
        };
        let previous = {
            let Ok(mut guard) = self.shared.write() else {
                return;
            };
            let previous = guard.clone();
            *guard = next.clone();
            previous
        };

        if previous.state != next.state {
            let _ = self.event_tx.send(SessionEvent::StateChanged(next.state));
        }
        if previous.confidence != next.confidence {
            let _ = self
                .event_tx
                .send(SessionEvent::ConfidenceChanged(next.confidence));
        }
        if previous.synchronizing != next.synchronizing {
            let _ = self
                .event_tx
                .send(SessionEvent::Synchronizing(next.synchronizing));
        }
    }

    /// Release every media element the session owns.
    fn teardown(&mut self) {
        self.primary.dispose();
        if let Some(secondary) = &self.secondary {
            secondary.dispose();
        }
        if let Some(element) = self.music_element.take() {
            element.dispose();
        }
    }
}

/// Step length of the linear volume fades.
const FADE_STEP: Duration = Duration::from_millis(50);

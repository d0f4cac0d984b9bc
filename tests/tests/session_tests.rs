//! Whole-session tests: the spawned control loop driven with paused tokio
//! time and a manual wall clock.
//!
//! Tokio's virtual time drives the session's internal timers (state poll,
//! drift ticks, fades); the `ManualClock` controls where "now" sits on the
//! schedule. Keeping the two separate lets a test hold the schedule still
//! while the loop runs as many ticks as it wants.

use std::sync::Arc;
use std::time::Duration;

use playback_sync::{
    fallback_tracks, music_window_start_ms, position_at, probe_duration, seed_for_session,
    shuffle_tracks, ConfidenceLevel, ConnectionState, MediaElement, MediaEvent,
    PlaybackSyncSession, ScheduleSpec, SessionConfig, SessionEvent, SyncError, SyncSettings,
    TrackInfo,
};
use tokio_util::sync::CancellationToken;
use url::Url;

mod sync_fixture;

use sync_fixture::{test_url, FakeBackend, ManualClock};

const START_MS: i64 = 1_700_000_000_000;
const CONNECTING: Duration = Duration::from_secs(30);
const SESSION_LEN: Duration = Duration::from_secs(1800);

fn spec() -> ScheduleSpec {
    ScheduleSpec::new(START_MS, CONNECTING, SESSION_LEN)
}

fn config() -> SessionConfig {
    SessionConfig::new(spec(), test_url("primary.m3u8"))
}

/// Let the loop's timers run for a while of virtual time. Long enough to
/// cover the 3s drift cadence plus a full fade and the following poll.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(4500)).await;
}

#[tokio::test(start_paused = true)]
async fn missing_schedule_is_terminally_unavailable() {
    let backend = FakeBackend::new();
    let clock = ManualClock::new(START_MS);
    let mut session = PlaybackSyncSession::with_clock(
        SessionConfig::default(),
        backend.clone(),
        SyncSettings::default(),
        clock,
    );

    assert_eq!(session.state(), ConnectionState::Unavailable);
    assert!(session.start().is_none());
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_walks_countdown_connecting_live_ended() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(START_MS - 10_000);
    let mut session = PlaybackSyncSession::with_clock(
        config(),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let handle = session.start().expect("session must start");

    settle().await;
    assert_eq!(session.state(), ConnectionState::Countdown);

    clock.set(START_MS);
    settle().await;
    assert_eq!(session.state(), ConnectionState::Connecting);

    clock.set(spec().effective_start_ms() + 10_000);
    settle().await;
    assert_eq!(session.state(), ConnectionState::Live);
    let primary = backend.element(0).expect("primary opened");
    assert!(!primary.is_paused());

    clock.set(spec().end_time_ms() + 1_000);
    settle().await;
    assert_eq!(session.state(), ConnectionState::Ended);
    assert!(primary.is_paused());

    session.dispose();
    let _ = handle.await;
    assert!(primary.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn go_live_corrects_toward_the_schedule_position() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(START_MS - 1_000);
    let mut session = PlaybackSyncSession::with_clock(
        config(),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");
    settle().await;

    let primary = backend.element(0).expect("primary opened");
    primary.script_buffered(vec![playback_sync::BufferedRange::new(0.0, 3600.0)]);
    primary.script_position(0.0);

    clock.set(START_MS);
    settle().await;
    // Join 40s into the media: the first correction must land there.
    clock.set(spec().effective_start_ms() + 40_000);
    settle().await;

    assert_eq!(session.state(), ConnectionState::Live);
    let seeks = primary.seeks();
    assert!(
        seeks.iter().any(|s| (s - 40.0).abs() < 2.0),
        "expected a seek near 40s, got {seeks:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn probe_confirms_duration_and_is_disposed() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(spec().effective_start_ms() + 10_000);
    let mut session = PlaybackSyncSession::with_clock(
        config(),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");
    settle().await;

    assert_eq!(session.state(), ConnectionState::Live);
    assert_eq!(session.confidence(), ConfidenceLevel::High);

    // Opens: primary, then the throwaway probe. The probe must be released.
    assert_eq!(backend.open_count(), 2);
    let probe = backend.element(1).expect("probe opened");
    assert!(probe.is_disposed());

    let primary = backend.element(0).expect("primary opened");
    assert!(!primary.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn late_joiner_overlay_clears_at_high_confidence() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(spec().effective_start_ms() + 60_000);
    let mut session = PlaybackSyncSession::with_clock(
        config(),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let mut events = session.subscribe();
    let _session_loop = session.start().expect("session must start");
    settle().await;

    // The probe agrees with the coarse estimate, so the overlay clears.
    assert!(!session.is_synchronizing());

    let mut raised = false;
    let mut cleared = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Synchronizing(on) = event {
            if on {
                raised = true;
            } else {
                assert!(raised, "overlay cleared before it was raised");
                cleared = true;
            }
        }
    }
    assert!(raised && cleared, "expected the overlay to raise then clear");
}

#[tokio::test(start_paused = true)]
async fn media_ended_event_terminates_the_session() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(spec().effective_start_ms() + 10_000);
    let mut session = PlaybackSyncSession::with_clock(
        config(),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let mut events = session.subscribe();
    let _session_loop = session.start().expect("session must start");
    settle().await;
    assert_eq!(session.state(), ConnectionState::Live);

    let primary = backend.element(0).expect("primary opened");
    primary.emit(MediaEvent::Ended);
    settle().await;

    assert_eq!(session.state(), ConnectionState::Ended);
    let mut saw_ended = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::StreamEnded) {
            saw_ended = true;
        }
    }
    assert!(saw_ended, "expected a StreamEnded event");
}

#[tokio::test(start_paused = true)]
async fn sync_now_forces_a_correction_while_paused() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(spec().effective_start_ms() + 20_000);
    let mut session = PlaybackSyncSession::with_clock(
        config(),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");
    settle().await;

    let primary = backend.element(0).expect("primary opened");
    // The platform keeps refusing to start playback.
    primary.script_autoplay_rejection(true);
    primary.pause();
    primary.script_buffered(vec![playback_sync::BufferedRange::new(0.0, 3600.0)]);
    primary.script_position(0.0);
    let before = primary.seeks().len();

    session.sync_now();
    settle().await;

    assert!(
        primary.seeks().len() > before,
        "manual sync must correct a paused element"
    );
}

#[tokio::test(start_paused = true)]
async fn secondary_element_follows_the_primary() {
    let backend = FakeBackend::with_auto_duration(3600.0);
    let clock = ManualClock::new(spec().effective_start_ms() + 10_000);
    let mut session = PlaybackSyncSession::with_clock(
        config().secondary_url(test_url("screen.m3u8")),
        backend.clone(),
        SyncSettings::default(),
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");
    settle().await;
    assert_eq!(session.state(), ConnectionState::Live);

    // Opens: primary, secondary, probe.
    assert_eq!(backend.open_count(), 3);
    let primary = backend.element(0).expect("primary opened");
    let secondary = backend.element(1).expect("secondary opened");

    // Primary already agrees with the schedule; only the secondary lags.
    clock.set(spec().effective_start_ms() + 90_000);
    primary.script_position(90.0);
    primary.script_buffered(vec![playback_sync::BufferedRange::new(0.0, 3600.0)]);
    secondary.script_position(10.0);
    secondary.script_buffered(vec![playback_sync::BufferedRange::new(0.0, 3600.0)]);
    settle().await;

    assert!(
        secondary.seeks().iter().any(|s| (s - 90.0).abs() < 0.01),
        "secondary must be driven to the primary's position, got {:?}",
        secondary.seeks()
    );
}

#[tokio::test(start_paused = true)]
async fn countdown_plays_the_deterministic_track() {
    let track_ids: Vec<String> = ["alpha", "bravo", "charlie"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let resolver = Arc::new(|track: &TrackInfo| -> Option<Url> {
        Some(test_url(&format!("tracks/{}.mp3", track.id)))
    });

    let settings = SyncSettings::default();
    // 270s into the music window, well before the advertised start.
    let now_ms = music_window_start_ms(&spec(), settings.music_window_lead.as_millis() as i64)
        + 270_000;

    let backend = FakeBackend::with_auto_duration(180.0);
    let clock = ManualClock::new(now_ms);
    let mut session = PlaybackSyncSession::with_clock(
        config()
            .track_url_resolver(resolver)
            .fallback_track_ids(track_ids.clone()),
        backend.clone(),
        settings.clone(),
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");
    settle().await;
    assert_eq!(session.state(), ConnectionState::Countdown);

    // Recompute the expected selection the same way any client would.
    let order = shuffle_tracks(
        &fallback_tracks(&track_ids, settings.fallback_track_duration_sec),
        seed_for_session(&spec()),
    );
    let window = music_window_start_ms(&spec(), settings.music_window_lead.as_millis() as i64);
    let expected = position_at(&order, window, now_ms).expect("inside the music window");

    // Opens: primary, then the countdown track.
    assert_eq!(backend.open_count(), 2);
    let track = backend.element(1).expect("track opened");
    assert_eq!(
        track.url(),
        Some(test_url(&format!(
            "tracks/{}.mp3",
            order.ordered[expected.index].id
        )))
    );
    assert!(
        track
            .seeks()
            .iter()
            .any(|s| (s - expected.offset_sec).abs() < 0.01),
        "track must start at the deterministic offset"
    );
    assert!(!track.is_paused());
    assert!((track.volume() - 1.0).abs() < f32::EPSILON, "faded in to full volume");

    // Entering connecting stops the background audio.
    clock.set(START_MS);
    settle().await;
    assert_eq!(session.state(), ConnectionState::Connecting);
    assert!(track.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn autoplay_rejection_advances_to_the_next_track() {
    let track_ids: Vec<String> = ["alpha", "bravo", "charlie"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let resolver = Arc::new(|track: &TrackInfo| -> Option<Url> {
        Some(test_url(&format!("tracks/{}.mp3", track.id)))
    });

    let settings = SyncSettings::default();
    let now_ms = music_window_start_ms(&spec(), settings.music_window_lead.as_millis() as i64)
        + 10_000;

    // The deterministically selected first track refuses autoplay.
    let order = shuffle_tracks(
        &fallback_tracks(&track_ids, settings.fallback_track_duration_sec),
        seed_for_session(&spec()),
    );
    let window = music_window_start_ms(&spec(), settings.music_window_lead.as_millis() as i64);
    let first = position_at(&order, window, now_ms).expect("inside the music window");
    let rejected_url = test_url(&format!("tracks/{}.mp3", order.ordered[first.index].id));
    let next_index = (first.index + 1) % order.ordered.len();
    let next_url = test_url(&format!("tracks/{}.mp3", order.ordered[next_index].id));

    let backend = FakeBackend::with_auto_duration(180.0);
    backend.script_reject_autoplay_for(rejected_url.clone());
    let clock = ManualClock::new(now_ms);
    let mut session = PlaybackSyncSession::with_clock(
        config()
            .track_url_resolver(resolver)
            .fallback_track_ids(track_ids),
        backend.clone(),
        settings,
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");

    settle().await;

    // Opens: primary, the rejected track, then its successor.
    assert_eq!(backend.open_count(), 3);
    let rejected = backend.element(1).expect("rejected track opened");
    assert_eq!(rejected.url(), Some(rejected_url));
    assert!(rejected.is_disposed());

    let playing = backend.element(2).expect("next track opened");
    assert_eq!(playing.url(), Some(next_url));
    assert!(!playing.is_paused());
    // The replacement starts from the top, not mid-track.
    assert!(playing.seeks().iter().any(|s| *s == 0.0));
}

#[tokio::test(start_paused = true)]
async fn loop_stays_responsive_while_a_track_fades() {
    let track_ids: Vec<String> = ["alpha", "bravo", "charlie"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let resolver = Arc::new(|track: &TrackInfo| -> Option<Url> {
        Some(test_url(&format!("tracks/{}.mp3", track.id)))
    });

    // A long fade makes the ramp observable across several poll ticks.
    let settings = SyncSettings::default().track_fade(Duration::from_secs(10));
    let now_ms = music_window_start_ms(&spec(), settings.music_window_lead.as_millis() as i64)
        + 10_000;

    let backend = FakeBackend::with_auto_duration(180.0);
    let clock = ManualClock::new(now_ms);
    let mut session = PlaybackSyncSession::with_clock(
        config()
            .track_url_resolver(resolver)
            .fallback_track_ids(track_ids),
        backend.clone(),
        settings,
        clock.clone(),
    );
    let _session_loop = session.start().expect("session must start");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(backend.open_count(), 2);
    let track = backend.element(1).expect("track opened");
    assert!(!track.is_paused());
    let mid_ramp = track.volume();
    assert!(
        mid_ramp > 0.0 && mid_ramp < 1.0,
        "fade should still be ramping, got {mid_ramp}"
    );

    // The state machine must not wait for the fade to finish.
    clock.set(START_MS);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), ConnectionState::Connecting);

    // The superseded track is still released once its fade-out runs.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(track.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn probe_surfaces_fatal_media_errors_and_disposes() {
    let backend = FakeBackend::new();
    let probe = tokio::spawn(probe_duration(
        backend.clone(),
        test_url("broken.m3u8"),
        CancellationToken::new(),
        Duration::from_secs(10),
    ));

    // Let the probe open and subscribe before the element fails.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let element = backend.element(0).expect("probe element opened");
    element.emit(MediaEvent::FatalError {
        message: "decode pipeline failed".into(),
    });

    let result = probe.await.expect("probe task");
    assert!(matches!(result, Err(SyncError::MediaFatal { .. })));
    assert!(element.is_disposed(), "probe element must be released");
}

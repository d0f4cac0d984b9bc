//! Coordination-free background-audio track scheduling.
//!
//! Given the session's calendar date, every client derives the same seed,
//! shuffles the track list identically, and computes the same
//! track-index/in-track-offset for any wall-clock instant, without any
//! shared server state or message exchange.
//!
//! The pseudo-random source is `frac(sin(seed + i) * 10000)`. This exact
//! formula (same transcendental, same shuffle order) is load-bearing:
//! clients that compute it differently will disagree on track order.

use chrono::{DateTime, Datelike, Utc};
use tracing::trace;

use crate::model::{ScheduleSpec, TrackInfo, TrackOrder, TrackPosition};

/// Seed for a calendar date: `year*10000 + month*100 + day`.
///
/// Stable per calendar day, not per exact timestamp, so every viewer of a
/// session on that day agrees regardless of when they joined.
pub fn seed_for_date(date: chrono::NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

/// Seed derived from the session's scheduled start date (UTC).
pub fn seed_for_session(spec: &ScheduleSpec) -> i64 {
    let date = DateTime::<Utc>::from_timestamp_millis(spec.start_timestamp_ms)
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
        .date_naive();
    seed_for_date(date)
}

/// Deterministic pseudo-random value in `[0, 1)` for a shuffle step.
pub fn pseudo_random(seed: i64, step: usize) -> f64 {
    let x = ((seed as f64) + step as f64).sin() * 10_000.0;
    x - x.floor()
}

/// Fisher–Yates shuffle seeded by the calendar-date seed.
///
/// At step `i` (walking down from the last index) the swap partner is
/// `floor(pseudo_random(seed, i) * (i + 1))`.
pub fn shuffle_tracks(tracks: &[TrackInfo], seed: i64) -> TrackOrder {
    let mut ordered = tracks.to_vec();
    let len = ordered.len();
    for i in (1..len).rev() {
        let r = pseudo_random(seed, i);
        let j = (r * (i as f64 + 1.0)).floor() as usize;
        // r < 1.0 guarantees j <= i, but guard against float edge cases.
        let j = j.min(i);
        ordered.swap(i, j);
    }
    TrackOrder { seed, ordered }
}

/// When the music window opens: a fixed lead before the effective start.
pub fn music_window_start_ms(spec: &ScheduleSpec, lead_ms: i64) -> i64 {
    spec.effective_start_ms() - lead_ms
}

/// Track index and in-track offset for `now_ms`, walking the ordered list
/// and wrapping modulo the total (the playlist loops).
///
/// Returns `None` before the window opens or when the order is empty.
pub fn position_at(order: &TrackOrder, window_start_ms: i64, now_ms: i64) -> Option<TrackPosition> {
    if now_ms < window_start_ms || order.ordered.is_empty() {
        return None;
    }
    let total: f64 = order.ordered.iter().map(|t| t.duration_sec).sum();
    if total <= 0.0 {
        return None;
    }

    let elapsed = (now_ms - window_start_ms) as f64 / 1000.0;
    let mut remaining = elapsed % total;
    for (index, track) in order.ordered.iter().enumerate() {
        if remaining < track.duration_sec {
            return Some(TrackPosition {
                index,
                offset_sec: remaining,
            });
        }
        remaining -= track.duration_sec;
    }
    // Float accumulation can leave a hair of remainder; wrap to the start.
    Some(TrackPosition {
        index: 0,
        offset_sec: 0.0,
    })
}

/// Build a catalog from bare track ids with a fixed assumed duration.
///
/// Fallback for catalog fetch failures: the deterministic math is
/// unchanged, only the durations are assumed.
pub fn fallback_tracks(ids: &[String], fallback_duration_sec: f64) -> Vec<TrackInfo> {
    ids.iter()
        .map(|id| TrackInfo::new(id.clone(), fallback_duration_sec))
        .collect()
}

/// What the player should start next.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStart {
    pub track: TrackInfo,
    pub index: usize,
    pub offset_sec: f64,
    /// Race guard: async callbacks carrying a stale attempt are discarded.
    pub attempt: u64,
}

/// Stateful track selection for one client.
///
/// Pure selection only; actual audio is driven by the session, which owns
/// the media element. The attempt counter makes delayed async callbacks
/// (e.g. a `canplay` from a superseded track load) into no-ops.
#[derive(Debug)]
pub struct TrackPlayer {
    order: TrackOrder,
    window_start_ms: i64,
    current_index: Option<usize>,
    attempt: u64,
}

impl TrackPlayer {
    pub fn new(order: TrackOrder, window_start_ms: i64) -> Self {
        Self {
            order,
            window_start_ms,
            current_index: None,
            attempt: 0,
        }
    }

    pub fn order(&self) -> &TrackOrder {
        &self.order
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Whether `attempt` still refers to the latest track selection.
    pub fn is_current_attempt(&self, attempt: u64) -> bool {
        self.attempt == attempt
    }

    /// Poll the schedule: returns a start request when the deterministic
    /// position points at a different track than the one playing.
    pub fn select(&mut self, now_ms: i64) -> Option<TrackStart> {
        let position = position_at(&self.order, self.window_start_ms, now_ms)?;
        if self.current_index == Some(position.index) {
            return None;
        }
        trace!(index = position.index, offset = position.offset_sec, "track selection changed");
        Some(self.start_at(position.index, position.offset_sec))
    }

    /// The current track finished: advance to the next index, wrapping.
    pub fn on_track_ended(&mut self) -> Option<TrackStart> {
        let len = self.order.ordered.len();
        if len == 0 {
            return None;
        }
        let next = self
            .current_index
            .map(|i| (i + 1) % len)
            .unwrap_or(0);
        Some(self.start_at(next, 0.0))
    }

    /// Playback was refused (autoplay policy): move on to the next track
    /// and retry rather than giving up.
    pub fn on_playback_rejected(&mut self) -> Option<TrackStart> {
        self.on_track_ended()
    }

    /// Leaving the countdown phase: forget the current track so a later
    /// re-entry reselects from the schedule.
    pub fn stop(&mut self) {
        self.current_index = None;
        self.attempt = self.attempt.wrapping_add(1);
    }

    fn start_at(&mut self, index: usize, offset_sec: f64) -> TrackStart {
        self.current_index = Some(index);
        self.attempt = self.attempt.wrapping_add(1);
        TrackStart {
            track: self.order.ordered[index].clone(),
            index,
            offset_sec,
            attempt: self.attempt,
        }
    }
}

/// Linear volume ramp used for fade-in/fade-out, as fractions in `[0, 1]`.
///
/// `steps` of 0 yields a single full-volume step (no fade).
pub fn fade_curve(steps: usize) -> Vec<f32> {
    if steps == 0 {
        return vec![1.0];
    }
    (1..=steps).map(|i| i as f32 / steps as f32).collect()
}

//! Core data models used by the `playback-sync` crate.
//!
//! This module is intentionally focused on *pure* types, with no networking
//! or I/O concerns. Higher-level modules (`corrector`, `connection`,
//! `estimator`, `session`) build on top of these types.

use std::time::Duration;

use serde::Deserialize;

/// Immutable per-session schedule.
///
/// The schedule is the only piece of shared state between viewers: every
/// client derives its playback position from this plus its own wall clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleSpec {
    /// Advertised session start, Unix epoch milliseconds.
    pub start_timestamp_ms: i64,
    /// Fixed connecting-phase delay between the advertised start and the
    /// instant media playback should read position 0.
    pub connecting_delay: Duration,
    /// Total scheduled session length.
    pub duration: Duration,
}

impl ScheduleSpec {
    pub fn new(start_timestamp_ms: i64, connecting_delay: Duration, duration: Duration) -> Self {
        Self {
            start_timestamp_ms,
            connecting_delay,
            duration,
        }
    }

    /// The instant media playback should read position 0.
    pub fn effective_start_ms(&self) -> i64 {
        self.start_timestamp_ms + self.connecting_delay.as_millis() as i64
    }

    /// The instant the session is scheduled to end.
    pub fn end_time_ms(&self) -> i64 {
        self.effective_start_ms() + self.duration.as_millis() as i64
    }
}

/// How trustworthy the current position estimate is.
///
/// Starts `Low`; becomes `Medium` once a coarse schedule-derived estimate
/// exists; becomes `High` once the manifest-verified estimate agrees with
/// the coarse one (or the manifest confirms the stream has ended).
///
/// Within one session lifetime confidence is monotonically non-decreasing;
/// it resets to `Low` only when a new [`ScheduleSpec`] is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

/// One measurement produced by a correction tick.
///
/// Ephemeral: logged at trace level, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSample {
    /// Wall clock at the time of the tick, Unix epoch milliseconds.
    pub wall_clock_ms: i64,
    /// Schedule-computed expected playback position, seconds.
    pub expected_elapsed_sec: f64,
    /// Actual media element position, seconds.
    pub actual_position_sec: f64,
    /// `actual - expected`, seconds. Positive means the player is ahead.
    pub drift_sec: f64,
}

/// UI phase gated by the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Before the advertised start: show the countdown.
    Countdown,
    /// Between the advertised start and the go-live condition.
    Connecting,
    /// Playback is (expected to be) running.
    Live,
    /// Wall clock passed the scheduled end, or the primary stream ended.
    Ended,
    /// Schedule or media URLs missing at initial evaluation. Terminal.
    Unavailable,
}

/// One background-audio track, sourced from the remote track catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackInfo {
    /// Stable identifier used to resolve the track's media URL.
    pub id: String,
    /// Track length in seconds.
    #[serde(rename = "durationSec")]
    pub duration_sec: f64,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>, duration_sec: f64) -> Self {
        Self {
            id: id.into(),
            duration_sec,
        }
    }
}

/// A deterministic ordering of tracks, a pure function of the seed.
///
/// Two clients with the same seed always produce the same `ordered` list.
/// This is the invariant that allows background-audio agreement without a
/// server broadcasting "now playing".
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOrder {
    pub seed: i64,
    pub ordered: Vec<TrackInfo>,
}

/// Track index plus in-track offset for a given wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub index: usize,
    pub offset_sec: f64,
}

/// A contiguous span of already-downloaded playback time on a media element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Whether `position` falls inside this range.
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

/// Outward-facing session event, broadcast to UI subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The UI phase changed.
    StateChanged(ConnectionState),
    /// The position-estimate confidence changed.
    ConfidenceChanged(ConfidenceLevel),
    /// The transient "still synchronizing" overlay was raised or cleared.
    Synchronizing(bool),
    /// The primary element reached the end of the recorded media.
    StreamEnded,
    /// A correction tick produced a measurement.
    Sample(SyncSample),
    /// The media backend reported an unrecoverable error.
    FatalError { message: String },
}

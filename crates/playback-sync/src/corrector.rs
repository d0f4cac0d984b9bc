//! Periodic drift correction for one bound media element.
//!
//! On each tick the corrector compares the element's actual position with
//! the schedule-computed expected position and issues a corrective seek only
//! when drift and buffering state permit it. Failures degrade to "retry next
//! tick". There is no fatal error path inside this module; unrecoverable
//! media errors are reported by the media backend, not synthesized here.

use tracing::{debug, trace};

use crate::clock::expected_elapsed_sec;
use crate::media::MediaElement;
use crate::model::{ScheduleSpec, SyncSample};
use crate::settings::SyncSettings;

/// Whether an element is the audio-bearing sync source.
///
/// Exactly one bound element is primary. Only the primary fires the
/// stream-ended signal; secondary elements (e.g. a screen-share feed) are
/// corrected with the same algorithm but never terminate playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    Primary,
    Secondary,
}

/// Per-element sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Synced,
}

/// Why a tick performed no correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The element has not reported a duration yet.
    NoDuration,
    /// The schedule has not reached the effective start.
    NotStarted,
    /// The element is paused and the tick was not forced.
    Paused,
    /// No buffered range can host the target; retry next tick.
    NothingBuffered,
    /// Target past the media's end on a secondary element, which never
    /// terminates playback.
    PastEnd,
}

/// Outcome of one correction tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Tick aborted before measuring.
    Skipped(SkipReason),
    /// Drift within tolerance; no seek issued.
    InSync { sample: SyncSample },
    /// Seeked directly to the target (target was buffered).
    Seeked { sample: SyncSample, seek_to: f64 },
    /// Target unbuffered; seeked to the edge of buffered content so
    /// playback can resume and catch up naturally.
    CaughtUpToBuffer { sample: SyncSample, seek_to: f64 },
    /// Target lies past the media's end: the recorded stream is over.
    /// Only emitted for the primary element.
    StreamEnded,
}

/// Drift corrector bound to one media element.
#[derive(Debug)]
pub struct DriftCorrector {
    spec: ScheduleSpec,
    role: ElementRole,
    state: SyncState,
    sync_threshold_sec: f64,
    seek_threshold_sec: f64,
    buffer_guard_sec: f64,
    /// Externally supplied seed for the very first correction of a freshly
    /// started player (the optimistic estimate for late joiners).
    optimistic_seed_sec: Option<f64>,
    first_correction_done: bool,
}

impl DriftCorrector {
    pub fn new(spec: ScheduleSpec, role: ElementRole, settings: &SyncSettings) -> Self {
        Self {
            spec,
            role,
            state: SyncState::Unsynced,
            sync_threshold_sec: settings.sync_threshold_sec,
            seek_threshold_sec: settings.seek_threshold_sec,
            buffer_guard_sec: settings.buffer_guard_sec,
            optimistic_seed_sec: None,
            first_correction_done: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn role(&self) -> ElementRole {
        self.role
    }

    /// Install the optimistic estimate consumed by the first correction.
    pub fn set_optimistic_seed(&mut self, seconds: f64) {
        if !self.first_correction_done {
            self.optimistic_seed_sec = Some(seconds);
        }
    }

    /// Run one correction tick against the schedule.
    ///
    /// `forced` ticks (manual trigger, visibility regain, `seeked`,
    /// `playing`) correct even while the element is paused.
    pub fn tick(&mut self, media: &dyn MediaElement, now_ms: i64, forced: bool) -> TickOutcome {
        let expected = expected_elapsed_sec(&self.spec, now_ms);
        if expected <= 0.0 {
            return TickOutcome::Skipped(SkipReason::NotStarted);
        }
        self.correct(media, expected, expected, now_ms, forced, true)
    }

    /// Run one correction tick against an externally supplied target.
    ///
    /// Used for secondary elements, which are kept aligned to the primary's
    /// actual position rather than to the schedule directly.
    pub fn tick_against(
        &mut self,
        media: &dyn MediaElement,
        target_sec: f64,
        now_ms: i64,
        forced: bool,
    ) -> TickOutcome {
        if target_sec <= 0.0 {
            return TickOutcome::Skipped(SkipReason::NotStarted);
        }
        self.correct(media, target_sec, target_sec, now_ms, forced, false)
    }

    fn correct(
        &mut self,
        media: &dyn MediaElement,
        schedule_target: f64,
        expected: f64,
        now_ms: i64,
        forced: bool,
        allow_seed: bool,
    ) -> TickOutcome {
        let duration = match media.duration() {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => return TickOutcome::Skipped(SkipReason::NoDuration),
        };

        if media.is_paused() && !forced {
            return TickOutcome::Skipped(SkipReason::Paused);
        }

        // The optimistic seed applies to the very first correction of a
        // freshly started player only, and only once the tick is actually
        // going to measure something.
        let target = if allow_seed && !self.first_correction_done {
            self.optimistic_seed_sec.take().unwrap_or(schedule_target)
        } else {
            schedule_target
        };

        if target > duration {
            return match self.role {
                ElementRole::Primary => {
                    debug!(target, duration, "target past media end; stream ended");
                    TickOutcome::StreamEnded
                }
                ElementRole::Secondary => TickOutcome::Skipped(SkipReason::PastEnd),
            };
        }

        // This tick completed the first correction, seeded or not.
        self.first_correction_done = true;

        let actual = media.current_time();
        let drift = actual - target;
        let sample = SyncSample {
            wall_clock_ms: now_ms,
            expected_elapsed_sec: expected,
            actual_position_sec: actual,
            drift_sec: drift,
        };
        trace!(?sample, role = ?self.role, "correction tick");

        if drift.abs() < self.sync_threshold_sec {
            self.state = SyncState::Synced;
            return TickOutcome::InSync { sample };
        }

        // Inner tolerance band: close enough to skip the seek without
        // claiming perfect sync. Kept as a second, smaller threshold to
        // avoid micro-seek thrash.
        if drift.abs() <= self.seek_threshold_sec {
            self.state = SyncState::Synced;
            return TickOutcome::InSync { sample };
        }

        let ranges = media.buffered();
        if ranges.is_empty() {
            // Nothing downloaded yet; retry next tick.
            return TickOutcome::Skipped(SkipReason::NothingBuffered);
        }

        if let Some(range) = ranges.iter().find(|r| r.contains(target)) {
            debug!(target, range_start = range.start, range_end = range.end, "seeking to target");
            media.set_current_time(target);
            self.state = SyncState::Unsynced;
            return TickOutcome::Seeked {
                sample,
                seek_to: target,
            };
        }

        // Target is unbuffered. If a range ends before the target, seek to
        // just inside its end and let playback catch up naturally instead
        // of stalling in a hole.
        if let Some(range) = ranges
            .iter()
            .filter(|r| r.end < target)
            .max_by(|a, b| a.end.total_cmp(&b.end))
        {
            let seek_to = (range.end - self.buffer_guard_sec).max(range.start);
            debug!(target, seek_to, "target unbuffered; seeking to buffer edge");
            media.set_current_time(seek_to);
            self.state = SyncState::Synced;
            return TickOutcome::CaughtUpToBuffer { sample, seek_to };
        }

        // Buffered data exists only beyond the target; skip this tick.
        TickOutcome::Skipped(SkipReason::NothingBuffered)
    }
}

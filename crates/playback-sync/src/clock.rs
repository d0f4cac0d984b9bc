//! Wall clock abstraction and the schedule clock.
//!
//! The schedule clock is a pure, total function: it maps a schedule and a
//! wall-clock instant to an expected playback position. Every other module
//! derives its notion of "where playback should be" from here.
//!
//! The [`WallClock`] trait exists so tests can drive every wall-clock branch
//! deterministically; production code uses [`SystemClock`].

use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::ScheduleSpec;

/// Source of the current wall-clock time in Unix epoch milliseconds.
pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Expected elapsed playback seconds for `now_ms`.
///
/// Pure and total; never errors. When `now_ms` precedes the effective start
/// the result is exactly 0; the schedule is not "negative", it floors.
pub fn expected_elapsed_sec(spec: &ScheduleSpec, now_ms: i64) -> f64 {
    let delta_ms = now_ms - spec.effective_start_ms();
    if delta_ms <= 0 {
        0.0
    } else {
        delta_ms as f64 / 1000.0
    }
}

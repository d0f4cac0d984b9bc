//! Two-phase optimistic position estimator for late joiners.
//!
//! Phase 1 returns an instantaneous coarse estimate straight from the
//! schedule clock. Phase 2 asynchronously opens a throwaway, muted media
//! probe (never rendered) purely to learn the total media duration, then
//! upgrades the confidence level if the verified estimate agrees with the
//! coarse one.
//!
//! The probe holds an open network session, so its destruction on cancel
//! or timeout is a mandatory scoped-resource release: [`probe_duration`]
//! disposes the element on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::clock::expected_elapsed_sec;
use crate::error::{SyncError, SyncResult};
use crate::media::{MediaBackend, MediaElement, MediaEvent};
use crate::model::{ConfidenceLevel, ScheduleSpec};

/// Stateful half of the estimator: coarse estimate, verified estimate, and
/// the monotonically non-decreasing confidence level.
#[derive(Debug)]
pub struct OptimisticEstimator {
    spec: ScheduleSpec,
    drift_threshold_sec: f64,
    /// Last displayed estimate, refreshed once per second by the caller so
    /// a long-loading probe does not freeze the value on screen.
    estimated_sec: Option<f64>,
    /// Media duration, recorded once the probe shows the schedule has run
    /// past the end of the recording.
    ended_at_sec: Option<f64>,
    confidence: ConfidenceLevel,
    ended: bool,
}

impl OptimisticEstimator {
    pub fn new(spec: ScheduleSpec, drift_threshold_sec: f64) -> Self {
        Self {
            spec,
            drift_threshold_sec,
            estimated_sec: None,
            ended_at_sec: None,
            confidence: ConfidenceLevel::Low,
            ended: false,
        }
    }

    /// Recompute the coarse estimate for `now_ms` and return it.
    ///
    /// The first call escalates confidence from low to medium: a coarse
    /// estimate now exists.
    pub fn refresh(&mut self, now_ms: i64) -> f64 {
        let value = expected_elapsed_sec(&self.spec, now_ms);
        self.estimated_sec = Some(value);
        self.escalate(ConfidenceLevel::Medium);
        value
    }

    /// Feed the media duration learned by the background probe.
    ///
    /// Recomputes the schedule estimate for `now_ms` first, since time has
    /// passed since the coarse read, so the stale value is never reused.
    pub fn on_probe_duration(&mut self, duration_sec: f64, now_ms: i64) {
        let current = expected_elapsed_sec(&self.spec, now_ms);

        if current > duration_sec {
            // The schedule has run past the recorded media: the stream has
            // ended. Terminal, not an error.
            debug!(current, duration_sec, "probe confirms stream has ended");
            self.ended_at_sec = Some(duration_sec);
            self.ended = true;
            self.escalate(ConfidenceLevel::High);
            return;
        }

        let displayed = self.estimated_sec.unwrap_or(current);
        let drift = (current - displayed).abs();
        if drift < self.drift_threshold_sec {
            self.escalate(ConfidenceLevel::High);
        }
        trace!(drift, confidence = ?self.confidence, "probe duration applied");
    }

    /// Best available estimate for `now_ms`: a fresh schedule read, clamped
    /// to the media duration once the probe shows the stream has ended.
    ///
    /// Always recomputed from the schedule so the value keeps advancing
    /// after verification; the probe only raises confidence in it.
    pub fn estimate(&self, now_ms: i64) -> f64 {
        if let Some(duration) = self.ended_at_sec {
            return duration;
        }
        expected_elapsed_sec(&self.spec, now_ms)
    }

    pub fn confidence(&self) -> ConfidenceLevel {
        self.confidence
    }

    /// Whether the probe determined the schedule is past the media's end.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Supply a new schedule, resetting confidence to low.
    ///
    /// This is the only path that lowers confidence within the crate.
    pub fn reset(&mut self, spec: ScheduleSpec) {
        *self = Self::new(spec, self.drift_threshold_sec);
    }

    fn escalate(&mut self, to: ConfidenceLevel) {
        if to > self.confidence {
            self.confidence = to;
        }
    }
}

/// Guard that disposes the probe element on drop, so cancellation and early
/// returns cannot leak the underlying network session.
struct ProbeGuard(Arc<dyn MediaElement>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Open a muted probe element for `manifest_url` and wait until it reports
/// a duration.
///
/// The element is disposed on every exit path: success, failure, timeout,
/// and cancellation.
#[instrument(skip(backend, cancel), fields(url = %manifest_url))]
pub async fn probe_duration(
    backend: Arc<dyn MediaBackend>,
    manifest_url: url::Url,
    cancel: CancellationToken,
    timeout: Duration,
) -> SyncResult<f64> {
    let open = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        opened = backend.open(&manifest_url) => opened,
    };
    let element = ProbeGuard(open?);
    element.0.set_volume(0.0);

    let mut events = element.0.subscribe();

    // The backend may have learned the duration before we subscribed.
    if let Some(d) = known_duration(element.0.as_ref()) {
        return Ok(d);
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = &mut deadline => {
                return Err(SyncError::ProbeFailed("timed out waiting for duration".into()));
            }
            ev = events.recv() => match ev {
                Ok(MediaEvent::LoadedMetadata { duration }) if duration.is_finite() && duration > 0.0 => {
                    return Ok(duration);
                }
                Ok(MediaEvent::FatalError { message }) => {
                    return Err(SyncError::MediaFatal { message });
                }
                Ok(_) => {
                    if let Some(d) = known_duration(element.0.as_ref()) {
                        return Ok(d);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "probe event receiver lagged");
                    if let Some(d) = known_duration(element.0.as_ref()) {
                        return Ok(d);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(SyncError::ProbeFailed("probe element closed".into()));
                }
            },
        }
    }
}

fn known_duration(element: &dyn MediaElement) -> Option<f64> {
    element
        .duration()
        .filter(|d| d.is_finite() && *d > 0.0)
}

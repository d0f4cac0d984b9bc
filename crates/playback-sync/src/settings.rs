//! Unified configuration for the `playback-sync` crate.
//!
//! This structure flattens all tuning knobs into a single type so callers
//! configure the engine in one place.
//!
//! Included configuration domains:
//! - Drift correction (tick cadence, sync/seek thresholds, buffer guard)
//! - Connection state machine (poll cadence, minimum connecting dwell)
//! - Optimistic estimator (refresh cadence, confidence threshold, probe timeout)
//! - Background-audio scheduling (music window lead, fades, fallback duration)
//! - Catalog fetching (request timeout)

use std::time::Duration;

/// Unified settings for wall-clock playback synchronization.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    // ----------------------------
    // Drift correction
    // ----------------------------
    /// Delay before the very first correction of a freshly started player.
    /// Default: 1 second.
    pub first_correction_delay: Duration,

    /// Interval between periodic correction ticks after the first one.
    /// Default: 3 seconds.
    pub correction_interval: Duration,

    /// Outer drift threshold below which the element is considered in sync.
    /// Default: 0.5 seconds.
    pub sync_threshold_sec: f64,

    /// Inner tolerance band: drift at or below this is treated as close
    /// enough without seeking, avoiding micro-seek thrash. Kept smaller
    /// than `sync_threshold_sec`. Default: 0.3 seconds.
    pub seek_threshold_sec: f64,

    /// Safety margin subtracted from a buffered range's end when seeking to
    /// the edge of buffered content. Default: 0.5 seconds.
    pub buffer_guard_sec: f64,

    // ----------------------------
    // Connection state machine
    // ----------------------------
    /// Cadence of the go-live condition poll. Default: 100 ms.
    pub state_poll_interval: Duration,

    /// Minimum time the connecting screen stays visible before the live
    /// transition may fire, preventing visual flash. Default: 500 ms.
    pub min_connecting_dwell: Duration,

    // ----------------------------
    // Optimistic estimator
    // ----------------------------
    /// Cadence at which the displayed estimate is recomputed while the
    /// manifest probe is still loading. Default: 1 second.
    pub estimator_refresh_interval: Duration,

    /// Maximum deviation between the coarse and manifest-verified estimates
    /// for confidence to escalate to high. Default: 0.5 seconds.
    pub confidence_drift_threshold_sec: f64,

    /// How long the background manifest probe may take before it is
    /// abandoned. Default: 10 seconds.
    pub probe_timeout: Duration,

    // ----------------------------
    // Background-audio scheduling
    // ----------------------------
    /// How far before the effective start the music window opens.
    /// Default: 10 minutes.
    pub music_window_lead: Duration,

    /// Cadence of the track-selection poll during the countdown phase.
    /// Default: 1 second.
    pub music_poll_interval: Duration,

    /// Length of the volume fade applied on track start and transitions.
    /// Default: 1 second.
    pub track_fade: Duration,

    /// Assumed per-track duration when the catalog cannot be fetched, so
    /// the deterministic scheduling math still holds. Default: 180 seconds.
    pub fallback_track_duration_sec: f64,

    // ----------------------------
    // Catalog fetching
    // ----------------------------
    /// Timeout for the one-per-session track catalog fetch.
    /// Default: 10 seconds.
    pub catalog_timeout: Duration,

    /// Capacity of the outward session event channel. Default: 64.
    pub event_channel_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            first_correction_delay: Duration::from_secs(1),
            correction_interval: Duration::from_secs(3),
            sync_threshold_sec: 0.5,
            seek_threshold_sec: 0.3,
            buffer_guard_sec: 0.5,

            state_poll_interval: Duration::from_millis(100),
            min_connecting_dwell: Duration::from_millis(500),

            estimator_refresh_interval: Duration::from_secs(1),
            confidence_drift_threshold_sec: 0.5,
            probe_timeout: Duration::from_secs(10),

            music_window_lead: Duration::from_secs(10 * 60),
            music_poll_interval: Duration::from_secs(1),
            track_fade: Duration::from_secs(1),
            fallback_track_duration_sec: 180.0,

            catalog_timeout: Duration::from_secs(10),
            event_channel_capacity: 64,
        }
    }
}

impl SyncSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings tuned for tight sync at the cost of more frequent seeks.
    pub fn strict(mut self) -> Self {
        self.correction_interval = Duration::from_secs(2);
        self.sync_threshold_sec = 0.3;
        self.seek_threshold_sec = 0.2;
        self
    }

    /// Settings tuned for poor networks: wider tolerance, slower cadence.
    pub fn relaxed(mut self) -> Self {
        self.correction_interval = Duration::from_secs(5);
        self.sync_threshold_sec = 1.0;
        self.seek_threshold_sec = 0.5;
        self
    }

    // -------------------------
    // Drift correction setters
    // -------------------------

    pub fn first_correction_delay(mut self, v: Duration) -> Self {
        self.first_correction_delay = v;
        self
    }

    pub fn correction_interval(mut self, v: Duration) -> Self {
        self.correction_interval = v;
        self
    }

    pub fn sync_threshold_sec(mut self, v: f64) -> Self {
        self.sync_threshold_sec = v;
        self
    }

    pub fn seek_threshold_sec(mut self, v: f64) -> Self {
        self.seek_threshold_sec = v;
        self
    }

    pub fn buffer_guard_sec(mut self, v: f64) -> Self {
        self.buffer_guard_sec = v;
        self
    }

    // -------------------------
    // Connection setters
    // -------------------------

    pub fn state_poll_interval(mut self, v: Duration) -> Self {
        self.state_poll_interval = v;
        self
    }

    pub fn min_connecting_dwell(mut self, v: Duration) -> Self {
        self.min_connecting_dwell = v;
        self
    }

    // -------------------------
    // Estimator setters
    // -------------------------

    pub fn estimator_refresh_interval(mut self, v: Duration) -> Self {
        self.estimator_refresh_interval = v;
        self
    }

    pub fn confidence_drift_threshold_sec(mut self, v: f64) -> Self {
        self.confidence_drift_threshold_sec = v;
        self
    }

    pub fn probe_timeout(mut self, v: Duration) -> Self {
        self.probe_timeout = v;
        self
    }

    // -------------------------
    // Music setters
    // -------------------------

    pub fn music_window_lead(mut self, v: Duration) -> Self {
        self.music_window_lead = v;
        self
    }

    pub fn music_poll_interval(mut self, v: Duration) -> Self {
        self.music_poll_interval = v;
        self
    }

    pub fn track_fade(mut self, v: Duration) -> Self {
        self.track_fade = v;
        self
    }

    pub fn fallback_track_duration_sec(mut self, v: f64) -> Self {
        self.fallback_track_duration_sec = v;
        self
    }

    // -------------------------
    // Misc setters
    // -------------------------

    pub fn catalog_timeout(mut self, v: Duration) -> Self {
        self.catalog_timeout = v;
        self
    }

    pub fn event_channel_capacity(mut self, v: usize) -> Self {
        self.event_channel_capacity = v;
        self
    }
}

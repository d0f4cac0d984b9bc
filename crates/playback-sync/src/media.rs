//! External media backend interface.
//!
//! The engine never decodes or transports media bytes itself: it drives an
//! external playback component through the traits defined here. The contract
//! mirrors what any HTML-media-like backend provides: load/play/pause,
//! position get/set, duration, buffered time ranges, and a small event
//! vocabulary.
//!
//! Implementations must be cheap to observe from a polling loop:
//! `current_time`, `duration`, `buffered` and `is_paused` are hot-path
//! getters called on every correction tick.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use crate::error::SyncResult;
use crate::model::BufferedRange;

/// Events emitted by a media element.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// Container metadata is available; `duration` is now known.
    LoadedMetadata { duration: f64 },
    /// Enough data is buffered to begin playback.
    CanPlay,
    /// Playback actually started or resumed.
    Playing,
    /// A seek operation completed.
    Seeked,
    /// Playback reached the end of the media.
    Ended,
    /// The backend hit an unrecoverable error. Terminal for this element.
    FatalError { message: String },
}

/// One bound media element (player surface).
///
/// Disposal is a mandatory scoped-resource release, not optional cleanup:
/// elements hold open network sessions. Callers must invoke
/// [`MediaElement::dispose`] when the element is no longer needed; a
/// disposed element ignores further calls.
pub trait MediaElement: Send + Sync {
    /// Point the element at a new media URL and begin background loading.
    fn load(&self, url: &Url) -> SyncResult<()>;

    /// Start or resume playback.
    ///
    /// Returns [`SyncError::AutoplayRejected`](crate::SyncError::AutoplayRejected)
    /// when the platform refuses to start without a user gesture.
    fn play(&self) -> SyncResult<()>;

    /// Pause playback.
    fn pause(&self);

    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Seek to `seconds`. Best-effort: completion is signalled via
    /// [`MediaEvent::Seeked`].
    fn set_current_time(&self, seconds: f64);

    /// Total media duration in seconds, once known.
    fn duration(&self) -> Option<f64>;

    /// Currently buffered time ranges, in playback order.
    fn buffered(&self) -> Vec<BufferedRange>;

    /// Whether the element is currently paused.
    fn is_paused(&self) -> bool;

    /// Set output volume, `0.0..=1.0`.
    fn set_volume(&self, volume: f32);

    /// Subscribe to this element's events.
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Release the element and any underlying network session.
    fn dispose(&self);
}

/// Factory for media elements.
///
/// The session uses this to open the primary and secondary players, the
/// estimator's throwaway manifest probe, and background-audio track players.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Open a new element already loading `url`.
    async fn open(&self, url: &Url) -> SyncResult<Arc<dyn MediaElement>>;
}

//! Wall-clock-synchronized playback without a coordination server.
//!
//! Every client derives its playback position independently from a shared
//! schedule and its own wall clock: `expected = now - effective_start`. A
//! periodic drift corrector nudges the local media element toward that
//! position, an optimistic estimator upgrades the coarse schedule-derived
//! estimate once the media manifest confirms the real duration, and a
//! connection state machine gates the countdown / connecting / live / ended
//! UI phases. Before the session starts, a deterministic track scheduler
//! plays the same background audio at the same offset for every viewer.
//!
//! The crate is transport-agnostic: media playback goes through the
//! [`MediaElement`] and [`MediaBackend`] traits, so any player that can
//! report position, duration, and buffered ranges can be synchronized.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use playback_sync::{
//!     MediaBackend, PlaybackSyncSession, ScheduleSpec, SessionConfig, SyncSettings,
//! };
//!
//! # async fn run(backend: Arc<dyn MediaBackend>) -> Result<(), Box<dyn std::error::Error>> {
//! let schedule = ScheduleSpec::new(
//!     1_700_000_000_000,
//!     Duration::from_secs(30),
//!     Duration::from_secs(3600),
//! );
//! let config = SessionConfig::new(schedule, "https://cdn.example/session.m3u8".parse()?);
//!
//! let mut session = PlaybackSyncSession::new(config, backend, SyncSettings::default());
//! let mut events = session.subscribe();
//! session.start();
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod catalog;
mod clock;
mod connection;
mod corrector;
mod error;
mod estimator;
mod media;
mod model;
mod scheduler;
mod session;
mod settings;

pub use catalog::fetch_catalog;
pub use clock::{expected_elapsed_sec, SystemClock, WallClock};
pub use connection::ConnectionStateMachine;
pub use corrector::{DriftCorrector, ElementRole, SkipReason, SyncState, TickOutcome};
pub use error::{SyncError, SyncResult};
pub use estimator::{probe_duration, OptimisticEstimator};
pub use media::{MediaBackend, MediaElement, MediaEvent};
pub use model::{
    BufferedRange, ConfidenceLevel, ConnectionState, ScheduleSpec, SessionEvent, SyncSample,
    TrackInfo, TrackOrder, TrackPosition,
};
pub use scheduler::{
    fade_curve, fallback_tracks, music_window_start_ms, position_at, pseudo_random, seed_for_date,
    seed_for_session, shuffle_tracks, TrackPlayer, TrackStart,
};
pub use session::{PlaybackSyncSession, SessionConfig, TrackUrlResolver};
pub use settings::SyncSettings;

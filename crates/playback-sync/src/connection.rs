//! Confidence-gated UI phase sequencing.
//!
//! The machine owns no playback logic: it only decides which UI phase is
//! visible and when the corrector/estimator are enabled. Transitions are
//! driven by a fast poll (`evaluate`) combining wall-clock checks with the
//! confidence level emitted by the optimistic estimator, and enforce a
//! minimum on-screen dwell per phase to avoid visual flicker.

use std::time::Duration;

use tracing::debug;

use crate::model::{ConfidenceLevel, ConnectionState, ScheduleSpec};

/// Sequencer for `countdown → connecting → live → ended`, plus the terminal
/// `unavailable` reached directly when schedule or media URLs are missing.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    spec: Option<ScheduleSpec>,
    min_dwell: Duration,
    state: ConnectionState,
    initialized: bool,
    /// When the connecting screen mounted; anchors the minimum-dwell rule.
    connecting_since_ms: Option<i64>,
    /// The connecting→live transition fires exactly once per mount even
    /// though the poll keeps running.
    live_fired: bool,
    /// Transient "still synchronizing" overlay for late joiners.
    synchronizing: bool,
}

impl ConnectionStateMachine {
    /// `available` is false when the session metadata collaborator could
    /// not supply the media URLs; together with a missing schedule this
    /// yields the terminal `Unavailable` state.
    pub fn new(spec: Option<ScheduleSpec>, available: bool, min_dwell: Duration) -> Self {
        let unavailable = spec.is_none() || !available;
        Self {
            spec,
            min_dwell,
            state: if unavailable {
                ConnectionState::Unavailable
            } else {
                ConnectionState::Countdown
            },
            initialized: false,
            connecting_since_ms: None,
            live_fired: false,
            synchronizing: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the "still synchronizing" overlay is raised.
    pub fn is_synchronizing(&self) -> bool {
        self.synchronizing
    }

    /// The primary element signalled end of the recorded media.
    pub fn on_stream_ended(&mut self) {
        if matches!(self.state, ConnectionState::Live | ConnectionState::Connecting) {
            debug!("stream-ended signal; entering ended state");
            self.state = ConnectionState::Ended;
        }
    }

    /// Re-evaluate the phase for `now_ms`. Called on a fast timer (~100ms).
    pub fn evaluate(&mut self, now_ms: i64, confidence: ConfidenceLevel) -> ConnectionState {
        let Some(spec) = self.spec else {
            return self.state;
        };
        if matches!(
            self.state,
            ConnectionState::Unavailable | ConnectionState::Ended
        ) {
            return self.state;
        }

        if !self.initialized {
            self.initialized = true;
            self.state = self.initial_state(&spec, now_ms);
            return self.state;
        }

        match self.state {
            ConnectionState::Countdown => {
                if now_ms >= spec.start_timestamp_ms {
                    debug!("countdown finished; entering connecting state");
                    self.state = ConnectionState::Connecting;
                    self.connecting_since_ms = Some(now_ms);
                }
            }
            ConnectionState::Connecting => {
                let dwell_elapsed = self
                    .connecting_since_ms
                    .map(|since| now_ms - since >= self.min_dwell.as_millis() as i64)
                    .unwrap_or(true);
                let ready = confidence == ConfidenceLevel::High
                    || now_ms >= spec.effective_start_ms();
                if !self.live_fired && dwell_elapsed && ready {
                    debug!(?confidence, "go-live condition met; entering live state");
                    self.live_fired = true;
                    self.state = ConnectionState::Live;
                }
            }
            ConnectionState::Live => {
                if self.synchronizing && confidence == ConfidenceLevel::High {
                    debug!("confidence high; clearing synchronizing overlay");
                    self.synchronizing = false;
                }
                if now_ms >= spec.end_time_ms() {
                    debug!("wall clock passed scheduled end; entering ended state");
                    self.state = ConnectionState::Ended;
                }
            }
            _ => {}
        }

        self.state
    }

    fn initial_state(&mut self, spec: &ScheduleSpec, now_ms: i64) -> ConnectionState {
        if now_ms >= spec.end_time_ms() {
            return ConnectionState::Ended;
        }
        if now_ms >= spec.effective_start_ms() {
            // Late joiner: enter live directly, but raise the transient
            // synchronizing overlay until the estimator reaches high
            // confidence. There was no countdown to anchor the dwell rule.
            debug!("late joiner; entering live with synchronizing overlay");
            self.live_fired = true;
            self.synchronizing = true;
            return ConnectionState::Live;
        }
        if now_ms >= spec.start_timestamp_ms {
            self.connecting_since_ms = Some(now_ms);
            return ConnectionState::Connecting;
        }
        ConnectionState::Countdown
    }
}

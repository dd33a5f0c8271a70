//! Frame delivery accounting
//!
//! Counts frames handed to the transport (`success`) and ticks where no
//! frame was ready (`loss`) in wall-clock aligned windows. When a window
//! ends its counts become the "last window" snapshot and counting restarts.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

use vsn_common::time::now_millis;

use crate::engine::FRAME_DURATION_MS;

/// Frames the transport asks for in one minute
pub const EXPECTED_PACKET_COUNT_PER_MIN: u64 = 60_000 / FRAME_DURATION_MS;

/// Gap between tracks still treated as continuous playback
pub const ACCEPTABLE_TRACK_SWITCH_TIME_MS: i64 = 100;

/// Counts for one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LossSnapshot {
    pub window_start_ms: i64,
    pub success: u64,
    pub loss: u64,
}

impl LossSnapshot {
    pub fn total(&self) -> u64 {
        self.success + self.loss
    }

    /// Fraction of lost ticks; 0 for an empty window
    pub fn loss_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.loss as f64 / total as f64,
        }
    }
}

#[derive(Debug)]
struct LossState {
    current: LossSnapshot,
    last: LossSnapshot,
    playing_since: Option<i64>,
    last_track_ended: Option<i64>,
}

/// Per-player success/loss tally
#[derive(Debug)]
pub struct AudioLossCounter {
    window_ms: i64,
    state: Mutex<LossState>,
}

impl AudioLossCounter {
    pub fn new(window: Duration) -> Self {
        Self::new_at(window, now_millis())
    }

    pub fn new_at(window: Duration, now_ms: i64) -> Self {
        let window_ms = (window.as_millis() as i64).max(1);
        let start = now_ms - now_ms.rem_euclid(window_ms);
        Self {
            window_ms,
            state: Mutex::new(LossState {
                current: LossSnapshot {
                    window_start_ms: start,
                    ..LossSnapshot::default()
                },
                last: LossSnapshot {
                    window_start_ms: start - window_ms,
                    ..LossSnapshot::default()
                },
                playing_since: None,
                last_track_ended: None,
            }),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms as u64)
    }

    /// Frames expected in one full window of continuous playback
    pub fn expected_per_window(&self) -> u64 {
        self.window_ms as u64 / FRAME_DURATION_MS
    }

    pub fn on_success(&self) {
        self.on_success_at(now_millis());
    }

    pub fn on_success_at(&self, now_ms: i64) {
        let mut state = self.state.lock();
        self.roll(&mut state, now_ms);
        state.current.success += 1;
    }

    pub fn on_loss(&self) {
        self.on_loss_at(now_millis());
    }

    pub fn on_loss_at(&self, now_ms: i64) {
        let mut state = self.state.lock();
        self.roll(&mut state, now_ms);
        state.current.loss += 1;
    }

    /// Counts in the window containing now
    pub fn snapshot(&self) -> LossSnapshot {
        self.snapshot_at(now_millis())
    }

    pub fn snapshot_at(&self, now_ms: i64) -> LossSnapshot {
        let mut state = self.state.lock();
        self.roll(&mut state, now_ms);
        state.current
    }

    /// Counts of the most recently completed window
    pub fn last_window(&self) -> LossSnapshot {
        self.last_window_at(now_millis())
    }

    pub fn last_window_at(&self, now_ms: i64) -> LossSnapshot {
        let mut state = self.state.lock();
        self.roll(&mut state, now_ms);
        state.last
    }

    pub fn on_track_start(&self) {
        self.on_track_start_at(now_millis());
    }

    pub fn on_track_start_at(&self, now_ms: i64) {
        let mut state = self.state.lock();
        let continuous = match (state.playing_since, state.last_track_ended) {
            (Some(_), Some(ended)) => now_ms - ended <= ACCEPTABLE_TRACK_SWITCH_TIME_MS,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !continuous {
            state.playing_since = Some(now_ms);
        }
        state.last_track_ended = None;
    }

    pub fn on_track_end(&self) {
        self.on_track_end_at(now_millis());
    }

    pub fn on_track_end_at(&self, now_ms: i64) {
        self.state.lock().last_track_ended = Some(now_ms);
    }

    /// Whether the last window reflects uninterrupted playback
    ///
    /// Requires playback to be running now (or paused for less than the
    /// track switch allowance) and to have started before the last window.
    pub fn is_data_usable(&self) -> bool {
        self.is_data_usable_at(now_millis())
    }

    pub fn is_data_usable_at(&self, now_ms: i64) -> bool {
        let mut state = self.state.lock();
        self.roll(&mut state, now_ms);

        if let Some(ended) = state.last_track_ended {
            if now_ms - ended > ACCEPTABLE_TRACK_SWITCH_TIME_MS {
                return false;
            }
        }
        match state.playing_since {
            Some(since) => since < state.last.window_start_ms,
            None => false,
        }
    }

    fn roll(&self, state: &mut LossState, now_ms: i64) {
        let start = now_ms - now_ms.rem_euclid(self.window_ms);
        if start <= state.current.window_start_ms {
            return;
        }

        let previous = start - self.window_ms;
        state.last = if state.current.window_start_ms == previous {
            state.current
        } else {
            // A whole window passed with no activity
            LossSnapshot {
                window_start_ms: previous,
                ..LossSnapshot::default()
            }
        };
        state.current = LossSnapshot {
            window_start_ms: start,
            ..LossSnapshot::default()
        };
    }
}

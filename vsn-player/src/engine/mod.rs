//! Decode engine contract
//!
//! The engine turns tracks into decodable audio and exposes transport-level
//! controls. The player core only talks to it through [`AudioEngine`];
//! [`local::LocalEngine`] is the in-process implementation shipped with the
//! node.
//!
//! Lifecycle notifications are explicit [`EngineEvent`] values delivered to
//! registered [`EngineListener`]s in the order the engine state changed.

pub mod encoder;
pub mod file_source;
pub mod load_result;
pub mod local;
pub mod resampler;
pub mod source;
pub mod track;
mod worker;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use vsn_common::events::ExceptionInfo;

use crate::error::Result;

pub use load_result::LoadResult;
pub use track::{AudioTrack, AudioTrackInfo};

/// Output sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48_000;

/// Output channel count (interleaved stereo)
pub const CHANNEL_COUNT: usize = 2;

/// Samples per channel in one 20 ms frame at 48 kHz
pub const FRAME_SAMPLES_PER_CHANNEL: usize = 960;

/// Interleaved samples in one frame
pub const FRAME_SAMPLES: usize = FRAME_SAMPLES_PER_CHANNEL * CHANNEL_COUNT;

pub use vsn_common::config::FRAME_DURATION_MS;

/// Largest encoded frame the engine can produce (16-bit PCM worst case)
pub const MAX_CHUNK_SIZE: usize = FRAME_SAMPLES * 2;

/// Engine volume range; 100 is unity gain
pub const MIN_VOLUME: i32 = 0;
pub const MAX_VOLUME: i32 = 1000;

/// PCM format handed to filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDataFormat {
    pub sample_rate: u32,
    pub channel_count: usize,
    pub chunk_sample_count: usize,
}

impl AudioDataFormat {
    /// 48 kHz interleaved stereo in 20 ms chunks
    pub const STANDARD: AudioDataFormat = AudioDataFormat {
        sample_rate: SAMPLE_RATE,
        channel_count: CHANNEL_COUNT,
        chunk_sample_count: FRAME_SAMPLES_PER_CHANNEL,
    };
}

/// Why a track stopped playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    /// Reached the end of its source
    Finished,
    /// Could not be opened or failed while decoding
    LoadFailed,
    /// Stopped explicitly
    Stopped,
    /// Another track was started in its place
    Replaced,
    /// Engine was torn down while the track was active
    Cleanup,
}

impl TrackEndReason {
    /// Wire name forwarded to the controller
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackEndReason::Finished => "FINISHED",
            TrackEndReason::LoadFailed => "LOAD_FAILED",
            TrackEndReason::Stopped => "STOPPED",
            TrackEndReason::Replaced => "REPLACED",
            TrackEndReason::Cleanup => "CLEANUP",
        }
    }

    /// Parse a wire name produced by [`as_str`](Self::as_str)
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "FINISHED" => Some(TrackEndReason::Finished),
            "LOAD_FAILED" => Some(TrackEndReason::LoadFailed),
            "STOPPED" => Some(TrackEndReason::Stopped),
            "REPLACED" => Some(TrackEndReason::Replaced),
            "CLEANUP" => Some(TrackEndReason::Cleanup),
            _ => None,
        }
    }

    /// Whether a queue owner may advance to the next track
    pub fn may_start_next(&self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

impl std::fmt::Display for TrackEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine lifecycle notification
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TrackStarted {
        track: Arc<AudioTrack>,
    },
    TrackEnded {
        track: Arc<AudioTrack>,
        reason: TrackEndReason,
    },
    TrackException {
        track: Arc<AudioTrack>,
        exception: ExceptionInfo,
    },
    TrackStuck {
        track: Arc<AudioTrack>,
        threshold_ms: u64,
    },
    PlayerPaused,
    PlayerResumed,
}

/// Receiver of engine lifecycle events
///
/// Called synchronously from whichever thread changed the engine state
/// (command handler or frame pull). Implementations must not block.
pub trait EngineListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// One PCM transform stage
///
/// Processes interleaved stereo f32 samples in place. Stages that change the
/// playback rate may grow or shrink the buffer.
pub trait PcmFilter: Send {
    fn process(&mut self, samples: &mut Vec<f32>);
}

/// Builds the filter stages applied to a track's audio
pub trait PcmFilterFactory: Send + Sync {
    fn build_chain(&self, track: &AudioTrack, format: &AudioDataFormat) -> Vec<Box<dyn PcmFilter>>;
}

/// Reusable frame buffer filled by [`AudioEngine::provide`]
#[derive(Debug)]
pub struct MutableAudioFrame {
    buffer: Vec<u8>,
    timecode_ms: u64,
    volume: i32,
}

impl MutableAudioFrame {
    /// Create a frame able to hold the largest encoded chunk
    pub fn new() -> Self {
        Self::with_capacity(MAX_CHUNK_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            timecode_ms: 0,
            volume: 100,
        }
    }

    /// Encoded bytes of the last stored frame
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear and hand out the backing buffer for the engine to write into
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        self.buffer.clear();
        &mut self.buffer
    }

    /// Position of the frame within its track
    pub fn timecode_ms(&self) -> u64 {
        self.timecode_ms
    }

    pub fn set_timecode_ms(&mut self, timecode_ms: u64) {
        self.timecode_ms = timecode_ms;
    }

    /// Volume the frame was produced at
    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume;
    }
}

impl Default for MutableAudioFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-guild decode engine handle
pub trait AudioEngine: Send + Sync {
    /// Start `track`, replacing whatever is playing
    fn play_track(&self, track: Arc<AudioTrack>);

    /// Stop the active track, if any
    fn stop_track(&self);

    /// End the active track as part of tearing the player down
    fn destroy(&self);

    fn playing_track(&self) -> Option<Arc<AudioTrack>>;

    fn set_paused(&self, paused: bool);

    fn is_paused(&self) -> bool;

    /// Set volume; the engine clamps to its supported range
    fn set_volume(&self, volume: i32);

    fn volume(&self) -> i32;

    /// Move `track` to `position_ms`; `track` must be the active track
    fn seek(&self, track: &Arc<AudioTrack>, position_ms: u64) -> Result<()>;

    /// Install (`Some`) or remove (`None`) the PCM transform factory
    fn set_filter_factory(&self, factory: Option<Arc<dyn PcmFilterFactory>>);

    fn has_filter_factory(&self) -> bool;

    /// Pull one frame into `frame`; false when no frame is available
    ///
    /// Called from the real-time transport loop. Never blocks for more
    /// than a bounded, sub-frame duration.
    fn provide(&self, frame: &mut MutableAudioFrame) -> bool;

    fn add_listener(&self, listener: Weak<dyn EngineListener>);
}

/// Creates one engine per player
pub trait EngineFactory: Send + Sync {
    fn create_engine(&self) -> Arc<dyn AudioEngine>;
}

/// Ordered, non-reentrant delivery of engine events
///
/// Events are queued while the engine state lock is held, so queue order is
/// state-change order. Whichever thread wins the dispatch lock drains the
/// queue; a thread that loses leaves its events to the winner instead of
/// waiting, so delivery never blocks a caller and listeners never run
/// concurrently.
#[derive(Default)]
pub struct EngineEventBus {
    pending: Mutex<VecDeque<EngineEvent>>,
    dispatching: Mutex<()>,
    listeners: Mutex<Vec<Weak<dyn EngineListener>>>,
}

impl EngineEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Weak<dyn EngineListener>) {
        self.listeners.lock().push(listener);
    }

    /// Queue an event for delivery
    pub fn push(&self, event: EngineEvent) {
        self.pending.lock().push_back(event);
    }

    /// Deliver all queued events, unless another thread is already doing so
    pub fn dispatch(&self) {
        loop {
            let Some(guard) = self.dispatching.try_lock() else {
                return;
            };

            loop {
                let next = self.pending.lock().pop_front();
                match next {
                    Some(event) => self.deliver(&event),
                    None => break,
                }
            }

            drop(guard);

            // An event queued between the last pop and the unlock would
            // otherwise wait for the next dispatch
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, event: &EngineEvent) {
        let listeners: Vec<Arc<dyn EngineListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            listener.on_event(event);
        }
    }
}

//! Scripted engine for player tests
//!
//! Emits lifecycle events the same way the local engine does (queued under
//! the state lock, dispatched after it) and records every call.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use vsn_player::engine::{
    AudioEngine, AudioTrack, EngineEvent, EngineEventBus, EngineFactory, EngineListener,
    MutableAudioFrame, PcmFilterFactory, TrackEndReason, MAX_VOLUME, MIN_VOLUME,
};
use vsn_player::error::{Error, Result};

/// Bytes written by every provided frame
pub const SPY_FRAME: [u8; 4] = [0xF8, 0xFF, 0xFE, 0x00];

#[derive(Default)]
struct SpyState {
    track: Option<Arc<AudioTrack>>,
    paused: bool,
    volume: i32,
    factory: Option<Arc<dyn PcmFilterFactory>>,
    starving: bool,
}

#[derive(Default)]
pub struct SpyEngine {
    state: Mutex<SpyState>,
    events: EngineEventBus,
    calls: Mutex<Vec<String>>,
}

impl SpyEngine {
    pub fn new() -> Arc<Self> {
        let engine = Self::default();
        engine.state.lock().volume = 100;
        Arc::new(engine)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make `provide` fail until reset
    pub fn set_starving(&self, starving: bool) {
        self.state.lock().starving = starving;
    }

    pub fn filter_factory(&self) -> Option<Arc<dyn PcmFilterFactory>> {
        self.state.lock().factory.clone()
    }

    /// Simulate the active track reaching its end
    pub fn finish(&self) {
        self.end(TrackEndReason::Finished);
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn end(&self, reason: TrackEndReason) {
        {
            let mut state = self.state.lock();
            if let Some(track) = state.track.take() {
                self.events.push(EngineEvent::TrackEnded { track, reason });
            }
        }
        self.events.dispatch();
    }
}

impl AudioEngine for SpyEngine {
    fn play_track(&self, track: Arc<AudioTrack>) {
        self.record(format!("play:{}", track.info().identifier));
        {
            let mut state = self.state.lock();
            if let Some(old) = state.track.replace(Arc::clone(&track)) {
                self.events.push(EngineEvent::TrackEnded {
                    track: old,
                    reason: TrackEndReason::Replaced,
                });
            }
            self.events.push(EngineEvent::TrackStarted { track });
        }
        self.events.dispatch();
    }

    fn stop_track(&self) {
        self.record("stop".to_string());
        self.end(TrackEndReason::Stopped);
    }

    fn destroy(&self) {
        self.record("destroy".to_string());
        self.end(TrackEndReason::Cleanup);
    }

    fn playing_track(&self) -> Option<Arc<AudioTrack>> {
        self.state.lock().track.clone()
    }

    fn set_paused(&self, paused: bool) {
        self.record(format!("pause:{}", paused));
        {
            let mut state = self.state.lock();
            if state.paused == paused {
                return;
            }
            state.paused = paused;
            self.events.push(if paused {
                EngineEvent::PlayerPaused
            } else {
                EngineEvent::PlayerResumed
            });
        }
        self.events.dispatch();
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn set_volume(&self, volume: i32) {
        self.record(format!("volume:{}", volume));
        self.state.lock().volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
    }

    fn volume(&self) -> i32 {
        self.state.lock().volume
    }

    fn seek(&self, track: &Arc<AudioTrack>, position_ms: u64) -> Result<()> {
        self.record(format!("seek:{}", position_ms));
        if track.info().is_stream {
            return Err(Error::Engine("Cannot seek a stream".to_string()));
        }
        track.set_position_ms(position_ms.min(track.info().length_ms.max(0) as u64));
        Ok(())
    }

    fn set_filter_factory(&self, factory: Option<Arc<dyn PcmFilterFactory>>) {
        self.record(format!("filters:{}", factory.is_some()));
        self.state.lock().factory = factory;
    }

    fn has_filter_factory(&self) -> bool {
        self.state.lock().factory.is_some()
    }

    fn provide(&self, frame: &mut MutableAudioFrame) -> bool {
        let state = self.state.lock();
        if state.paused || state.starving || state.track.is_none() {
            return false;
        }
        frame.buffer_mut().extend_from_slice(&SPY_FRAME);
        true
    }

    fn add_listener(&self, listener: Weak<dyn EngineListener>) {
        self.events.add_listener(listener);
    }
}

/// Hands out spy engines and keeps them for inspection
#[derive(Default)]
pub struct SpyFactory {
    engines: Mutex<Vec<Arc<SpyEngine>>>,
}

impl SpyFactory {
    pub fn engines(&self) -> Vec<Arc<SpyEngine>> {
        self.engines.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<SpyEngine>> {
        self.engines.lock().last().cloned()
    }
}

impl EngineFactory for SpyFactory {
    fn create_engine(&self) -> Arc<dyn AudioEngine> {
        let engine = SpyEngine::new();
        self.engines.lock().push(Arc::clone(&engine));
        engine
    }
}

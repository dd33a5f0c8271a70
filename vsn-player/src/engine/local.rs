//! In-process decode engine
//!
//! [`LocalPlayerManager`] owns the source registry and hands out one
//! [`LocalEngine`] per player. Each engine runs a decode worker per active
//! track and applies filters, volume and encoding on the frame path.
//!
//! The frame path never waits on the state lock for longer than
//! [`PROVIDE_LOCK_WAIT`]; if a command holds it longer the frame is skipped.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vsn_common::events::{ExceptionInfo, Severity};
use vsn_common::NodeConfig;

use super::encoder::{FrameEncoder, PcmS16Encoder};
use super::load_result::LoadResult;
use super::source::SourceRegistry;
use super::worker::{DecodeWorker, DecodedChunk};
use super::{
    AudioDataFormat, AudioEngine, AudioTrack, EngineEvent, EngineEventBus, EngineFactory,
    EngineListener, MutableAudioFrame, PcmFilter, PcmFilterFactory, TrackEndReason,
    CHANNEL_COUNT, FRAME_DURATION_MS, FRAME_SAMPLES, MAX_VOLUME, MIN_VOLUME, SAMPLE_RATE,
};
use crate::error::{Error, Result};

/// Longest the frame path waits for the engine state lock
pub const PROVIDE_LOCK_WAIT: Duration = Duration::from_millis(2);

/// Continuous starvation after which a track is reported stuck
pub const STUCK_THRESHOLD: Duration = Duration::from_secs(10);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Source registry plus engine settings shared by all players
#[derive(Clone)]
pub struct LocalPlayerManager {
    sources: Arc<SourceRegistry>,
    encoder: Arc<dyn FrameEncoder>,
    buffer_chunks: usize,
    default_volume: i32,
}

impl LocalPlayerManager {
    /// Manager with the default sources and 16-bit PCM output
    pub fn new(config: &NodeConfig) -> Self {
        Self::with_sources(config, SourceRegistry::with_defaults())
    }

    pub fn with_sources(config: &NodeConfig, sources: SourceRegistry) -> Self {
        let buffer_chunks = (config.frame_buffer_duration_ms / FRAME_DURATION_MS).max(1) as usize;
        Self {
            sources: Arc::new(sources),
            encoder: Arc::new(PcmS16Encoder),
            buffer_chunks,
            default_volume: config.default_volume.clamp(MIN_VOLUME, MAX_VOLUME),
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn FrameEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Resolve an identifier into tracks
    pub fn load_item(&self, identifier: &str) -> LoadResult {
        info!("Loading identifier \"{}\"", identifier);
        let result = self.sources.load_item(identifier);
        debug!("Identifier \"{}\" resolved to {:?}", identifier, result.load_type());
        result
    }

    /// New engine with this manager's settings
    pub fn new_engine(&self) -> Arc<LocalEngine> {
        Arc::new(LocalEngine {
            sources: Arc::clone(&self.sources),
            encoder: Arc::clone(&self.encoder),
            buffer_chunks: self.buffer_chunks,
            state: Mutex::new(EngineState {
                active: None,
                filter_factory: None,
            }),
            events: EngineEventBus::new(),
            paused: AtomicBool::new(false),
            volume: AtomicI32::new(self.default_volume),
        })
    }
}

impl EngineFactory for LocalPlayerManager {
    fn create_engine(&self) -> Arc<dyn AudioEngine> {
        self.new_engine()
    }
}

/// Decode engine for one player
pub struct LocalEngine {
    sources: Arc<SourceRegistry>,
    encoder: Arc<dyn FrameEncoder>,
    buffer_chunks: usize,
    state: Mutex<EngineState>,
    events: EngineEventBus,
    paused: AtomicBool,
    volume: AtomicI32,
}

struct EngineState {
    active: Option<ActiveTrack>,
    filter_factory: Option<Arc<dyn PcmFilterFactory>>,
}

/// What the frame path found when filling a frame
enum Fill {
    Ready,
    Starved,
    Ended,
    Failed(String),
}

struct ActiveTrack {
    track: Arc<AudioTrack>,
    worker: DecodeWorker,
    consumer: HeapCons<DecodedChunk>,
    epoch: u32,
    filters: Vec<Box<dyn PcmFilter>>,
    /// Filtered samples waiting to be framed
    pending: VecDeque<f32>,
    scratch: Vec<f32>,
    /// Source position of the last seek and frames consumed since
    base_ms: u64,
    consumed_frames: u64,
    source_ended: bool,
    starved_since: Option<Instant>,
    stuck_reported: bool,
}

impl ActiveTrack {
    fn fill(&mut self) -> Fill {
        while self.pending.len() < FRAME_SAMPLES && !self.source_ended {
            match self.consumer.try_pop() {
                Some(chunk) if chunk.epoch() != self.epoch => continue,
                Some(DecodedChunk::Pcm { mut samples, .. }) => {
                    self.consumed_frames += (samples.len() / CHANNEL_COUNT) as u64;
                    for filter in self.filters.iter_mut() {
                        filter.process(&mut samples);
                    }
                    self.pending.extend(samples);
                }
                Some(DecodedChunk::End { .. }) => self.source_ended = true,
                Some(DecodedChunk::Failed { message, .. }) => return Fill::Failed(message),
                None => break,
            }
        }

        if self.pending.len() >= FRAME_SAMPLES {
            Fill::Ready
        } else if self.source_ended {
            if self.pending.is_empty() {
                Fill::Ended
            } else {
                // Last partial frame, padded with silence
                self.pending.resize(FRAME_SAMPLES, 0.0);
                Fill::Ready
            }
        } else {
            Fill::Starved
        }
    }

    fn position_ms(&self) -> u64 {
        self.base_ms + self.consumed_frames * 1000 / SAMPLE_RATE as u64
    }

    fn emit(&mut self, frame: &mut MutableAudioFrame, volume: i32, encoder: &dyn FrameEncoder) {
        let gain = volume as f32 / 100.0;
        self.scratch.clear();
        self.scratch
            .extend(self.pending.drain(..FRAME_SAMPLES).map(|s| s * gain));

        encoder.encode(&self.scratch, frame.buffer_mut());

        let position = self.position_ms();
        frame.set_timecode_ms(position);
        frame.set_volume(volume);
        self.track.set_position_ms(position);

        self.starved_since = None;
        self.stuck_reported = false;
    }

    /// Record starvation; true once it crosses the stuck threshold
    fn starved(&mut self, now: Instant) -> bool {
        let since = *self.starved_since.get_or_insert(now);
        if !self.stuck_reported && now.duration_since(since) >= STUCK_THRESHOLD {
            self.stuck_reported = true;
            return true;
        }
        false
    }
}

fn build_filters(
    factory: Option<&dyn PcmFilterFactory>,
    track: &AudioTrack,
) -> Vec<Box<dyn PcmFilter>> {
    match factory {
        Some(factory) => factory.build_chain(track, &AudioDataFormat::STANDARD),
        None => Vec::new(),
    }
}

impl LocalEngine {
    fn open(&self, track: &AudioTrack) -> Result<(DecodeWorker, HeapCons<DecodedChunk>)> {
        let mut source = self.sources.open(track)?;

        let position = track.position_ms();
        if position > 0 && !track.info().is_stream {
            source.seek(position)?;
        }

        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        DecodeWorker::spawn(&id.to_string(), source, self.buffer_chunks)
    }

    fn end_active(&self, reason: TrackEndReason) {
        {
            let mut state = self.state.lock();
            if let Some(old) = state.active.take() {
                debug!("Ending track {} ({})", old.track.info().identifier, reason);
                old.worker.stop();
                self.events.push(EngineEvent::TrackEnded {
                    track: old.track,
                    reason,
                });
            }
        }
        self.events.dispatch();
    }
}

impl AudioEngine for LocalEngine {
    fn play_track(&self, track: Arc<AudioTrack>) {
        info!("Starting track {}", track.info().identifier);
        let opened = self.open(&track);

        {
            let mut state = self.state.lock();
            let EngineState {
                active,
                filter_factory,
            } = &mut *state;

            if let Some(old) = active.take() {
                old.worker.stop();
                self.events.push(EngineEvent::TrackEnded {
                    track: old.track,
                    reason: TrackEndReason::Replaced,
                });
            }

            self.events.push(EngineEvent::TrackStarted {
                track: Arc::clone(&track),
            });

            match opened {
                Ok((worker, consumer)) => {
                    let base_ms = track.position_ms();
                    *active = Some(ActiveTrack {
                        filters: build_filters(filter_factory.as_deref(), &track),
                        track,
                        worker,
                        consumer,
                        epoch: 0,
                        pending: VecDeque::with_capacity(FRAME_SAMPLES * 2),
                        scratch: Vec::with_capacity(FRAME_SAMPLES),
                        base_ms,
                        consumed_frames: 0,
                        source_ended: false,
                        starved_since: None,
                        stuck_reported: false,
                    });
                }
                Err(e) => {
                    warn!("Failed to open track {}: {}", track.info().identifier, e);
                    self.events.push(EngineEvent::TrackException {
                        track: Arc::clone(&track),
                        exception: ExceptionInfo {
                            message: Some(e.to_string()),
                            severity: Severity::Common,
                            cause: "open".to_string(),
                        },
                    });
                    self.events.push(EngineEvent::TrackEnded {
                        track,
                        reason: TrackEndReason::LoadFailed,
                    });
                }
            }
        }

        self.events.dispatch();
    }

    fn stop_track(&self) {
        self.end_active(TrackEndReason::Stopped);
    }

    fn destroy(&self) {
        self.end_active(TrackEndReason::Cleanup);
    }

    fn playing_track(&self) -> Option<Arc<AudioTrack>> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|a| Arc::clone(&a.track))
    }

    fn set_paused(&self, paused: bool) {
        {
            let _state = self.state.lock();
            if self.paused.swap(paused, Ordering::AcqRel) == paused {
                return;
            }
            self.events.push(if paused {
                EngineEvent::PlayerPaused
            } else {
                EngineEvent::PlayerResumed
            });
        }
        self.events.dispatch();
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn set_volume(&self, volume: i32) {
        self.volume
            .store(volume.clamp(MIN_VOLUME, MAX_VOLUME), Ordering::Relaxed);
    }

    fn volume(&self) -> i32 {
        self.volume.load(Ordering::Relaxed)
    }

    fn seek(&self, track: &Arc<AudioTrack>, position_ms: u64) -> Result<()> {
        if track.info().is_stream {
            return Err(Error::Engine("Cannot seek a stream".to_string()));
        }

        let mut state = self.state.lock();
        let EngineState {
            active,
            filter_factory,
        } = &mut *state;

        let active = active
            .as_mut()
            .filter(|a| Arc::ptr_eq(&a.track, track))
            .ok_or_else(|| Error::InvalidState("Track is not playing".to_string()))?;

        let position = position_ms.min(track.info().length_ms.max(0) as u64);
        active.epoch = active.epoch.wrapping_add(1);
        active.worker.seek(position, active.epoch);

        active.pending.clear();
        active.base_ms = position;
        active.consumed_frames = 0;
        active.source_ended = false;
        active.starved_since = None;
        active.filters = build_filters(filter_factory.as_deref(), &active.track);
        track.set_position_ms(position);

        debug!("Seeked {} to {}ms", track.info().identifier, position);
        Ok(())
    }

    fn set_filter_factory(&self, factory: Option<Arc<dyn PcmFilterFactory>>) {
        let mut state = self.state.lock();
        let EngineState {
            active,
            filter_factory,
        } = &mut *state;

        *filter_factory = factory;
        if let Some(active) = active.as_mut() {
            active.filters = build_filters(filter_factory.as_deref(), &active.track);
        }
    }

    fn has_filter_factory(&self) -> bool {
        self.state.lock().filter_factory.is_some()
    }

    fn provide(&self, frame: &mut MutableAudioFrame) -> bool {
        if self.paused.load(Ordering::Acquire) {
            return false;
        }

        let Some(mut state) = self.state.try_lock_for(PROVIDE_LOCK_WAIT) else {
            return false;
        };
        let Some(active) = state.active.as_mut() else {
            return false;
        };

        match active.fill() {
            Fill::Ready => {
                active.emit(frame, self.volume(), self.encoder.as_ref());
                return true;
            }
            Fill::Starved => {
                if active.starved(Instant::now()) {
                    warn!(
                        "Track {} got stuck waiting for audio",
                        active.track.info().identifier
                    );
                    self.events.push(EngineEvent::TrackStuck {
                        track: Arc::clone(&active.track),
                        threshold_ms: STUCK_THRESHOLD.as_millis() as u64,
                    });
                }
            }
            Fill::Ended => {
                if let Some(done) = state.active.take() {
                    debug!("Track {} finished", done.track.info().identifier);
                    self.events.push(EngineEvent::TrackEnded {
                        track: done.track,
                        reason: TrackEndReason::Finished,
                    });
                }
            }
            Fill::Failed(message) => {
                if let Some(failed) = state.active.take() {
                    warn!(
                        "Track {} failed while playing: {}",
                        failed.track.info().identifier,
                        message
                    );
                    self.events.push(EngineEvent::TrackException {
                        track: Arc::clone(&failed.track),
                        exception: ExceptionInfo {
                            message: Some(message),
                            severity: Severity::Suspicious,
                            cause: "decode".to_string(),
                        },
                    });
                    self.events.push(EngineEvent::TrackEnded {
                        track: failed.track,
                        reason: TrackEndReason::LoadFailed,
                    });
                }
            }
        }

        drop(state);
        self.events.dispatch();
        false
    }

    fn add_listener(&self, listener: Weak<dyn EngineListener>) {
        self.events.add_listener(listener);
    }
}

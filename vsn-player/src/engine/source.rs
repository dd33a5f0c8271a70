//! Audio sources
//!
//! A [`SourceManager`] resolves identifiers into tracks and reopens tracks
//! for decoding. Every [`PcmSource`] yields 48 kHz interleaved stereo f32.

use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::debug;
use vsn_common::events::Severity;

use super::file_source::LocalSourceManager;
use super::load_result::LoadResult;
use super::track::{AudioTrack, AudioTrackInfo, UNKNOWN_LENGTH_MS};
use super::{FRAME_SAMPLES_PER_CHANNEL, SAMPLE_RATE};
use crate::error::{Error, Result};

/// Decoded PCM stream for one track
pub trait PcmSource: Send {
    /// Append the next block of samples to `out`; `Ok(0)` at end of stream
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize>;

    /// Jump to `position_ms`
    fn seek(&mut self, position_ms: u64) -> Result<()>;
}

/// Resolves identifiers and opens tracks of one kind
pub trait SourceManager: Send + Sync {
    /// Name stored in tracks as their source
    fn name(&self) -> &'static str;

    /// Resolve an identifier; `None` when this source does not handle it
    fn load_item(&self, identifier: &str) -> Option<LoadResult>;

    /// Open a previously loaded (or decoded) track for playback
    fn open(&self, track: &AudioTrack) -> Result<Box<dyn PcmSource>>;
}

/// Ordered set of source managers
#[derive(Clone, Default)]
pub struct SourceRegistry {
    managers: Vec<Arc<dyn SourceManager>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the tone generator and local files
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ToneSourceManager));
        registry.register(Arc::new(LocalSourceManager));
        registry
    }

    pub fn register(&mut self, manager: Arc<dyn SourceManager>) {
        debug!("Registered source manager {}", manager.name());
        self.managers.push(manager);
    }

    /// Ask each source in registration order
    pub fn load_item(&self, identifier: &str) -> LoadResult {
        self.managers
            .iter()
            .find_map(|m| m.load_item(identifier))
            .unwrap_or(LoadResult::NoMatches)
    }

    /// Open a track with the source that produced it
    pub fn open(&self, track: &AudioTrack) -> Result<Box<dyn PcmSource>> {
        let source_name = &track.info().source_name;
        let manager = self
            .managers
            .iter()
            .find(|m| m.name() == source_name)
            .ok_or_else(|| Error::Engine(format!("No source manager named {}", source_name)))?;
        manager.open(track)
    }
}

/// Identifier prefix handled by [`ToneSourceManager`]
pub const TONE_PREFIX: &str = "tone:";

const TONE_AMPLITUDE: f64 = 0.5;

/// Sine tone generator
///
/// Identifiers look like `tone:<hz>` (endless stream) or
/// `tone:<hz>:<duration_ms>`. The frequency is carried in the track payload.
pub struct ToneSourceManager;

impl ToneSourceManager {
    fn parse(identifier: &str) -> Option<std::result::Result<(f64, Option<u64>), String>> {
        let spec = identifier.strip_prefix(TONE_PREFIX)?;
        let mut parts = spec.splitn(2, ':');

        let frequency = match parts.next().map(str::parse::<f64>) {
            Some(Ok(hz)) if hz.is_finite() && hz > 0.0 && hz < SAMPLE_RATE as f64 / 2.0 => hz,
            _ => return Some(Err(format!("Invalid tone frequency in {}", identifier))),
        };
        let duration = match parts.next() {
            None => None,
            Some(text) => match text.parse::<u64>() {
                Ok(ms) => Some(ms),
                Err(_) => return Some(Err(format!("Invalid tone duration in {}", identifier))),
            },
        };

        Some(Ok((frequency, duration)))
    }
}

impl SourceManager for ToneSourceManager {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn load_item(&self, identifier: &str) -> Option<LoadResult> {
        let (frequency, duration) = match Self::parse(identifier)? {
            Ok(parsed) => parsed,
            Err(message) => return Some(LoadResult::failed(message, Severity::Common, "tone")),
        };

        let info = AudioTrackInfo {
            title: format!("Tone {} Hz", frequency),
            author: "Tone generator".to_string(),
            length_ms: duration.map(|d| d as i64).unwrap_or(UNKNOWN_LENGTH_MS),
            identifier: identifier.to_string(),
            is_stream: duration.is_none(),
            uri: Some(identifier.to_string()),
            source_name: self.name().to_string(),
        };

        Some(LoadResult::TrackLoaded(AudioTrack::new(
            info,
            frequency.to_be_bytes().to_vec(),
        )))
    }

    fn open(&self, track: &AudioTrack) -> Result<Box<dyn PcmSource>> {
        let frequency = match <[u8; 8]>::try_from(track.payload()) {
            Ok(bytes) => f64::from_be_bytes(bytes),
            Err(_) => match Self::parse(&track.info().identifier) {
                Some(Ok((hz, _))) => hz,
                _ => {
                    return Err(Error::Engine(format!(
                        "Tone track {} has no frequency",
                        track.info().identifier
                    )))
                }
            },
        };

        let total_frames = if track.info().is_stream {
            None
        } else {
            Some(track.info().length_ms.max(0) as u64 * SAMPLE_RATE as u64 / 1000)
        };

        Ok(Box::new(ToneSource {
            frequency,
            frame_index: 0,
            total_frames,
        }))
    }
}

/// Generated sine wave
pub struct ToneSource {
    frequency: f64,
    frame_index: u64,
    total_frames: Option<u64>,
}

impl PcmSource for ToneSource {
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        let mut frames = FRAME_SAMPLES_PER_CHANNEL as u64;
        if let Some(total) = self.total_frames {
            frames = frames.min(total.saturating_sub(self.frame_index));
        }

        for _ in 0..frames {
            let t = self.frame_index as f64 / SAMPLE_RATE as f64;
            let sample = (TONE_AMPLITUDE * (TAU * self.frequency * t).sin()) as f32;
            out.push(sample);
            out.push(sample);
            self.frame_index += 1;
        }

        Ok(frames as usize * 2)
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        let target = position_ms * SAMPLE_RATE as u64 / 1000;
        self.frame_index = match self.total_frames {
            Some(total) => target.min(total),
            None => target,
        };
        Ok(())
    }
}

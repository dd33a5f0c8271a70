//! Local file source using symphonia
//!
//! Identifiers are filesystem paths. A directory loads as a playlist of the
//! audio files directly inside it, sorted by name.
//!
//! Decoded audio is converted to stereo (mono duplicated, extra channels
//! folded) and resampled to 48 kHz.

use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::units::Time;
use tracing::{debug, warn};
use vsn_common::events::Severity;

use super::load_result::LoadResult;
use super::resampler::StreamResampler;
use super::source::{PcmSource, SourceManager};
use super::track::{AudioTrack, AudioTrackInfo, UNKNOWN_LENGTH_MS};
use super::SAMPLE_RATE;
use crate::error::{Error, Result};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "m4a", "mp4", "aac", "wav"];

/// Source for files on the local filesystem
pub struct LocalSourceManager;

impl LocalSourceManager {
    fn load_file(&self, path: &Path) -> LoadResult {
        match probe(path) {
            Ok(probed) => LoadResult::TrackLoaded(self.track_for(path, probed)),
            Err(e) => LoadResult::failed(
                format!("Unsupported audio file {}", path.display()),
                Severity::Common,
                e.to_string(),
            ),
        }
    }

    fn load_directory(&self, dir: &Path) -> LoadResult {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                return LoadResult::failed(
                    format!("Cannot read directory {}", dir.display()),
                    Severity::Suspicious,
                    e.to_string(),
                )
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_audio_extension(p))
            .collect();
        paths.sort();

        let tracks: Vec<AudioTrack> = paths
            .iter()
            .filter_map(|path| match probe(path) {
                Ok(probed) => Some(self.track_for(path, probed)),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        if tracks.is_empty() {
            return LoadResult::NoMatches;
        }

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        LoadResult::PlaylistLoaded {
            name,
            tracks,
            selected: None,
        }
    }

    fn track_for(&self, path: &Path, mut probed: ProbeResult) -> AudioTrack {
        let mut title = None;
        let mut author = None;

        // Container metadata wins over tags found while probing
        let mut read_tags = |revision: &MetadataRevision| {
            for tag in revision.tags() {
                match tag.std_key {
                    Some(StandardTagKey::TrackTitle) => title = Some(tag.value.to_string()),
                    Some(StandardTagKey::Artist) => author = Some(tag.value.to_string()),
                    _ => {}
                }
            }
        };
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                read_tags(revision);
            }
        }
        if let Some(revision) = probed.format.metadata().current() {
            read_tags(revision);
        }

        let length_ms = probed
            .format
            .default_track()
            .and_then(|t| Some((t.codec_params.n_frames?, t.codec_params.sample_rate?)))
            .map(|(frames, rate)| (frames * 1000 / rate as u64) as i64);

        let identifier = path.display().to_string();
        let title = title.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| identifier.clone())
        });

        AudioTrack::new(
            AudioTrackInfo {
                title,
                author: author.unwrap_or_else(|| "Unknown artist".to_string()),
                length_ms: length_ms.unwrap_or(UNKNOWN_LENGTH_MS),
                identifier: identifier.clone(),
                is_stream: length_ms.is_none(),
                uri: Some(identifier),
                source_name: self.name().to_string(),
            },
            Vec::new(),
        )
    }
}

impl SourceManager for LocalSourceManager {
    fn name(&self) -> &'static str {
        "local"
    }

    fn load_item(&self, identifier: &str) -> Option<LoadResult> {
        let path = Path::new(identifier);
        if path.is_dir() {
            Some(self.load_directory(path))
        } else if path.is_file() {
            Some(self.load_file(path))
        } else {
            None
        }
    }

    fn open(&self, track: &AudioTrack) -> Result<Box<dyn PcmSource>> {
        let source = FileSource::open(Path::new(&track.info().identifier))?;
        Ok(Box::new(source))
    }
}

fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn probe(path: &Path) -> Result<ProbeResult> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Engine(format!("Failed to probe {}: {}", path.display(), e)))
}

/// Decoding state for one open file
pub struct FileSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    stereo: Vec<f32>,
    resampler: Option<StreamResampler>,
    finished: bool,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let probed = probe(path)?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| Error::Engine(format!("No audio track in {}", path.display())))?;
        let track_id = track.id;
        let native_rate = track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Engine(format!("Unsupported codec in {}: {}", path.display(), e)))?;

        let resampler = if native_rate != SAMPLE_RATE {
            debug!(
                "Resampling {} from {}Hz to {}Hz",
                path.display(),
                native_rate,
                SAMPLE_RATE
            );
            Some(StreamResampler::for_rates(native_rate, SAMPLE_RATE)?)
        } else {
            None
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            stereo: Vec::new(),
            resampler,
            finished: false,
        })
    }

    /// Decode the next packet into `self.stereo`; false at end of file
    fn decode_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::Engine(format!("Failed to read packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet, skip it
                    debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(Error::Engine(format!("Decoder failed: {}", e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let needed = decoded.capacity();
            if self
                .sample_buf
                .as_ref()
                .map_or(true, |b| b.capacity() < needed * channels)
            {
                self.sample_buf = Some(SampleBuffer::new(needed as u64, spec));
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                fold_to_stereo(buf.samples(), channels, &mut self.stereo);
            }
            return Ok(true);
        }
    }
}

impl PcmSource for FileSource {
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        if self.finished {
            return Ok(0);
        }

        let start = out.len();
        // Resampling may swallow a whole packet into its input chunk
        while out.len() == start {
            self.stereo.clear();
            if !self.decode_packet()? {
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.flush(out)?;
                }
                self.finished = true;
                break;
            }

            match self.resampler.as_mut() {
                Some(resampler) => resampler.process(&self.stereo, out)?,
                None => out.extend_from_slice(&self.stereo),
            }
        }

        Ok(out.len() - start)
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Engine(format!("Seek failed: {}", e)))?;

        self.decoder.reset();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.finished = false;
        Ok(())
    }
}

/// Convert interleaved audio with any channel count to interleaved stereo
fn fold_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(samples),
        n => {
            // Even channels fold left, odd channels fold right
            let per_side = (n as f32 / 2.0).max(1.0);
            for frame in samples.chunks_exact(n) {
                let (mut left, mut right) = (0.0f32, 0.0f32);
                for (i, &s) in frame.iter().enumerate() {
                    if i % 2 == 0 {
                        left += s;
                    } else {
                        right += s;
                    }
                }
                out.push(left / per_side);
                out.push(right / per_side);
            }
        }
    }
}

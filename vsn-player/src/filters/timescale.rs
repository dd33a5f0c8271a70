//! Speed, pitch and rate changes
//!
//! Speed is an overlap-add time stretch; rate resamples (changing speed and
//! pitch together); pitch is a stretch followed by a compensating resample.
//! The filter changes the number of samples per chunk.

use once_cell::sync::Lazy;
use rubato::{FastFixedIn, PolynomialDegree};
use std::f32::consts::TAU;
use tracing::{debug, info};

use crate::engine::resampler::StreamResampler;
use crate::engine::{AudioDataFormat, PcmFilter, CHANNEL_COUNT};
use crate::error::{Error, Result};

/// Set to disable timescale processing on this node
pub const DISABLE_ENV_VAR: &str = "VSN_DISABLE_TIMESCALE";

/// Grain length in frames
const GRAIN: usize = 1024;

/// Output hop in frames (50% overlap)
const SYNTHESIS_HOP: usize = GRAIN / 2;

/// Ratios closer to 1 than this skip their stage
const IDENTITY_EPSILON: f64 = 1e-3;

static TIMESCALE_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    if std::env::var_os(DISABLE_ENV_VAR).is_some() {
        info!("Timescale disabled by {}", DISABLE_ENV_VAR);
        return false;
    }
    match FastFixedIn::<f32>::new(1.5, 1.0, PolynomialDegree::Linear, 480, CHANNEL_COUNT) {
        Ok(_) => {
            info!("Timescale filter available");
            true
        }
        Err(e) => {
            info!("Timescale filter unavailable: {}", e);
            false
        }
    }
});

/// Whether timescale filters can be built on this node
pub fn timescale_available() -> bool {
    *TIMESCALE_AVAILABLE
}

/// Overlap-add time stretch, consuming input `tempo` times faster than it
/// produces output
struct Stretcher {
    window: Vec<f32>,
    analysis_hop: f64,
    input: Vec<[f32; CHANNEL_COUNT]>,
    read_pos: f64,
    accum: Vec<[f32; CHANNEL_COUNT]>,
}

impl Stretcher {
    fn new(tempo: f64) -> Self {
        // Periodic Hann sums to one at 50% overlap
        let window = (0..GRAIN)
            .map(|n| 0.5 * (1.0 - (TAU * n as f32 / GRAIN as f32).cos()))
            .collect();
        Self {
            window,
            analysis_hop: SYNTHESIS_HOP as f64 * tempo,
            input: Vec::with_capacity(GRAIN * 2),
            read_pos: 0.0,
            accum: vec![[0.0; CHANNEL_COUNT]; GRAIN],
        }
    }

    fn process(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        self.input.extend(
            samples
                .chunks_exact(CHANNEL_COUNT)
                .map(|frame| [frame[0], frame[1]]),
        );

        while self.read_pos as usize + GRAIN <= self.input.len() {
            let start = self.read_pos as usize;
            for (i, (acc, frame)) in self
                .accum
                .iter_mut()
                .zip(&self.input[start..start + GRAIN])
                .enumerate()
            {
                let w = self.window[i];
                acc[0] += frame[0] * w;
                acc[1] += frame[1] * w;
            }

            for frame in self.accum.drain(..SYNTHESIS_HOP) {
                out.extend_from_slice(&frame);
            }
            self.accum.resize(GRAIN, [0.0; CHANNEL_COUNT]);
            self.read_pos += self.analysis_hop;
        }

        let consumed = (self.read_pos as usize).min(self.input.len());
        self.input.drain(..consumed);
        self.read_pos -= consumed as f64;
    }
}

/// Combined speed / pitch / rate stage
pub struct TimescaleFilter {
    stretcher: Option<Stretcher>,
    resampler: Option<StreamResampler>,
    scratch: Vec<f32>,
}

impl TimescaleFilter {
    pub fn new(format: &AudioDataFormat, speed: f32, pitch: f32, rate: f32) -> Result<Self> {
        if format.channel_count != CHANNEL_COUNT {
            return Err(Error::Filters(format!(
                "timescale needs {} channels, got {}",
                CHANNEL_COUNT, format.channel_count
            )));
        }
        if !(speed > 0.0 && pitch > 0.0 && rate > 0.0) {
            return Err(Error::Filters(
                "timescale values must be positive".to_string(),
            ));
        }

        let tempo = speed as f64 / pitch as f64;
        let ratio = 1.0 / (rate as f64 * pitch as f64);

        let stretcher = ((tempo - 1.0).abs() > IDENTITY_EPSILON).then(|| Stretcher::new(tempo));
        let resampler = if (ratio - 1.0).abs() > IDENTITY_EPSILON {
            Some(StreamResampler::new(ratio)?)
        } else {
            None
        };

        debug!(
            "Timescale speed={} pitch={} rate={} (tempo {:.3}, ratio {:.3})",
            speed, pitch, rate, tempo, ratio
        );

        Ok(Self {
            stretcher,
            resampler,
            scratch: Vec::with_capacity(format.chunk_sample_count * CHANNEL_COUNT * 4),
        })
    }
}

impl PcmFilter for TimescaleFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        if let Some(stretcher) = self.stretcher.as_mut() {
            self.scratch.clear();
            stretcher.process(samples, &mut self.scratch);
            std::mem::swap(samples, &mut self.scratch);
        }

        if let Some(resampler) = self.resampler.as_mut() {
            self.scratch.clear();
            if let Err(e) = resampler.process(samples, &mut self.scratch) {
                debug!("Timescale resample failed, passing through: {}", e);
                return;
            }
            std::mem::swap(samples, &mut self.scratch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut TimescaleFilter, chunks: usize) -> usize {
        let mut total = 0;
        for c in 0..chunks {
            let mut samples: Vec<f32> = (0..960)
                .flat_map(|i| {
                    let t = (c * 960 + i) as f32 / 48_000.0;
                    let v = (TAU * 440.0 * t).sin() * 0.5;
                    [v, v]
                })
                .collect();
            filter.process(&mut samples);
            assert_eq!(samples.len() % CHANNEL_COUNT, 0);
            total += samples.len() / CHANNEL_COUNT;
        }
        total
    }

    #[test]
    fn test_identity_skips_stages() {
        let filter = TimescaleFilter::new(&AudioDataFormat::STANDARD, 1.0, 1.0, 1.0).unwrap();
        assert!(filter.stretcher.is_none());
        assert!(filter.resampler.is_none());
    }

    #[test]
    fn test_double_speed_halves_output() {
        let mut filter = TimescaleFilter::new(&AudioDataFormat::STANDARD, 2.0, 1.0, 1.0).unwrap();
        let produced = run(&mut filter, 100);
        let expected = 96_000 / 2;
        assert!(
            (produced as i64 - expected as i64).abs() < 2 * GRAIN as i64,
            "produced {}",
            produced
        );
    }

    #[test]
    fn test_half_rate_doubles_output() {
        let mut filter = TimescaleFilter::new(&AudioDataFormat::STANDARD, 1.0, 1.0, 0.5).unwrap();
        assert!(filter.stretcher.is_none());
        let produced = run(&mut filter, 100);
        assert!((produced as i64 - 192_000).abs() < 2_000, "produced {}", produced);
    }

    #[test]
    fn test_pitch_keeps_duration() {
        let mut filter = TimescaleFilter::new(&AudioDataFormat::STANDARD, 1.0, 1.5, 1.0).unwrap();
        let produced = run(&mut filter, 100);
        assert!((produced as i64 - 96_000).abs() < 3 * GRAIN as i64, "produced {}", produced);
    }

    #[test]
    fn test_rejects_mono() {
        let mono = AudioDataFormat {
            channel_count: 1,
            ..AudioDataFormat::STANDARD
        };
        assert!(TimescaleFilter::new(&mono, 1.5, 1.0, 1.0).is_err());
    }
}

//! Streaming stereo resampler using rubato
//!
//! Wraps a fixed-input-chunk rubato resampler so callers can push arbitrary
//! amounts of interleaved audio and collect whatever output is ready.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

use super::CHANNEL_COUNT;
use crate::error::{Error, Result};

/// Input frames per rubato call
const CHUNK_FRAMES: usize = 480;

/// Stateful resampler for interleaved stereo f32
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    ratio: f64,
    pending: [Vec<f32>; CHANNEL_COUNT],
    output: [Vec<f32>; CHANNEL_COUNT],
}

impl StreamResampler {
    /// Create a resampler producing `ratio` output frames per input frame
    pub fn new(ratio: f64) -> Result<Self> {
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, rebuilt on change
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            CHANNEL_COUNT,
        )
        .map_err(|e| Error::Engine(format!("Failed to create resampler: {}", e)))?;

        let max_out = inner.output_frames_max();
        debug!("Created resampler with ratio {:.4}", ratio);

        Ok(Self {
            inner,
            ratio,
            pending: [
                Vec::with_capacity(CHUNK_FRAMES * 2),
                Vec::with_capacity(CHUNK_FRAMES * 2),
            ],
            output: [vec![0.0; max_out], vec![0.0; max_out]],
        })
    }

    /// Resampler converting `input_rate` to `output_rate`
    pub fn for_rates(input_rate: u32, output_rate: u32) -> Result<Self> {
        Self::new(output_rate as f64 / input_rate as f64)
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Push interleaved input, append any completed output to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        for frame in input.chunks_exact(CHANNEL_COUNT) {
            self.pending[0].push(frame[0]);
            self.pending[1].push(frame[1]);
        }

        while self.pending[0].len() >= CHUNK_FRAMES {
            self.run_chunk(CHUNK_FRAMES, out)?;
        }
        Ok(())
    }

    /// Drain buffered input, zero-padding the final chunk
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let remaining = self.pending[0].len();
        if remaining == 0 {
            return Ok(());
        }

        let expected = (remaining as f64 * self.ratio).round() as usize;
        for channel in self.pending.iter_mut() {
            channel.resize(CHUNK_FRAMES, 0.0);
        }

        let mut tail = Vec::new();
        self.run_chunk(CHUNK_FRAMES, &mut tail)?;
        tail.truncate(expected * CHANNEL_COUNT);
        out.extend_from_slice(&tail);
        Ok(())
    }

    /// Forget buffered input and filter state (after a seek)
    pub fn reset(&mut self) {
        self.inner.reset();
        for channel in self.pending.iter_mut() {
            channel.clear();
        }
    }

    fn run_chunk(&mut self, frames: usize, out: &mut Vec<f32>) -> Result<()> {
        let input = [&self.pending[0][..frames], &self.pending[1][..frames]];
        let (_, produced) = self
            .inner
            .process_into_buffer(&input, &mut self.output, None)
            .map_err(|e| Error::Engine(format!("Resampling failed: {}", e)))?;

        out.reserve(produced * CHANNEL_COUNT);
        for i in 0..produced {
            out.push(self.output[0][i]);
            out.push(self.output[1][i]);
        }

        for channel in self.pending.iter_mut() {
            channel.drain(..frames);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_ramp(frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (i as f32 / frames as f32) * 0.5;
                [v, -v]
            })
            .collect()
    }

    #[test]
    fn test_upsample_length() {
        let mut resampler = StreamResampler::for_rates(44_100, 48_000).unwrap();
        let mut out = Vec::new();
        resampler.process(&stereo_ramp(44_100), &mut out).unwrap();
        resampler.flush(&mut out).unwrap();

        let frames = out.len() / 2;
        assert!((47_500..=48_500).contains(&frames), "got {} frames", frames);
    }

    #[test]
    fn test_small_pushes_accumulate() {
        let mut resampler = StreamResampler::new(2.0).unwrap();
        let mut out = Vec::new();
        for _ in 0..10 {
            resampler.process(&stereo_ramp(100), &mut out).unwrap();
        }
        // 1000 frames in, two full chunks processed
        assert_eq!(resampler.pending[0].len(), 1000 - 2 * CHUNK_FRAMES);
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut resampler = StreamResampler::new(1.5).unwrap();
        let mut out = Vec::new();
        resampler.process(&stereo_ramp(100), &mut out).unwrap();
        resampler.reset();
        resampler.flush(&mut out).unwrap();
        assert!(out.is_empty());
    }
}

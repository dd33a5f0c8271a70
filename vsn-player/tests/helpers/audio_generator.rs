//! Deterministic WAV files for local source tests

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Write a stereo 16-bit sine wave
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    frequency: f32,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = sample_rate as u64 * duration_ms / 1000;
    for i in 0..total_frames {
        let t = i as f32 / sample_rate as f32;
        let value = ((2.0 * PI * frequency * t).sin() * 0.5 * i16::MAX as f32) as i16;
        writer.write_sample(value)?;
        writer.write_sample(value)?;
    }
    writer.finalize()
}

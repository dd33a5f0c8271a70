//! 15-band graphic equalizer

use crate::engine::{AudioDataFormat, PcmFilter, CHANNEL_COUNT, SAMPLE_RATE};

use super::dsp::Biquad;

pub const BAND_COUNT: usize = 15;

/// Band centers in Hz
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [
    25.0, 40.0, 63.0, 100.0, 160.0, 250.0, 400.0, 630.0, 1000.0, 1600.0, 2500.0, 4000.0, 6300.0,
    10000.0, 16000.0,
];

const BAND_Q: f32 = 1.4;

/// Cascade of peaking sections, one per band with non-zero gain
///
/// A gain `g` is a linear multiplier offset, so `0.0` is flat, `1.0` doubles
/// the band and `-0.25` is the deepest cut.
pub struct Equalizer {
    sections: Vec<Biquad>,
}

impl Equalizer {
    /// Only 48 kHz stereo is supported
    pub fn is_compatible(format: &AudioDataFormat) -> bool {
        format.sample_rate == SAMPLE_RATE && format.channel_count == CHANNEL_COUNT
    }

    pub fn new(sample_rate: u32, gains: [f32; BAND_COUNT]) -> Self {
        let sections = BAND_FREQUENCIES
            .iter()
            .zip(gains.iter())
            .filter(|(_, gain)| **gain != 0.0)
            .map(|(&center, &gain)| {
                let gain_db = 20.0 * (1.0 + gain).max(f32::EPSILON).log10();
                Biquad::peaking(sample_rate as f32, center, BAND_Q, gain_db)
            })
            .collect();
        Self { sections }
    }

    pub fn active_bands(&self) -> usize {
        self.sections.len()
    }
}

impl PcmFilter for Equalizer {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            for (c, sample) in frame.iter_mut().enumerate() {
                let mut value = *sample;
                for section in self.sections.iter_mut() {
                    value = section.process(c, value);
                }
                *sample = value;
            }
        }
    }
}

//! PCM filter stages
//!
//! All stages work on interleaved stereo f32 and keep their state (phase,
//! delay lines, filter memory) across calls so chunk boundaries are seamless.

use std::f32::consts::{FRAC_PI_4, TAU};

use crate::engine::{PcmFilter, CHANNEL_COUNT};

/// Second-order IIR section (RBJ cookbook), one memory per channel
#[derive(Debug, Clone)]
pub(crate) struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    state: [[f32; 4]; CHANNEL_COUNT],
}

impl Biquad {
    fn from_coefficients(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            state: [[0.0; 4]; CHANNEL_COUNT],
        }
    }

    /// Band-pass with constant 0 dB peak gain
    pub(crate) fn band_pass(sample_rate: f32, center: f32, q: f32) -> Self {
        let w0 = TAU * center / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        Self::from_coefficients(
            alpha,
            0.0,
            -alpha,
            1.0 + alpha,
            -2.0 * w0.cos(),
            1.0 - alpha,
        )
    }

    /// Peaking EQ boosting or cutting `gain_db` around `center`
    pub(crate) fn peaking(sample_rate: f32, center: f32, q: f32, gain_db: f32) -> Self {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = TAU * center / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        Self::from_coefficients(
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        )
    }

    #[inline]
    pub(crate) fn process(&mut self, channel: usize, x: f32) -> f32 {
        let [x1, x2, y1, y2] = self.state[channel];
        let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
        self.state[channel] = [x, x1, y, y1];
        y
    }
}

/// Phase accumulator for low-frequency oscillators
#[derive(Debug, Clone)]
struct Lfo {
    phase: f32,
    step: f32,
}

impl Lfo {
    fn new(sample_rate: u32, frequency: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate as f32,
        }
    }

    /// Current sine value, then advance one frame
    #[inline]
    fn next(&mut self) -> f32 {
        let value = self.phase.sin();
        self.phase = (self.phase + self.step) % TAU;
        value
    }
}

pub struct VolumeFilter {
    volume: f32,
}

impl VolumeFilter {
    pub fn new(volume: f32) -> Self {
        Self { volume }
    }
}

impl PcmFilter for VolumeFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for s in samples.iter_mut() {
            *s *= self.volume;
        }
    }
}

/// Center-channel (vocal) removal
///
/// Subtracts `level` of the mid signal and adds back `mono_level` of the
/// band around `filter_band` so bass survives.
pub struct KaraokeFilter {
    level: f32,
    mono_level: f32,
    band: Biquad,
}

impl KaraokeFilter {
    pub fn new(sample_rate: u32, level: f32, mono_level: f32, filter_band: f32, filter_width: f32) -> Self {
        let q = (filter_band / filter_width.max(1.0)).max(0.1);
        Self {
            level,
            mono_level,
            band: Biquad::band_pass(sample_rate as f32, filter_band, q),
        }
    }
}

impl PcmFilter for KaraokeFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            let mid = (frame[0] + frame[1]) * 0.5;
            let kept = self.band.process(0, mid) * self.mono_level;
            let removed = mid * self.level;
            frame[0] = frame[0] - removed + kept * self.level;
            frame[1] = frame[1] - removed + kept * self.level;
        }
    }
}

/// Amplitude modulation
pub struct TremoloFilter {
    depth: f32,
    lfo: Lfo,
}

impl TremoloFilter {
    pub fn new(sample_rate: u32, frequency: f32, depth: f32) -> Self {
        Self {
            depth,
            lfo: Lfo::new(sample_rate, frequency),
        }
    }
}

impl PcmFilter for TremoloFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            let gain = 1.0 - self.depth * 0.5 * (1.0 + self.lfo.next());
            frame[0] *= gain;
            frame[1] *= gain;
        }
    }
}

/// Maximum vibrato delay swing in seconds
const VIBRATO_MAX_DELAY_SECS: f32 = 0.002;

/// Pitch modulation through a modulated delay line
pub struct VibratoFilter {
    depth: f32,
    lfo: Lfo,
    max_delay: f32,
    line: Vec<[f32; CHANNEL_COUNT]>,
    write: usize,
}

impl VibratoFilter {
    pub fn new(sample_rate: u32, frequency: f32, depth: f32) -> Self {
        let max_delay = VIBRATO_MAX_DELAY_SECS * sample_rate as f32;
        Self {
            depth,
            lfo: Lfo::new(sample_rate, frequency),
            max_delay,
            line: vec![[0.0; CHANNEL_COUNT]; max_delay.ceil() as usize + 2],
            write: 0,
        }
    }
}

impl PcmFilter for VibratoFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        let len = self.line.len();
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            self.line[self.write] = [frame[0], frame[1]];

            let delay = self.depth * self.max_delay * 0.5 * (1.0 + self.lfo.next());
            let read = (self.write as f32 - delay).rem_euclid(len as f32);
            let i0 = read.floor() as usize % len;
            let i1 = (i0 + 1) % len;
            let frac = read - read.floor();

            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = self.line[i0][c] * (1.0 - frac) + self.line[i1][c] * frac;
            }
            self.write = (self.write + 1) % len;
        }
    }
}

/// Waveshaping distortion
///
/// Each enabled trig term reshapes the running value as
/// `offset + f(value * scale)`; the result is then scaled and offset as a
/// whole and clipped.
pub struct DistortionFilter {
    offset: f32,
    scale: f32,
    sin: Option<(f32, f32)>,
    cos: Option<(f32, f32)>,
    tan: Option<(f32, f32)>,
}

impl DistortionFilter {
    pub fn new(offset: f32, scale: f32) -> Self {
        Self {
            offset,
            scale,
            sin: None,
            cos: None,
            tan: None,
        }
    }

    pub fn with_sin(mut self, offset: f32, scale: f32) -> Self {
        self.sin = Some((offset, scale));
        self
    }

    pub fn with_cos(mut self, offset: f32, scale: f32) -> Self {
        self.cos = Some((offset, scale));
        self
    }

    pub fn with_tan(mut self, offset: f32, scale: f32) -> Self {
        self.tan = Some((offset, scale));
        self
    }

    #[inline]
    fn shape(&self, x: f32) -> f32 {
        let mut y = x;
        if let Some((offset, scale)) = self.sin {
            y = offset + (y * scale).sin();
        }
        if let Some((offset, scale)) = self.cos {
            y = offset + (y * scale).cos();
        }
        if let Some((offset, scale)) = self.tan {
            y = offset + (y * scale).tan();
        }
        (self.offset + self.scale * y).clamp(-1.0, 1.0)
    }
}

impl PcmFilter for DistortionFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for s in samples.iter_mut() {
            *s = self.shape(*s);
        }
    }
}

/// Circular panning ("8D audio")
pub struct RotationFilter {
    lfo: Lfo,
}

impl RotationFilter {
    pub fn new(sample_rate: u32, rotation_hz: f32) -> Self {
        Self {
            lfo: Lfo::new(sample_rate, rotation_hz),
        }
    }
}

impl PcmFilter for RotationFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            // Equal-power pan, -1 = hard left, 1 = hard right
            let angle = (self.lfo.next() + 1.0) * FRAC_PI_4;
            frame[0] *= angle.cos();
            frame[1] *= angle.sin();
        }
    }
}

pub struct ChannelMixFilter {
    left_to_left: f32,
    left_to_right: f32,
    right_to_left: f32,
    right_to_right: f32,
}

impl ChannelMixFilter {
    pub fn new(left_to_left: f32, left_to_right: f32, right_to_left: f32, right_to_right: f32) -> Self {
        Self {
            left_to_left,
            left_to_right,
            right_to_left,
            right_to_right,
        }
    }
}

impl PcmFilter for ChannelMixFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            let (l, r) = (frame[0], frame[1]);
            frame[0] = l * self.left_to_left + r * self.right_to_left;
            frame[1] = l * self.left_to_right + r * self.right_to_right;
        }
    }
}

/// One-pole smoothing low-pass
pub struct LowPassFilter {
    smoothing: f32,
    value: [f32; CHANNEL_COUNT],
}

impl LowPassFilter {
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing,
            value: [0.0; CHANNEL_COUNT],
        }
    }
}

impl PcmFilter for LowPassFilter {
    fn process(&mut self, samples: &mut Vec<f32>) {
        for frame in samples.chunks_exact_mut(CHANNEL_COUNT) {
            for (c, sample) in frame.iter_mut().enumerate() {
                self.value[c] += (*sample - self.value[c]) / self.smoothing;
                *sample = self.value[c];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn constant(frames: usize, l: f32, r: f32) -> Vec<f32> {
        (0..frames).flat_map(|_| [l, r]).collect()
    }

    fn sine(frames: usize, hz: f32) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (TAU * hz * i as f32 / 48_000.0).sin() * 0.5;
                [v, v]
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_volume_scales() {
        let mut samples = constant(4, 0.5, -0.5);
        VolumeFilter::new(0.5).process(&mut samples);
        assert_abs_diff_eq!(samples[0], 0.25);
        assert_abs_diff_eq!(samples[1], -0.25);
    }

    #[test]
    fn test_channel_mix_swaps() {
        let mut samples = constant(2, 1.0, 0.0);
        ChannelMixFilter::new(0.0, 1.0, 1.0, 0.0).process(&mut samples);
        assert_eq!(samples, vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_low_pass_converges() {
        let mut filter = LowPassFilter::new(20.0);
        let mut samples = constant(2000, 1.0, 1.0);
        filter.process(&mut samples);
        assert!(samples[0] < 0.1);
        assert_abs_diff_eq!(samples[samples.len() - 1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_low_pass_attenuates_high_frequencies() {
        let mut samples = sine(4800, 8000.0);
        let before = rms(&samples);
        LowPassFilter::new(20.0).process(&mut samples);
        assert!(rms(&samples) < before * 0.2);
    }

    #[test]
    fn test_tremolo_bounds() {
        let mut filter = TremoloFilter::new(48_000, 5.0, 1.0);
        let mut samples = constant(48_000, 1.0, 1.0);
        filter.process(&mut samples);
        let min = samples.iter().cloned().fold(f32::MAX, f32::min);
        let max = samples.iter().cloned().fold(f32::MIN, f32::max);
        assert!(min >= -1e-6);
        assert!(max <= 1.0 + 1e-6);
        assert!(max - min > 0.9);
    }

    #[test]
    fn test_karaoke_removes_center() {
        let mut filter = KaraokeFilter::new(48_000, 1.0, 0.0, 220.0, 100.0);
        let mut samples = sine(4800, 2000.0);
        filter.process(&mut samples);
        assert!(rms(&samples) < 1e-4);
    }

    #[test]
    fn test_karaoke_keeps_side() {
        let mut filter = KaraokeFilter::new(48_000, 1.0, 1.0, 220.0, 100.0);
        let mut samples = constant(10, 0.5, -0.5);
        filter.process(&mut samples);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(samples[1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_pans() {
        let mut filter = RotationFilter::new(48_000, 1.0);
        let mut samples = constant(48_000, 1.0, 1.0);
        filter.process(&mut samples);

        // Quarter cycle in: hard right
        let quarter = 12_000 * 2;
        assert_abs_diff_eq!(samples[quarter], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(samples[quarter + 1], 1.0, epsilon = 1e-3);
        // Equal power everywhere
        for frame in samples.chunks_exact(2) {
            assert_abs_diff_eq!(frame[0] * frame[0] + frame[1] * frame[1], 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_vibrato_preserves_length_and_level() {
        let mut filter = VibratoFilter::new(48_000, 4.0, 1.0);
        let mut samples = sine(9600, 440.0);
        let before = rms(&samples);
        filter.process(&mut samples);
        assert_eq!(samples.len(), 9600 * 2);
        assert!((rms(&samples[2000..]) - before).abs() < 0.05);
    }

    #[test]
    fn test_distortion_clips() {
        let mut filter = DistortionFilter::new(0.0, 10.0);
        let mut samples = vec![0.5, -0.5];
        filter.process(&mut samples);
        assert_eq!(samples, vec![1.0, -1.0]);

        let mut shaped = DistortionFilter::new(0.0, 1.0).with_sin(0.0, 2.0);
        let mut samples = vec![0.25, 0.25];
        shaped.process(&mut samples);
        assert_abs_diff_eq!(samples[0], 0.5f32.sin(), epsilon = 1e-6);
    }

    #[test]
    fn test_biquad_peaking_unity_at_zero_gain() {
        let mut eq = Biquad::peaking(48_000.0, 1000.0, 1.4, 0.0);
        for x in [0.1, -0.3, 0.7, 0.2] {
            assert_abs_diff_eq!(eq.process(0, x), x, epsilon = 1e-6);
        }
    }
}

//! Per-filter configuration as sent by the controller
//!
//! A filter counts as enabled when any of its values differs from the
//! default by at least [`MINIMUM_FP_DIFF`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::dsp::{
    ChannelMixFilter, DistortionFilter, KaraokeFilter, LowPassFilter, RotationFilter,
    TremoloFilter, VibratoFilter, VolumeFilter,
};
use super::equalizer::{Equalizer, BAND_COUNT};
use super::timescale::{timescale_available, TimescaleFilter};
use crate::engine::{AudioDataFormat, PcmFilter};
use crate::error::{Error, Result};

/// Values closer than this to their default count as unset
pub const MINIMUM_FP_DIFF: f32 = 0.01;

/// Whether `value` differs meaningfully from `default`
pub fn is_set(value: f32, default: f32) -> bool {
    (value - default).abs() >= MINIMUM_FP_DIFF
}

/// One configurable filter stage
pub trait FilterConfig {
    /// Name used in logs and validation errors
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Build the stage, or `None` when it cannot run on `format`
    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>>;

    /// Reject values the stage cannot process
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn invalid(filter: &str, message: &str) -> Error {
    Error::Filters(format!("{}: {}", filter, message))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeConfig {
    pub volume: f32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

impl FilterConfig for VolumeConfig {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.volume, 1.0)
    }

    fn build(&self, _format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        Some(Box::new(VolumeFilter::new(self.volume)))
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=5.0).contains(&self.volume) {
            return Err(invalid(self.name(), "must be between 0 and 5"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub band: usize,
    pub gain: f32,
}

/// Fifteen-band equalizer; later entries for the same band win
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EqualizerConfig {
    pub bands: Vec<Band>,
}

impl EqualizerConfig {
    pub fn gains(&self) -> [f32; BAND_COUNT] {
        let mut gains = [0.0; BAND_COUNT];
        for band in &self.bands {
            if let Some(slot) = gains.get_mut(band.band) {
                *slot = band.gain.clamp(-0.25, 1.0);
            }
        }
        gains
    }
}

impl FilterConfig for EqualizerConfig {
    fn name(&self) -> &'static str {
        "equalizer"
    }

    fn is_enabled(&self) -> bool {
        self.gains().iter().any(|g| is_set(*g, 0.0))
    }

    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        if !Equalizer::is_compatible(format) {
            return None;
        }
        Some(Box::new(Equalizer::new(format.sample_rate, self.gains())))
    }

    fn validate(&self) -> Result<()> {
        match self.bands.iter().find(|b| b.band >= BAND_COUNT) {
            Some(b) => Err(invalid(
                self.name(),
                &format!("band {} out of range 0..{}", b.band, BAND_COUNT),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KaraokeConfig {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

impl Default for KaraokeConfig {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 100.0,
        }
    }
}

impl FilterConfig for KaraokeConfig {
    fn name(&self) -> &'static str {
        "karaoke"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.level, 1.0)
            || is_set(self.mono_level, 1.0)
            || is_set(self.filter_band, 220.0)
            || is_set(self.filter_width, 100.0)
    }

    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        Some(Box::new(KaraokeFilter::new(
            format.sample_rate,
            self.level,
            self.mono_level,
            self.filter_band,
            self.filter_width,
        )))
    }

    fn validate(&self) -> Result<()> {
        if self.filter_band <= 0.0 || self.filter_width <= 0.0 {
            return Err(invalid(self.name(), "filter band and width must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimescaleConfig {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for TimescaleConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

impl FilterConfig for TimescaleConfig {
    fn name(&self) -> &'static str {
        "timescale"
    }

    fn is_enabled(&self) -> bool {
        timescale_available()
            && (is_set(self.speed, 1.0) || is_set(self.pitch, 1.0) || is_set(self.rate, 1.0))
    }

    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        match TimescaleFilter::new(format, self.speed, self.pitch, self.rate) {
            Ok(filter) => Some(Box::new(filter)),
            Err(e) => {
                warn!("Timescale filter skipped: {}", e);
                None
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let in_range = |v: f32| v.is_finite() && v > 0.0 && v <= 10.0;
        if !(in_range(self.speed) && in_range(self.pitch) && in_range(self.rate)) {
            return Err(invalid(self.name(), "speed, pitch and rate must be in (0, 10]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TremoloConfig {
    pub frequency: f32,
    pub depth: f32,
}

impl Default for TremoloConfig {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 0.5,
        }
    }
}

impl FilterConfig for TremoloConfig {
    fn name(&self) -> &'static str {
        "tremolo"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.frequency, 2.0) || is_set(self.depth, 0.5)
    }

    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        Some(Box::new(TremoloFilter::new(
            format.sample_rate,
            self.frequency,
            self.depth,
        )))
    }

    fn validate(&self) -> Result<()> {
        if self.frequency <= 0.0 {
            return Err(invalid(self.name(), "frequency must be positive"));
        }
        if self.depth <= 0.0 || self.depth > 1.0 {
            return Err(invalid(self.name(), "depth must be in (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibratoConfig {
    pub frequency: f32,
    pub depth: f32,
}

impl Default for VibratoConfig {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 0.5,
        }
    }
}

impl FilterConfig for VibratoConfig {
    fn name(&self) -> &'static str {
        "vibrato"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.frequency, 2.0) || is_set(self.depth, 0.5)
    }

    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        Some(Box::new(VibratoFilter::new(
            format.sample_rate,
            self.frequency,
            self.depth,
        )))
    }

    fn validate(&self) -> Result<()> {
        if self.frequency <= 0.0 || self.frequency > 14.0 {
            return Err(invalid(self.name(), "frequency must be in (0, 14]"));
        }
        if self.depth <= 0.0 || self.depth > 1.0 {
            return Err(invalid(self.name(), "depth must be in (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DistortionConfig {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

impl Default for DistortionConfig {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

impl DistortionConfig {
    fn sin_set(&self) -> bool {
        is_set(self.sin_offset, 0.0) || is_set(self.sin_scale, 1.0)
    }

    fn cos_set(&self) -> bool {
        is_set(self.cos_offset, 0.0) || is_set(self.cos_scale, 1.0)
    }

    fn tan_set(&self) -> bool {
        is_set(self.tan_offset, 0.0) || is_set(self.tan_scale, 1.0)
    }
}

impl FilterConfig for DistortionConfig {
    fn name(&self) -> &'static str {
        "distortion"
    }

    fn is_enabled(&self) -> bool {
        self.sin_set()
            || self.cos_set()
            || self.tan_set()
            || is_set(self.offset, 0.0)
            || is_set(self.scale, 1.0)
    }

    fn build(&self, _format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        let mut filter = DistortionFilter::new(self.offset, self.scale);
        if self.sin_set() {
            filter = filter.with_sin(self.sin_offset, self.sin_scale);
        }
        if self.cos_set() {
            filter = filter.with_cos(self.cos_offset, self.cos_scale);
        }
        if self.tan_set() {
            filter = filter.with_tan(self.tan_offset, self.tan_scale);
        }
        Some(Box::new(filter))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    #[serde(rename = "rotationHz", alias = "speed")]
    pub rotation_hz: f32,
}

impl FilterConfig for RotationConfig {
    fn name(&self) -> &'static str {
        "rotation"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.rotation_hz, 0.0)
    }

    fn build(&self, format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        Some(Box::new(RotationFilter::new(
            format.sample_rate,
            self.rotation_hz,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelMixConfig {
    pub left_to_left: f32,
    pub left_to_right: f32,
    pub right_to_left: f32,
    pub right_to_right: f32,
}

impl Default for ChannelMixConfig {
    fn default() -> Self {
        Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 0.0,
            right_to_right: 1.0,
        }
    }
}

impl FilterConfig for ChannelMixConfig {
    fn name(&self) -> &'static str {
        "channelMix"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.left_to_left, 1.0)
            || is_set(self.left_to_right, 0.0)
            || is_set(self.right_to_left, 0.0)
            || is_set(self.right_to_right, 1.0)
    }

    fn build(&self, _format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        Some(Box::new(ChannelMixFilter::new(
            self.left_to_left,
            self.left_to_right,
            self.right_to_left,
            self.right_to_right,
        )))
    }

    fn validate(&self) -> Result<()> {
        let factors = [
            self.left_to_left,
            self.left_to_right,
            self.right_to_left,
            self.right_to_right,
        ];
        if factors.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(invalid(self.name(), "mix factors must be in [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPassConfig {
    pub smoothing: f32,
}

impl Default for LowPassConfig {
    fn default() -> Self {
        Self { smoothing: 20.0 }
    }
}

impl FilterConfig for LowPassConfig {
    fn name(&self) -> &'static str {
        "lowPass"
    }

    fn is_enabled(&self) -> bool {
        is_set(self.smoothing, 20.0)
    }

    fn build(&self, _format: &AudioDataFormat) -> Option<Box<dyn PcmFilter>> {
        // Smoothing of 1 or less passes audio through unchanged
        if self.smoothing <= 1.0 {
            return None;
        }
        Some(Box::new(LowPassFilter::new(self.smoothing)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_set_threshold() {
        assert!(!is_set(1.005, 1.0));
        assert!(is_set(1.02, 1.0));
        assert!(is_set(0.5, 1.0));

        // Exact boundary around a zero default
        assert!(is_set(MINIMUM_FP_DIFF, 0.0));
        assert!(is_set(-MINIMUM_FP_DIFF, 0.0));
        assert!(!is_set(MINIMUM_FP_DIFF / 2.0, 0.0));
    }

    #[test]
    fn test_defaults_are_disabled() {
        assert!(!VolumeConfig::default().is_enabled());
        assert!(!EqualizerConfig::default().is_enabled());
        assert!(!KaraokeConfig::default().is_enabled());
        assert!(!TimescaleConfig::default().is_enabled());
        assert!(!TremoloConfig::default().is_enabled());
        assert!(!VibratoConfig::default().is_enabled());
        assert!(!DistortionConfig::default().is_enabled());
        assert!(!RotationConfig::default().is_enabled());
        assert!(!ChannelMixConfig::default().is_enabled());
        assert!(!LowPassConfig::default().is_enabled());
    }

    #[test]
    fn test_equalizer_gain_clamping_and_range() {
        let config = EqualizerConfig {
            bands: vec![
                Band { band: 0, gain: 2.0 },
                Band { band: 3, gain: -1.0 },
            ],
        };
        let gains = config.gains();
        assert_eq!(gains[0], 1.0);
        assert_eq!(gains[3], -0.25);
        assert!(config.is_enabled());

        let bad = EqualizerConfig {
            bands: vec![Band { band: 15, gain: 0.1 }],
        };
        assert!(matches!(bad.validate(), Err(Error::Filters(_))));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let karaoke: KaraokeConfig = serde_json::from_str(r#"{"level": 0.5}"#).unwrap();
        assert_eq!(karaoke.filter_band, 220.0);
        assert!(karaoke.is_enabled());

        let rotation: RotationConfig = serde_json::from_str(r#"{"speed": 0.2}"#).unwrap();
        assert_eq!(rotation.rotation_hz, 0.2);
    }

    #[test]
    fn test_validation_ranges() {
        let tremolo = TremoloConfig {
            frequency: 2.0,
            depth: 1.5,
        };
        assert!(tremolo.validate().is_err());

        let vibrato = VibratoConfig {
            frequency: 20.0,
            depth: 0.5,
        };
        assert!(vibrato.validate().is_err());

        let timescale = TimescaleConfig {
            speed: 0.0,
            ..TimescaleConfig::default()
        };
        assert!(timescale.validate().is_err());
    }

    #[test]
    fn test_low_pass_pass_through_builds_nothing() {
        let config = LowPassConfig { smoothing: 1.0 };
        assert!(config.is_enabled());
        assert!(config.build(&AudioDataFormat::STANDARD).is_none());
    }
}

//! Filter pipeline
//!
//! A [`FilterChain`] is the whole filter payload for one player. It is
//! swapped in as a unit: the player installs it as the engine's filter
//! factory when any filter is enabled and removes the factory otherwise.

pub mod config;
pub mod dsp;
pub mod equalizer;
pub mod timescale;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{AudioDataFormat, AudioTrack, PcmFilter, PcmFilterFactory};
use crate::error::{Error, Result};

pub use config::{
    Band, ChannelMixConfig, DistortionConfig, EqualizerConfig, FilterConfig, KaraokeConfig,
    LowPassConfig, RotationConfig, TimescaleConfig, TremoloConfig, VibratoConfig, VolumeConfig,
    MINIMUM_FP_DIFF,
};
pub use timescale::timescale_available;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterChain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<EqualizerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<KaraokeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<TimescaleConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<TremoloConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<VibratoConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<DistortionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMixConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPassConfig>,
}

impl FilterChain {
    /// Parse and validate a controller filter payload
    pub fn parse(json: &str) -> Result<Self> {
        let chain: FilterChain = serde_json::from_str(json)
            .map_err(|e| Error::Filters(format!("Invalid filter payload: {}", e)))?;
        chain.validate()?;
        Ok(chain)
    }

    /// Present filters in build order
    pub fn configs(&self) -> Vec<&dyn FilterConfig> {
        let mut configs: Vec<&dyn FilterConfig> = Vec::with_capacity(10);
        if let Some(c) = &self.volume {
            configs.push(c);
        }
        if let Some(c) = &self.equalizer {
            configs.push(c);
        }
        if let Some(c) = &self.karaoke {
            configs.push(c);
        }
        if let Some(c) = &self.timescale {
            configs.push(c);
        }
        if let Some(c) = &self.tremolo {
            configs.push(c);
        }
        if let Some(c) = &self.distortion {
            configs.push(c);
        }
        if let Some(c) = &self.vibrato {
            configs.push(c);
        }
        if let Some(c) = &self.low_pass {
            configs.push(c);
        }
        if let Some(c) = &self.rotation {
            configs.push(c);
        }
        if let Some(c) = &self.channel_mix {
            configs.push(c);
        }
        configs
    }

    /// True iff at least one filter would change the audio
    pub fn is_enabled(&self) -> bool {
        self.configs().iter().any(|c| c.is_enabled())
    }

    pub fn validate(&self) -> Result<()> {
        self.configs().iter().try_for_each(|c| c.validate())
    }

    /// Names of the enabled filters, in build order
    pub fn enabled_names(&self) -> Vec<&'static str> {
        self.configs()
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name())
            .collect()
    }
}

impl PcmFilterFactory for FilterChain {
    fn build_chain(&self, track: &AudioTrack, format: &AudioDataFormat) -> Vec<Box<dyn PcmFilter>> {
        let filters: Vec<Box<dyn PcmFilter>> = self
            .configs()
            .into_iter()
            .filter(|c| c.is_enabled())
            .filter_map(|c| c.build(format))
            .collect();
        debug!(
            "Built {} filter(s) {:?} for {}",
            filters.len(),
            self.enabled_names(),
            track.info().identifier
        );
        filters
    }
}

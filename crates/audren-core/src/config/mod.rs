//! Renderer configuration
//!
//! Creation parameters for a renderer instance, the output stream layout and
//! the sink backend selection, loaded from YAML.
//!
//! # Usage
//!
//! ```ignore
//! use audren_core::config::{default_config_path, load_config, RendererConfig};
//!
//! let config: RendererConfig = load_config(&default_config_path("renderer.yaml"));
//! config.renderer.validate()?;
//! ```

mod io;
mod paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RendererError, RendererResult};
use crate::types::{MAX_MIX_BUFFERS, STREAM_NUM_CHANNELS, STREAM_SAMPLE_RATE};

pub use io::{load_config, save_config};
pub use paths::{default_config_path, default_config_dir};

/// Latest protocol revision digit understood by the renderer
pub const CURRENT_REVISION: u32 = 9;

/// Default samples rendered per frame (5ms at 48kHz)
pub const DEFAULT_SAMPLE_COUNT: u32 = 240;

/// Upper bound on mix buffers so the pool stays a reasonable size
pub const MAX_TOTAL_MIX_BUFFERS: u32 = 0x400;

/// Parameters fixed at renderer creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererParams {
    /// Rate the command generator renders at (32000 or 48000 Hz)
    pub sample_rate: u32,
    /// Samples per channel rendered each frame
    pub sample_count: u32,
    /// Total mix buffers shared by every mix
    pub mix_buffer_count: u32,
    /// Sub-mixes in addition to the final mix
    pub submix_count: u32,
    pub voice_count: u32,
    pub sink_count: u32,
    pub effect_count: u32,
    pub splitter_count: u32,
    pub splitter_destination_count: u32,
    /// Revision digit the client was built against ('REV?' with ? = digit)
    pub revision: u32,
}

impl Default for RendererParams {
    fn default() -> Self {
        Self {
            sample_rate: STREAM_SAMPLE_RATE,
            sample_count: DEFAULT_SAMPLE_COUNT,
            mix_buffer_count: MAX_MIX_BUFFERS as u32,
            submix_count: 4,
            voice_count: 32,
            sink_count: 1,
            effect_count: 4,
            splitter_count: 4,
            splitter_destination_count: 16,
            revision: CURRENT_REVISION,
        }
    }
}

impl RendererParams {
    /// Total mixes including the final mix
    pub fn mix_count(&self) -> u32 {
        self.submix_count + 1
    }

    /// Memory pools the guest may register: one per effect, four per voice
    pub fn memory_pool_count(&self) -> u32 {
        self.effect_count + self.voice_count * 4
    }

    /// Builder-style revision override
    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// Reject parameter sets the renderer cannot be built from
    pub fn validate(&self) -> RendererResult<()> {
        if self.sample_rate != 48000 && self.sample_rate != 32000 {
            return Err(RendererError::InvalidRendererParams(format!(
                "unsupported sample rate {}",
                self.sample_rate
            )));
        }
        if self.sample_count == 0 || self.sample_count % 8 != 0 || self.sample_count > 1024 {
            return Err(RendererError::InvalidRendererParams(format!(
                "sample count {} must be a nonzero multiple of 8 up to 1024",
                self.sample_count
            )));
        }
        if self.mix_buffer_count == 0 || self.mix_buffer_count > MAX_TOTAL_MIX_BUFFERS {
            return Err(RendererError::InvalidRendererParams(format!(
                "mix buffer count {} out of range",
                self.mix_buffer_count
            )));
        }
        if self.revision == 0 || self.revision > CURRENT_REVISION {
            return Err(RendererError::InvalidRendererParams(format!(
                "unsupported revision REV{}",
                self.revision
            )));
        }
        Ok(())
    }
}

/// Where rendered frames go
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SinkBackend {
    /// Discard samples (headless runs, tests)
    #[default]
    Null,
    /// Write a PCM16 WAV file
    Wav { path: PathBuf },
    /// OS audio device through CPAL
    Cpal,
}

/// Output stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Stream channel count: 1, 2 or 6
    pub channels: usize,
    pub backend: SinkBackend,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            channels: STREAM_NUM_CHANNELS,
            backend: SinkBackend::default(),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub renderer: RendererParams,
    pub output: OutputConfig,
    /// Log the splitter graph and per-frame command trace
    pub trace_commands: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_validate() {
        let params = RendererParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.mix_count(), 5);
        assert_eq!(params.memory_pool_count(), 4 + 32 * 4);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = RendererParams {
            sample_rate: 44100,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = RendererParams {
            sample_count: 100,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = RendererParams::default().with_revision(10);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "renderer:\n  voice_count: 8\noutput:\n  channels: 6\n";
        let config: RendererConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.renderer.voice_count, 8);
        assert_eq!(config.renderer.sample_count, DEFAULT_SAMPLE_COUNT);
        assert_eq!(config.output.channels, 6);
        assert_eq!(config.output.backend, SinkBackend::Null);
    }
}

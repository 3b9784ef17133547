//! Pipeline configuration, loadable from JSON.

use crate::export::orchestrator::SequentialConfig;
use crate::export::parallel::ParallelConfig;
use crate::export::selector::SelectorThresholds;
use crate::foundation::error::{ExportError, ExportResult};
use crate::memory::monitor::MemoryConfig;
use anyhow::Context as _;
use std::path::Path;
use std::time::Duration;

/// Media decoding knobs.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Upper bound on one video seek before the last good frame is reused.
    pub seek_timeout_ms: u64,
    /// Decoded video frames kept per export.
    pub video_frame_cache: usize,
    pub audio_sample_rate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            seek_timeout_ms: 5_000,
            video_frame_cache: crate::media::cache::DEFAULT_VIDEO_FRAME_CAPACITY,
            audio_sample_rate: crate::media::decode::MIX_SAMPLE_RATE,
        }
    }
}

impl MediaConfig {
    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }
}

/// Every tunable of the export pipeline. Missing JSON fields take their defaults.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub memory: MemoryConfig,
    pub sequential: SequentialConfig,
    pub parallel: ParallelConfig,
    pub selector: SelectorThresholds,
    pub media: MediaConfig,
    /// Sleep one frame interval between frames for backends that sample in real time.
    pub pacing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            sequential: SequentialConfig::default(),
            parallel: ParallelConfig::default(),
            selector: SelectorThresholds::default(),
            media: MediaConfig::default(),
            pacing: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_path(path: impl AsRef<Path>) -> ExportResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read pipeline config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .map_err(|e| ExportError::validation(format!("parse pipeline config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ExportResult<()> {
        self.memory.validate()?;
        self.sequential.validate()?;
        self.parallel.validate()?;
        if self.media.video_frame_cache == 0 {
            return Err(ExportError::validation("media.video_frame_cache must be > 0"));
        }
        if self.media.audio_sample_rate == 0 {
            return Err(ExportError::validation("media.audio_sample_rate must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;

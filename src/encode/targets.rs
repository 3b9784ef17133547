use crate::encode::backend::BlobData;
use crate::encode::ffmpeg::FfmpegSink;
use crate::encode::hardware::{
    FfmpegHardwareEncoder, HardwareConfig, HardwareEncoder, HardwareSupport, probe_ffmpeg_hardware,
};
use crate::encode::sequence::{FfmpegSequenceSink, ImageSequenceSink, InMemorySequenceSink};
use crate::encode::sink::{
    FrameSink, InMemorySink, SessionLog, SinkConfig, in_memory_blob, injected_failure,
};
use crate::export::preflight::Capability;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{EncoderStage, ExportError, ExportResult};
use crate::render::frame::FrameRGBA;
use crate::timeline::settings::ExportSettings;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Factory for the sinks and encoders of one run.
pub trait EncoderTargets: Send + Sync {
    fn frame_sink(&self, settings: &ExportSettings) -> ExportResult<Box<dyn FrameSink>>;
    fn sequence_sink(&self, settings: &ExportSettings) -> ExportResult<Box<dyn ImageSequenceSink>>;
    fn hardware_encoder(&self, settings: &ExportSettings) -> ExportResult<Box<dyn HardwareEncoder>>;
    /// Cheap support check used by engine selection. Never fails; errors read as unsupported.
    fn probe_hardware(&self) -> HardwareSupport;
    /// External tools the sinks need.
    fn required_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }
    /// File the export lands in, when there is one.
    fn output_path(&self) -> Option<&Path> {
        None
    }
}

/// Writes every backend's output to one file through the system `ffmpeg`.
#[derive(Debug)]
pub struct FfmpegTargets {
    out_path: PathBuf,
    hardware: OnceLock<HardwareSupport>,
}

impl FfmpegTargets {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            hardware: OnceLock::new(),
        }
    }
}

impl EncoderTargets for FfmpegTargets {
    fn frame_sink(&self, _settings: &ExportSettings) -> ExportResult<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::new(&self.out_path)))
    }

    fn sequence_sink(&self, _settings: &ExportSettings) -> ExportResult<Box<dyn ImageSequenceSink>> {
        Ok(Box::new(FfmpegSequenceSink::new(&self.out_path)))
    }

    fn hardware_encoder(&self, _settings: &ExportSettings) -> ExportResult<Box<dyn HardwareEncoder>> {
        Ok(Box::new(FfmpegHardwareEncoder::new(&self.out_path)))
    }

    fn probe_hardware(&self) -> HardwareSupport {
        self.hardware
            .get_or_init(|| {
                probe_ffmpeg_hardware().unwrap_or_else(|e| HardwareSupport::Unsupported {
                    reason: e.to_string(),
                })
            })
            .clone()
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::Ffmpeg]
    }

    fn output_path(&self) -> Option<&Path> {
        Some(&self.out_path)
    }
}

/// Simulated hardware for [`InMemoryTargets`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InMemoryHardware {
    #[default]
    Unsupported,
    /// Probes as supported; optionally fails at one lifecycle stage.
    Supported { fail_at: Option<EncoderStage> },
}

/// Targets that record sessions into a [`SessionLog`] instead of producing media.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTargets {
    log: SessionLog,
    hardware: InMemoryHardware,
    realtime_fail_at: Option<EncoderStage>,
    sequence_fail_at: Option<EncoderStage>,
}

impl InMemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hardware(mut self, hardware: InMemoryHardware) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn with_realtime_failure(mut self, stage: EncoderStage) -> Self {
        self.realtime_fail_at = Some(stage);
        self
    }

    pub fn with_sequence_failure(mut self, stage: EncoderStage) -> Self {
        self.sequence_fail_at = Some(stage);
        self
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }
}

impl EncoderTargets for InMemoryTargets {
    fn frame_sink(&self, _settings: &ExportSettings) -> ExportResult<Box<dyn FrameSink>> {
        Ok(Box::new(
            InMemorySink::new(self.log.clone(), "realtime_stream").failing_at(self.realtime_fail_at),
        ))
    }

    fn sequence_sink(&self, _settings: &ExportSettings) -> ExportResult<Box<dyn ImageSequenceSink>> {
        Ok(Box::new(
            InMemorySequenceSink::new(self.log.clone()).failing_at(self.sequence_fail_at),
        ))
    }

    fn hardware_encoder(&self, _settings: &ExportSettings) -> ExportResult<Box<dyn HardwareEncoder>> {
        Ok(Box::new(InMemoryHardwareEncoder::new(
            self.log.clone(),
            self.hardware,
        )))
    }

    fn probe_hardware(&self) -> HardwareSupport {
        in_memory_support(self.hardware)
    }
}

fn in_memory_support(hardware: InMemoryHardware) -> HardwareSupport {
    match hardware {
        InMemoryHardware::Unsupported => HardwareSupport::Unsupported {
            reason: "in-memory hardware disabled".to_owned(),
        },
        InMemoryHardware::Supported { .. } => HardwareSupport::Supported {
            codec: "in_memory_h264".to_owned(),
        },
    }
}

/// Hardware encoder that records frames and key-frame flags.
#[derive(Debug)]
pub struct InMemoryHardwareEncoder {
    log: SessionLog,
    slot: usize,
    hardware: InMemoryHardware,
    last_idx: Option<FrameIndex>,
}

impl InMemoryHardwareEncoder {
    pub fn new(log: SessionLog, hardware: InMemoryHardware) -> Self {
        let slot = log.open("hardware");
        Self {
            log,
            slot,
            hardware,
            last_idx: None,
        }
    }

    fn fail_at(&self) -> Option<EncoderStage> {
        match self.hardware {
            InMemoryHardware::Supported { fail_at } => fail_at,
            InMemoryHardware::Unsupported => None,
        }
    }
}

impl HardwareEncoder for InMemoryHardwareEncoder {
    fn probe(&mut self) -> ExportResult<HardwareSupport> {
        if self.fail_at() == Some(EncoderStage::Probe) {
            return Err(ExportError::encoder(
                EncoderStage::Probe,
                "injected in-memory failure",
            ));
        }
        Ok(in_memory_support(self.hardware))
    }

    fn initialize(&mut self, cfg: &SinkConfig, hw: &HardwareConfig) -> ExportResult<()> {
        if self.fail_at() != Some(EncoderStage::Probe) {
            injected_failure(self.fail_at(), EncoderStage::Init)?;
        }
        let mut cfg = cfg.clone();
        cfg.bitrate = Some(hw.bitrate);
        cfg.keyframe_interval = Some(hw.keyframe_interval);
        self.log.update(self.slot, |r| r.config = Some(cfg));
        Ok(())
    }

    fn encode(&mut self, idx: FrameIndex, frame: &FrameRGBA, keyframe: bool) -> ExportResult<()> {
        injected_failure(self.fail_at(), EncoderStage::Feed)?;
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(ExportError::validation(format!(
                "in-memory encoder received frame {} after {}",
                idx.0, last.0
            )));
        }
        self.last_idx = Some(idx);
        self.log.update(self.slot, |r| {
            r.indices.push(idx.0);
            if keyframe {
                r.keyframes.push(idx.0);
            }
            r.bytes += frame.byte_len();
        });
        Ok(())
    }

    fn finish(&mut self) -> ExportResult<BlobData> {
        injected_failure(self.fail_at(), EncoderStage::Stop)?;
        let mut rec = None;
        self.log.update(self.slot, |r| {
            r.finished = true;
            rec = Some(r.clone());
        });
        in_memory_blob(&rec.ok_or_else(|| ExportError::validation("in-memory session missing"))?)
    }

    fn close(&mut self) {
        self.log.update(self.slot, |r| {
            if !r.finished {
                r.aborted = true;
            }
        });
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/targets.rs"]
mod tests;

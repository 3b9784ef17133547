use crate::encode::backend::{AudioTrackFile, BlobData, FinalBlob, FrameOrder};
use crate::encode::ffmpeg::{FfmpegSink, is_ffmpeg_on_path, list_video_encoders};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{EncoderStage, ExportError, ExportResult};
use crate::render::frame::{FrameRGBA, StreamingFrame};
use crate::timeline::settings::ExportSettings;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Hardware H.264 encoders tried in order.
pub const HARDWARE_CODEC_CANDIDATES: [&str; 4] =
    ["h264_nvenc", "h264_qsv", "h264_vaapi", "h264_videotoolbox"];

pub const DEFAULT_KEYFRAME_INTERVAL: u32 = 30;

/// Outcome of [`HardwareEncoder::probe`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HardwareSupport {
    Supported { codec: String },
    Unsupported { reason: String },
}

impl HardwareSupport {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported { .. })
    }
}

/// Rate control for hardware sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareConfig {
    pub bitrate: u64,
    pub keyframe_interval: u32,
}

impl HardwareConfig {
    pub fn from_settings(settings: &ExportSettings) -> Self {
        Self {
            bitrate: settings.effective_bitrate(),
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
        }
    }
}

/// A platform video encoder.
///
/// `probe` must report support before `initialize`; `encode` is only valid between
/// `initialize` and `finish`.
pub trait HardwareEncoder: Send {
    fn probe(&mut self) -> ExportResult<HardwareSupport>;
    fn initialize(&mut self, cfg: &SinkConfig, hw: &HardwareConfig) -> ExportResult<()>;
    fn encode(&mut self, idx: FrameIndex, frame: &FrameRGBA, keyframe: bool) -> ExportResult<()>;
    fn finish(&mut self) -> ExportResult<BlobData>;
    /// Release the encoder without output. Safe in any state.
    fn close(&mut self) {}
}

/// Hardware encoding through an accelerated ffmpeg codec.
pub struct FfmpegHardwareEncoder {
    codec: Option<String>,
    sink: FfmpegSink,
}

impl FfmpegHardwareEncoder {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            codec: None,
            sink: FfmpegSink::new(out_path),
        }
    }
}

/// First candidate the local ffmpeg lists and can actually open.
pub fn probe_ffmpeg_hardware() -> ExportResult<HardwareSupport> {
    if !is_ffmpeg_on_path() {
        return Ok(HardwareSupport::Unsupported {
            reason: "ffmpeg not found on PATH".to_owned(),
        });
    }
    let listed = list_video_encoders()?;
    for codec in HARDWARE_CODEC_CANDIDATES {
        if listed.iter().any(|c| c == codec) && trial_encode(codec) {
            return Ok(HardwareSupport::Supported {
                codec: codec.to_owned(),
            });
        }
    }
    Ok(HardwareSupport::Unsupported {
        reason: "no usable hardware H.264 encoder".to_owned(),
    })
}

/// Encode a few synthetic frames to the null muxer; listed codecs often lack a device.
fn trial_encode(codec: &str) -> bool {
    Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "lavfi",
            "-i",
            "color=c=black:s=256x256:d=0.1",
            "-c:v",
            codec,
            "-f",
            "null",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

impl HardwareEncoder for FfmpegHardwareEncoder {
    fn probe(&mut self) -> ExportResult<HardwareSupport> {
        let support = probe_ffmpeg_hardware()?;
        self.codec = match &support {
            HardwareSupport::Supported { codec } => Some(codec.clone()),
            HardwareSupport::Unsupported { .. } => None,
        };
        Ok(support)
    }

    fn initialize(&mut self, cfg: &SinkConfig, hw: &HardwareConfig) -> ExportResult<()> {
        let codec = self
            .codec
            .clone()
            .ok_or_else(|| ExportError::validation("hardware encoder was not probed"))?;
        let mut cfg = cfg.clone();
        cfg.video_codec = codec;
        cfg.bitrate = Some(hw.bitrate);
        cfg.keyframe_interval = Some(hw.keyframe_interval);
        self.sink.begin(cfg)
    }

    fn encode(&mut self, idx: FrameIndex, frame: &FrameRGBA, _keyframe: bool) -> ExportResult<()> {
        // Key frames are placed by `-g`.
        self.sink.push_frame(idx, frame)
    }

    fn finish(&mut self) -> ExportResult<BlobData> {
        self.sink.end()
    }

    fn close(&mut self) {
        self.sink.abort();
    }
}

/// Backend over a probed [`HardwareEncoder`]. Unpaced.
pub struct HardwareBackend {
    encoder: Box<dyn HardwareEncoder>,
    cfg: SinkConfig,
    hw: HardwareConfig,
    order: FrameOrder,
    audio: AudioTrackFile,
    open: bool,
}

impl HardwareBackend {
    pub fn new(encoder: Box<dyn HardwareEncoder>, cfg: SinkConfig, hw: HardwareConfig) -> Self {
        Self {
            encoder,
            cfg,
            hw,
            order: FrameOrder::default(),
            audio: AudioTrackFile::default(),
            open: false,
        }
    }

    pub(crate) fn audio_mut(&mut self) -> &mut AudioTrackFile {
        &mut self.audio
    }

    pub(crate) fn start(&mut self) -> ExportResult<()> {
        match self
            .encoder
            .probe()
            .map_err(|e| e.into_encoder(EncoderStage::Probe))?
        {
            HardwareSupport::Supported { codec } => {
                tracing::debug!(%codec, "hardware encoder available");
            }
            HardwareSupport::Unsupported { reason } => {
                return Err(ExportError::encoder(EncoderStage::Probe, reason));
            }
        }
        if self.hw.keyframe_interval == 0 {
            return Err(ExportError::encoder(
                EncoderStage::Init,
                "keyframe interval must be > 0",
            ));
        }
        let mut cfg = self.cfg.clone();
        cfg.audio = self.audio.input();
        self.open = true;
        self.encoder
            .initialize(&cfg, &self.hw)
            .map_err(|e| e.into_encoder(EncoderStage::Init))
    }

    pub(crate) fn feed_frame(&mut self, frame: StreamingFrame) -> ExportResult<()> {
        if !self.open {
            return Err(ExportError::encoder(EncoderStage::Feed, "backend not started"));
        }
        self.order.admit(frame.index)?;
        let keyframe = frame
            .index
            .0
            .is_multiple_of(u64::from(self.hw.keyframe_interval));
        self.encoder
            .encode(frame.index, &frame.image, keyframe)
            .map_err(|e| e.into_encoder(EncoderStage::Feed))
    }

    pub(crate) fn stop(&mut self) -> ExportResult<FinalBlob> {
        if !self.open {
            return Err(ExportError::encoder(EncoderStage::Stop, "backend not started"));
        }
        self.open = false;
        let data = self
            .encoder
            .finish()
            .map_err(|e| e.into_encoder(EncoderStage::Stop))?;
        FinalBlob::new(self.cfg.format.mime_type(), data)
    }

    pub(crate) fn cleanup(&mut self) {
        if self.open {
            self.encoder.close();
            self.open = false;
        }
        self.audio.remove();
    }

    pub(crate) fn frames_encoded(&self) -> u64 {
        self.order.count()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/hardware.rs"]
mod tests;

use crate::audio::mixer::MixedAudio;
use crate::encode::hardware::{HardwareBackend, HardwareConfig};
use crate::encode::realtime::RealtimeStreamBackend;
use crate::encode::sequence::OfflineSequenceBackend;
use crate::encode::sink::{AudioInputConfig, SinkConfig};
use crate::encode::targets::EncoderTargets;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{EncoderStage, ExportError, ExportResult};
use crate::render::frame::StreamingFrame;
use crate::timeline::settings::ExportSettings;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Encoder backend variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    RealtimeStream,
    OfflineSequence,
    Hardware,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RealtimeStream => "realtime_stream",
            Self::OfflineSequence => "offline_sequence",
            Self::Hardware => "hardware",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the encoded bytes ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobData {
    Memory(Vec<u8>),
    File(PathBuf),
}

/// The encoded export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalBlob {
    pub mime_type: String,
    pub size_bytes: u64,
    pub data: BlobData,
}

impl FinalBlob {
    pub fn new(mime_type: &str, data: BlobData) -> ExportResult<Self> {
        let size_bytes = match &data {
            BlobData::Memory(b) => b.len() as u64,
            BlobData::File(p) => std::fs::metadata(p)
                .map_err(|e| {
                    ExportError::encoder(
                        EncoderStage::Stop,
                        format!("encoded output '{}' is unreadable: {e}", p.display()),
                    )
                })?
                .len(),
        };
        Ok(Self {
            mime_type: mime_type.to_owned(),
            size_bytes,
            data,
        })
    }
}

/// Strictly increasing index check shared by every backend.
#[derive(Debug, Default)]
pub(crate) struct FrameOrder {
    last: Option<FrameIndex>,
    count: u64,
}

impl FrameOrder {
    pub(crate) fn admit(&mut self, idx: FrameIndex) -> ExportResult<()> {
        if let Some(last) = self.last
            && idx.0 <= last.0
        {
            return Err(ExportError::encoder(
                EncoderStage::Feed,
                format!("frame {} fed after frame {}", idx.0, last.0),
            ));
        }
        self.last = Some(idx);
        self.count += 1;
        Ok(())
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Mixed audio written to a temp `f32le` file for ffmpeg-based sinks. Removed on drop.
#[derive(Debug, Default)]
pub(crate) struct AudioTrackFile {
    input: Option<AudioInputConfig>,
}

static AUDIO_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

impl AudioTrackFile {
    pub(crate) fn write(&mut self, audio: &MixedAudio) -> ExportResult<()> {
        self.remove();
        if audio.frames() == 0 {
            return Ok(());
        }
        let path = std::env::temp_dir().join(format!(
            "vexport_audio_mix_{}_{}_{}.f32le",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0),
            AUDIO_FILE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        audio.write_f32le(&path)?;
        self.input = Some(AudioInputConfig {
            path,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        });
        Ok(())
    }

    pub(crate) fn input(&self) -> Option<AudioInputConfig> {
        self.input.clone()
    }

    pub(crate) fn remove(&mut self) {
        if let Some(a) = self.input.take()
            && let Err(e) = std::fs::remove_file(&a.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %a.path.display(), error = %e, "failed to remove audio temp file");
        }
    }
}

impl Drop for AudioTrackFile {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Closed set of encoder backends behind one contract.
///
/// Frame loops only ever ask [`EncoderBackend::requires_pacing`]; they never branch on the
/// variant.
pub enum EncoderBackend {
    RealtimeStream(RealtimeStreamBackend),
    OfflineSequence(OfflineSequenceBackend),
    Hardware(HardwareBackend),
}

impl EncoderBackend {
    /// Build the `kind` backend for `settings` from `targets`. Failures are `Init` encoder
    /// errors.
    pub fn create(
        kind: BackendKind,
        targets: &dyn EncoderTargets,
        settings: &ExportSettings,
        paced: bool,
    ) -> ExportResult<Self> {
        let init = |e: ExportError| e.into_encoder(EncoderStage::Init);
        let cfg = SinkConfig::from_settings(settings).map_err(init)?;
        Ok(match kind {
            BackendKind::RealtimeStream => {
                let sink = targets.frame_sink(settings).map_err(init)?;
                Self::RealtimeStream(RealtimeStreamBackend::new(sink, cfg, paced))
            }
            BackendKind::OfflineSequence => {
                let sink = targets.sequence_sink(settings).map_err(init)?;
                Self::OfflineSequence(OfflineSequenceBackend::new(sink, cfg))
            }
            BackendKind::Hardware => {
                let encoder = targets.hardware_encoder(settings).map_err(init)?;
                Self::Hardware(HardwareBackend::new(
                    encoder,
                    cfg,
                    HardwareConfig::from_settings(settings),
                ))
            }
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::RealtimeStream(_) => BackendKind::RealtimeStream,
            Self::OfflineSequence(_) => BackendKind::OfflineSequence,
            Self::Hardware(_) => BackendKind::Hardware,
        }
    }

    /// `true` when the producer should sleep one frame interval between frames.
    pub fn requires_pacing(&self) -> bool {
        matches!(self, Self::RealtimeStream(_))
    }

    /// Attach the mixed soundtrack. Must be called before [`EncoderBackend::start`].
    pub fn set_audio_source(&mut self, audio: &MixedAudio) -> ExportResult<()> {
        let file = match self {
            Self::RealtimeStream(b) => b.audio_mut(),
            Self::OfflineSequence(b) => b.audio_mut(),
            Self::Hardware(b) => b.audio_mut(),
        };
        file.write(audio)
            .map_err(|e| e.into_encoder(EncoderStage::Init))
    }

    pub fn start(&mut self) -> ExportResult<()> {
        match self {
            Self::RealtimeStream(b) => b.start(),
            Self::OfflineSequence(b) => b.start(),
            Self::Hardware(b) => b.start(),
        }
    }

    pub fn feed_frame(&mut self, frame: StreamingFrame) -> ExportResult<()> {
        match self {
            Self::RealtimeStream(b) => b.feed_frame(frame),
            Self::OfflineSequence(b) => b.feed_frame(frame),
            Self::Hardware(b) => b.feed_frame(frame),
        }
    }

    pub fn stop(&mut self) -> ExportResult<FinalBlob> {
        match self {
            Self::RealtimeStream(b) => b.stop(),
            Self::OfflineSequence(b) => b.stop(),
            Self::Hardware(b) => b.stop(),
        }
    }

    /// Release processes, threads and temp files. Idempotent and infallible.
    pub fn cleanup(&mut self) {
        match self {
            Self::RealtimeStream(b) => b.cleanup(),
            Self::OfflineSequence(b) => b.cleanup(),
            Self::Hardware(b) => b.cleanup(),
        }
    }

    /// Frames accepted by `feed_frame` so far.
    pub fn frames_encoded(&self) -> u64 {
        match self {
            Self::RealtimeStream(b) => b.frames_encoded(),
            Self::OfflineSequence(b) => b.frames_encoded(),
            Self::Hardware(b) => b.frames_encoded(),
        }
    }
}

impl Drop for EncoderBackend {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for EncoderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderBackend")
            .field("kind", &self.kind())
            .field("frames_encoded", &self.frames_encoded())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/backend.rs"]
mod tests;

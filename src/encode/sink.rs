use crate::encode::backend::BlobData;
use crate::foundation::core::{Fps, FrameIndex, Rgba8};
use crate::foundation::error::{EncoderStage, ExportError, ExportResult};
use crate::render::frame::FrameRGBA;
use crate::timeline::settings::{ExportFormat, ExportSettings, Quality};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything a sink needs to set up its output stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub format: ExportFormat,
    pub quality: Quality,
    pub video_codec: String,
    pub audio_codec: String,
    /// Target video bitrate in bits per second; `None` for lossless output.
    pub bitrate: Option<u64>,
    /// Distance between forced key frames.
    pub keyframe_interval: Option<u32>,
    /// Color alpha is flattened against.
    pub background: Rgba8,
    pub audio: Option<AudioInputConfig>,
}

impl SinkConfig {
    pub fn from_settings(settings: &ExportSettings) -> ExportResult<Self> {
        Ok(Self {
            width: settings.width,
            height: settings.height,
            fps: settings.frame_rate,
            format: settings.format,
            quality: settings.quality,
            video_codec: settings.video_codec().to_owned(),
            audio_codec: settings.audio_codec().to_owned(),
            bitrate: (settings.quality != Quality::Lossless).then(|| settings.effective_bitrate()),
            keyframe_interval: None,
            background: settings.background()?,
            audio: None,
        })
    }

    pub fn frame_bytes(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

/// Raw PCM audio input for sinks that mux audio.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioInputConfig {
    /// Interleaved `f32le` PCM file.
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Consumer of raw rendered frames.
///
/// `push_frame` is called with strictly increasing indices between `begin` and `end`.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()>;
    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ExportResult<()>;
    /// Finish the stream and hand back the encoded output.
    fn end(&mut self) -> ExportResult<BlobData>;
    /// Tear down without producing output. Must be safe to call in any state.
    fn abort(&mut self) {}
}

/// What an in-memory sink or encoder observed during one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionRecord {
    /// Backend that drove the session, e.g. `"realtime_stream"`.
    pub backend: String,
    pub config: Option<SinkConfig>,
    /// Indices in the order they were received.
    pub indices: Vec<u64>,
    /// Frames flagged as key frames (hardware sessions only).
    pub keyframes: Vec<u64>,
    /// Bytes received per frame, summed.
    pub bytes: u64,
    pub finished: bool,
    pub aborted: bool,
}

impl SessionRecord {
    /// `true` when indices are `0, 1, 2, ...` with no gap or repeat.
    pub fn is_contiguous(&self) -> bool {
        self.indices.iter().enumerate().all(|(i, &idx)| idx == i as u64)
    }
}

/// Shared log of in-memory sessions, inspectable after the sinks were consumed.
#[derive(Clone, Debug, Default)]
pub struct SessionLog {
    sessions: Arc<Mutex<Vec<SessionRecord>>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SessionRecord>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new session and return its slot.
    pub(crate) fn open(&self, backend: &str) -> usize {
        let mut s = self.lock();
        s.push(SessionRecord {
            backend: backend.to_owned(),
            ..SessionRecord::default()
        });
        s.len() - 1
    }

    pub(crate) fn update(&self, slot: usize, f: impl FnOnce(&mut SessionRecord)) {
        if let Some(rec) = self.lock().get_mut(slot) {
            f(rec);
        }
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<SessionRecord> {
        self.lock().last().cloned()
    }
}

/// Summary written as the in-memory "container".
#[derive(serde::Serialize)]
struct InMemoryContainer<'a> {
    backend: &'a str,
    width: u32,
    height: u32,
    fps: Fps,
    frames: usize,
    has_audio: bool,
}

pub(crate) fn in_memory_blob(rec: &SessionRecord) -> ExportResult<BlobData> {
    let cfg = rec
        .config
        .as_ref()
        .ok_or_else(|| ExportError::validation("in-memory session was never started"))?;
    let summary = InMemoryContainer {
        backend: &rec.backend,
        width: cfg.width,
        height: cfg.height,
        fps: cfg.fps,
        frames: rec.indices.len(),
        has_audio: cfg.audio.is_some(),
    };
    let bytes = serde_json::to_vec(&summary).map_err(anyhow::Error::from)?;
    Ok(BlobData::Memory(bytes))
}

/// Frame sink recording into a [`SessionLog`].
#[derive(Debug)]
pub struct InMemorySink {
    log: SessionLog,
    slot: usize,
    last_idx: Option<FrameIndex>,
    fail_at: Option<EncoderStage>,
}

impl InMemorySink {
    pub fn new(log: SessionLog, backend: &str) -> Self {
        let slot = log.open(backend);
        Self {
            log,
            slot,
            last_idx: None,
            fail_at: None,
        }
    }

    /// Fail with an encoder error at `stage` (`Probe`, `Init` and `Start` all fail `begin`).
    pub fn failing_at(mut self, stage: Option<EncoderStage>) -> Self {
        self.fail_at = stage;
        self
    }
}

/// Error raised by in-memory sinks configured to fail at `stage`.
pub(crate) fn injected_failure(fail_at: Option<EncoderStage>, stage: EncoderStage) -> ExportResult<()> {
    let hit = match fail_at {
        Some(f) if f.is_initialization() => stage.is_initialization(),
        Some(f) => f == stage,
        None => false,
    };
    if hit {
        return Err(ExportError::encoder(
            fail_at.unwrap_or(stage),
            "injected in-memory failure",
        ));
    }
    Ok(())
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()> {
        injected_failure(self.fail_at, EncoderStage::Start)?;
        self.last_idx = None;
        self.log.update(self.slot, |r| r.config = Some(cfg));
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ExportResult<()> {
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(ExportError::validation(format!(
                "in-memory sink received frame {} after {}",
                idx.0, last.0
            )));
        }
        injected_failure(self.fail_at, EncoderStage::Feed)?;
        self.last_idx = Some(idx);
        self.log.update(self.slot, |r| {
            r.indices.push(idx.0);
            r.bytes += frame.byte_len();
        });
        Ok(())
    }

    fn end(&mut self) -> ExportResult<BlobData> {
        injected_failure(self.fail_at, EncoderStage::Stop)?;
        let mut rec = None;
        self.log.update(self.slot, |r| {
            r.finished = true;
            rec = Some(r.clone());
        });
        let rec = rec.ok_or_else(|| ExportError::validation("in-memory session missing"))?;
        in_memory_blob(&rec)
    }

    fn abort(&mut self) {
        self.log.update(self.slot, |r| {
            if !r.finished {
                r.aborted = true;
            }
        });
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sink.rs"]
mod tests;

use crate::encode::backend::{AudioTrackFile, BlobData, FinalBlob, FrameOrder};
use crate::encode::ffmpeg::{
    FfmpegProcess, base_command, check_dimensions, ensure_parent_dir, is_ffmpeg_on_path,
    push_input_fps, push_output_args,
};
use crate::encode::sink::{SessionLog, SinkConfig, in_memory_blob, injected_failure};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{EncoderStage, ExportError, ExportResult};
use crate::render::frame::StreamingFrame;
use image::ImageEncoder as _;
use std::path::PathBuf;

/// Consumer of encoded still images, one per frame, in index order.
pub trait ImageSequenceSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()>;
    fn push_image(&mut self, idx: FrameIndex, png: &[u8]) -> ExportResult<()>;
    fn end(&mut self) -> ExportResult<BlobData>;
    fn abort(&mut self) {}
}

/// Pipes PNG frames into `ffmpeg -f image2pipe`.
pub struct FfmpegSequenceSink {
    out_path: PathBuf,
    process: Option<FfmpegProcess>,
}

impl FfmpegSequenceSink {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            process: None,
        }
    }
}

impl ImageSequenceSink for FfmpegSequenceSink {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()> {
        check_dimensions(&cfg)?;
        ensure_parent_dir(&self.out_path)?;
        if !is_ffmpeg_on_path() {
            return Err(ExportError::compatibility(["ffmpeg"]));
        }
        let mut cmd = base_command();
        cmd.args(["-f", "image2pipe", "-c:v", "png"]);
        push_input_fps(&mut cmd, "-framerate", cfg.fps);
        cmd.args(["-i", "pipe:0"]);
        push_output_args(&mut cmd, &cfg, &self.out_path)?;
        tracing::debug!(out = %self.out_path.display(), "spawning ffmpeg image sequence sink");
        self.process = Some(FfmpegProcess::spawn(cmd)?);
        Ok(())
    }

    fn push_image(&mut self, _idx: FrameIndex, png: &[u8]) -> ExportResult<()> {
        self.process
            .as_mut()
            .ok_or_else(|| ExportError::validation("image sequence sink not started"))?
            .write(png)
    }

    fn end(&mut self) -> ExportResult<BlobData> {
        self.process
            .take()
            .ok_or_else(|| ExportError::validation("image sequence sink not started"))?
            .finish()?;
        Ok(BlobData::File(self.out_path.clone()))
    }

    fn abort(&mut self) {
        if let Some(p) = self.process.take() {
            p.kill();
        }
    }
}

impl Drop for FfmpegSequenceSink {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Image sequence sink recording into a [`SessionLog`].
#[derive(Debug)]
pub struct InMemorySequenceSink {
    log: SessionLog,
    slot: usize,
    fail_at: Option<EncoderStage>,
}

impl InMemorySequenceSink {
    pub fn new(log: SessionLog) -> Self {
        let slot = log.open("offline_sequence");
        Self {
            log,
            slot,
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, stage: Option<EncoderStage>) -> Self {
        self.fail_at = stage;
        self
    }
}

impl ImageSequenceSink for InMemorySequenceSink {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()> {
        injected_failure(self.fail_at, EncoderStage::Start)?;
        self.log.update(self.slot, |r| r.config = Some(cfg));
        Ok(())
    }

    fn push_image(&mut self, idx: FrameIndex, png: &[u8]) -> ExportResult<()> {
        injected_failure(self.fail_at, EncoderStage::Feed)?;
        self.log.update(self.slot, |r| {
            r.indices.push(idx.0);
            r.bytes += png.len() as u64;
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
        in_memory_blob(&rec.ok_or_else(|| ExportError::validation("in-memory session missing"))?)
    }

    fn abort(&mut self) {
        self.log.update(self.slot, |r| {
            if !r.finished {
                r.aborted = true;
            }
        });
    }
}

/// Encodes each frame to PNG and hands it to an [`ImageSequenceSink`]. Never paced.
pub struct OfflineSequenceBackend {
    sink: Box<dyn ImageSequenceSink>,
    cfg: SinkConfig,
    order: FrameOrder,
    audio: AudioTrackFile,
    started: bool,
    png: Vec<u8>,
}

impl OfflineSequenceBackend {
    pub fn new(sink: Box<dyn ImageSequenceSink>, cfg: SinkConfig) -> Self {
        Self {
            sink,
            cfg,
            order: FrameOrder::default(),
            audio: AudioTrackFile::default(),
            started: false,
            png: Vec::new(),
        }
    }

    pub(crate) fn audio_mut(&mut self) -> &mut AudioTrackFile {
        &mut self.audio
    }

    pub(crate) fn start(&mut self) -> ExportResult<()> {
        let mut cfg = self.cfg.clone();
        cfg.audio = self.audio.input();
        self.sink
            .begin(cfg)
            .map_err(|e| e.into_encoder(EncoderStage::Start))?;
        self.started = true;
        Ok(())
    }

    pub(crate) fn feed_frame(&mut self, frame: StreamingFrame) -> ExportResult<()> {
        if !self.started {
            return Err(ExportError::encoder(EncoderStage::Feed, "backend not started"));
        }
        self.order.admit(frame.index)?;
        let flat = frame.image.flatten_over(self.cfg.background);
        self.png.clear();
        image::codecs::png::PngEncoder::new(&mut self.png)
            .write_image(
                &flat,
                frame.image.width,
                frame.image.height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| {
                ExportError::encoder(
                    EncoderStage::Feed,
                    format!("png encode of frame {} failed: {e}", frame.index.0),
                )
            })?;
        self.sink
            .push_image(frame.index, &self.png)
            .map_err(|e| e.into_encoder(EncoderStage::Feed))
    }

    pub(crate) fn stop(&mut self) -> ExportResult<FinalBlob> {
        if !self.started {
            return Err(ExportError::encoder(EncoderStage::Stop, "backend not started"));
        }
        self.started = false;
        let data = self
            .sink
            .end()
            .map_err(|e| e.into_encoder(EncoderStage::Stop))?;
        FinalBlob::new(self.cfg.format.mime_type(), data)
    }

    pub(crate) fn cleanup(&mut self) {
        if self.started {
            self.sink.abort();
            self.started = false;
        }
        self.audio.remove();
    }

    pub(crate) fn frames_encoded(&self) -> u64 {
        self.order.count()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sequence.rs"]
mod tests;

use crate::encode::backend::{BackendKind, FinalBlob};
use crate::foundation::core::Fps;
use crate::foundation::error::ExportError;
use crate::timeline::settings::Quality;

/// Frame-loop driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Sequential,
    Parallel,
}

/// Resource profile for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportProfile {
    #[default]
    Standard,
    /// Sparser memory checkpoints and media preloading for long exports.
    MemoryOptimized,
}

/// Summary of a finished export.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ExportMetadata {
    pub duration_ms: u64,
    pub frames: u64,
    pub quality: Quality,
    pub engine: EngineKind,
    pub backend: BackendKind,
    pub fallback_occurred: bool,
    pub skipped_audio_tracks: usize,
    pub memory_warnings: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportOutcome {
    pub blob: FinalBlob,
    pub metadata: ExportMetadata,
}

/// Output duration of `frames` at `fps`, in whole milliseconds.
pub fn duration_ms(frames: u64, fps: Fps) -> u64 {
    (fps.frames_to_secs(frames) * 1000.0).round() as u64
}

/// What one orchestrator attempt produced.
#[derive(Debug)]
pub(crate) struct RunReport {
    pub blob: FinalBlob,
    pub frames: u64,
    pub fps: Fps,
    pub backend: BackendKind,
    pub skipped_audio_tracks: usize,
    pub memory_warnings: u32,
}

impl RunReport {
    pub(crate) fn into_outcome(self, quality: Quality, engine: EngineKind, fallback_occurred: bool) -> ExportOutcome {
        ExportOutcome {
            metadata: ExportMetadata {
                duration_ms: duration_ms(self.frames, self.fps),
                frames: self.frames,
                quality,
                engine,
                backend: self.backend,
                fallback_occurred,
                skipped_audio_tracks: self.skipped_audio_tracks,
                memory_warnings: self.memory_warnings,
            },
            blob: self.blob,
        }
    }
}

/// A failed attempt and how far it got.
#[derive(Debug)]
pub(crate) struct RunFailure {
    pub error: ExportError,
    /// Frames the encoder accepted before the failure.
    pub frames_encoded: u64,
}

impl RunFailure {
    pub(crate) fn before_encoding(error: ExportError) -> Self {
        Self {
            error,
            frames_encoded: 0,
        }
    }
}

pub(crate) type RunResult = Result<RunReport, RunFailure>;

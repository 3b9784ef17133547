//! vexport turns a timeline snapshot into an encoded video.
//!
//! The pipeline plans which elements are visible on every frame, composites them on CPU
//! surfaces, mixes the audio tracks, and streams the frames into an encoder backend. An
//! [`Exporter`] picks the engine per export from memory headroom, cores and hardware support,
//! and falls back to the sequential realtime path when a faster attempt fails before encoding.
#![forbid(unsafe_code)]

mod foundation;

pub(crate) mod audio;
pub(crate) mod config;
pub(crate) mod encode;
pub(crate) mod export;
pub(crate) mod media;
pub(crate) mod memory;
pub(crate) mod planner;
pub(crate) mod render;
pub(crate) mod timeline;

pub use crate::foundation::core::{Affine, Canvas, Fps, FrameIndex, FrameRange, Rect, Rgba8, Vec2};
pub use crate::foundation::error::{EncoderStage, ErrorKind, ExportError, ExportResult};

pub use crate::config::{MediaConfig, PipelineConfig};
pub use crate::timeline::job::{ExportJob, FontSource};
pub use crate::timeline::model::{
    ElementPayload, MediaItem, MediaKind, MediaLibrary, MediaPayload, MediaSource, TextAlign,
    TextBaseline, TextPayload, TextStyle, TimelineElement,
};
pub use crate::timeline::settings::{ExportFormat, ExportSettings, Quality};

pub use crate::planner::frame_planner::{FrameDescriptor, FramePlanner, element_bounds, total_frames};

pub use crate::memory::ledger::{LedgerEntry, MemoryLedger};
pub use crate::memory::monitor::{
    Evictable, GIB, MIB, MemoryCheckpoint, MemoryConfig, MemoryMonitor, MemoryStatus, MemoryTier,
    OptimalSettings, QualityPreset, estimate_export_bytes, format_bytes,
};
#[cfg(feature = "alloc-track")]
pub use crate::memory::probe::AllocTrackProbe;
pub use crate::memory::probe::{LedgerMemoryProbe, ManualMemoryProbe, MemoryProbe, ProcessMemoryProbe};

pub use crate::media::cache::{DEFAULT_SEEK_TIMEOUT, DEFAULT_VIDEO_FRAME_CAPACITY, MediaCache};
pub use crate::media::decode::{
    AudioPcm, DecodeError, DecodeResult, DecodedImage, FfmpegMediaDecoder, MIX_SAMPLE_RATE,
    MediaDecoder,
};

pub use crate::render::compositor::FrameCompositor;
pub use crate::render::frame::{FrameRGBA, StreamingFrame};
pub use crate::render::pool::RendererPool;
pub use crate::render::surface::{SurfaceError, SurfaceRenderer};
pub use crate::render::text::{FontBook, TextError};

pub use crate::audio::mixer::{AudioMixer, MIX_CHANNELS, MixedAudio};

pub use crate::encode::backend::{BackendKind, BlobData, EncoderBackend, FinalBlob};
pub use crate::encode::ffmpeg::{FfmpegSink, is_ffmpeg_on_path};
pub use crate::encode::hardware::{
    FfmpegHardwareEncoder, HARDWARE_CODEC_CANDIDATES, HardwareConfig, HardwareEncoder,
    HardwareSupport, probe_ffmpeg_hardware,
};
pub use crate::encode::sequence::{FfmpegSequenceSink, ImageSequenceSink, InMemorySequenceSink};
pub use crate::encode::sink::{
    AudioInputConfig, FrameSink, InMemorySink, SessionLog, SessionRecord, SinkConfig,
};
pub use crate::encode::targets::{
    EncoderTargets, FfmpegTargets, InMemoryHardware, InMemoryHardwareEncoder, InMemoryTargets,
};

pub use crate::export::context::PipelineContext;
pub use crate::export::control::{CancelToken, ExportControl, ExportState};
pub use crate::export::orchestrator::{SequentialConfig, SequentialExporter};
pub use crate::export::outcome::{
    EngineKind, ExportMetadata, ExportOutcome, ExportProfile, duration_ms,
};
pub use crate::export::parallel::{FrameHook, ParallelConfig, ParallelExporter, batch_size};
pub use crate::export::preflight::{Capabilities, Capability};
pub use crate::export::progress::{ExportProgress, WARNING_PERCENT, ignore_progress};
pub use crate::export::reorder::ReorderBuffer;
pub use crate::export::selector::{
    EngineOverride, EnginePlan, Exporter, SelectorThresholds, decide,
};

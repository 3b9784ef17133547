use crate::encode::backend::BackendKind;
use crate::export::context::PipelineContext;
use crate::export::control::{ExportControl, ExportState, RunGuard};
use crate::export::outcome::{EngineKind, ExportOutcome, ExportProfile, RunFailure, RunReport, RunResult};
use crate::export::progress::{ExportProgress, ProgressReporter};
use crate::export::scope::ExportScope;
use crate::export::stages::{FinishedFrames, finalize, memory_checkpoint, preflight, prepare_encoder};
use crate::foundation::error::{ExportError, ExportResult};
use crate::planner::frame_planner::FramePlanner;
use crate::render::compositor::FrameCompositor;
use crate::render::frame::StreamingFrame;
use crate::render::surface::SurfaceRenderer;
use crate::render::text::FontBook;
use crate::timeline::job::ExportJob;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Knobs of the sequential engine.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    /// Frames between memory checks in the standard profile.
    pub standard_memory_stride: u64,
    /// Frames between memory checks in the memory-optimized profile.
    pub optimized_memory_stride: u64,
    /// Memory-optimized exports at least this long preload their images.
    pub preload_min_duration_secs: f64,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            standard_memory_stride: 30,
            optimized_memory_stride: 60,
            preload_min_duration_secs: 15.0,
        }
    }
}

impl SequentialConfig {
    pub fn validate(&self) -> ExportResult<()> {
        if self.standard_memory_stride == 0 || self.optimized_memory_stride == 0 {
            return Err(ExportError::validation(
                "sequential memory strides must be > 0",
            ));
        }
        Ok(())
    }

    fn stride(&self, profile: ExportProfile) -> u64 {
        match profile {
            ExportProfile::Standard => self.standard_memory_stride,
            ExportProfile::MemoryOptimized => self.optimized_memory_stride,
        }
    }
}

/// Single-threaded exporter: one renderer, one frame at a time.
#[derive(Debug)]
pub struct SequentialExporter {
    ctx: Arc<PipelineContext>,
    control: ExportControl,
}

impl SequentialExporter {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            control: ExportControl::new(),
        }
    }

    /// Export through the realtime stream backend with the standard profile.
    pub fn start_export(
        &self,
        job: &ExportJob,
        progress: &dyn Fn(ExportProgress),
    ) -> ExportResult<ExportOutcome> {
        self.start_export_with(job, BackendKind::RealtimeStream, ExportProfile::Standard, progress)
    }

    pub fn start_export_with(
        &self,
        job: &ExportJob,
        backend: BackendKind,
        profile: ExportProfile,
        progress: &dyn Fn(ExportProgress),
    ) -> ExportResult<ExportOutcome> {
        let guard = self.control.begin()?;
        let mut reporter = ProgressReporter::new(progress);
        let result = run_sequential(&self.ctx, job, backend, profile, &guard, &mut reporter)
            .map(|r| r.into_outcome(job.settings.quality, EngineKind::Sequential, false))
            .map_err(|f| f.error);
        guard.settle(&result);
        result
    }

    pub fn cancel_export(&self) {
        self.control.cancel();
    }

    pub fn state(&self) -> ExportState {
        self.control.state()
    }
}

#[tracing::instrument(name = "sequential_export", skip_all, fields(backend = %backend, profile = ?profile))]
pub(crate) fn run_sequential(
    ctx: &PipelineContext,
    job: &ExportJob,
    backend: BackendKind,
    profile: ExportProfile,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
) -> RunResult {
    let warnings = preflight(ctx, job, guard, reporter).map_err(RunFailure::before_encoding)?;
    let mut scope = ExportScope::open(ctx, job);
    let result = render_sequential(ctx, job, backend, profile, guard, reporter, &mut scope, warnings);
    let frames_encoded = scope.frames_encoded();
    scope.close();
    result.map_err(|error| RunFailure {
        error,
        frames_encoded,
    })
}

#[allow(clippy::too_many_arguments)]
fn render_sequential(
    ctx: &PipelineContext,
    job: &ExportJob,
    kind: BackendKind,
    profile: ExportProfile,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
    scope: &mut ExportScope,
    mut warnings: u32,
) -> ExportResult<RunReport> {
    let cfg = &ctx.config().sequential;
    let settings = &job.settings;
    if profile == ExportProfile::MemoryOptimized && job.duration >= cfg.preload_min_duration_secs {
        reporter.report(3, "Preloading media");
        let images = scope.preload(job);
        tracing::debug!(images, "media preloaded");
        reporter.report(8, "Media preloaded");
    }

    let fonts = FontBook::from_sources(&job.fonts)?;
    let mut renderer = SurfaceRenderer::with_fonts(settings.width, settings.height, &fonts)
        .map_err(|e| e.into_render(0, 0.0))?;
    let skipped = prepare_encoder(ctx, scope, kind, job, guard, reporter)?;

    guard.enter(ExportState::Rendering);
    let planner = FramePlanner::new(settings.frame_rate, job.duration, &job.elements);
    let total = planner.total_frames();
    let checkpoint = ctx.monitor().checkpoint(cfg.stride(profile));
    let cache = scope.cache();
    let compositor = FrameCompositor::new(&job.media, &cache, settings.background()?, settings.canvas());
    let backend = scope.backend()?;
    let pace = ctx.config().pacing && backend.requires_pacing();
    tracing::debug!(total, paced = pace, "rendering frames");

    reporter.frame(0, total);
    let started = Instant::now();
    for n in 0..total {
        guard.check_cancelled()?;
        memory_checkpoint(&checkpoint, n, reporter, &mut warnings)?;
        let frame = planner.frame_data(n);
        let image = compositor.compose(&mut renderer, &frame)?;
        backend.feed_frame(StreamingFrame::new(n, image, frame.timestamp))?;
        reporter.frame(n + 1, total);
        // Frame `n + 1` is due at a fixed offset from the start, whatever the render time.
        if pace && n + 1 < total {
            let due = started + Duration::from_secs_f64(settings.frame_rate.frames_to_secs(n + 1));
            let wait = due.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    finalize(
        scope,
        job,
        guard,
        reporter,
        FinishedFrames {
            frames: total,
            backend: kind,
            skipped_audio_tracks: skipped,
            memory_warnings: warnings,
        },
    )
}

#[cfg(test)]
#[path = "../../tests/unit/export/orchestrator.rs"]
mod tests;

use crate::encode::backend::BackendKind;
use crate::export::context::PipelineContext;
use crate::export::control::{ExportControl, ExportState, RunGuard};
use crate::export::outcome::{EngineKind, ExportOutcome, RunFailure, RunReport, RunResult};
use crate::export::progress::{ExportProgress, ProgressReporter};
use crate::export::reorder::ReorderBuffer;
use crate::export::scope::ExportScope;
use crate::export::stages::{FinishedFrames, finalize, memory_checkpoint, preflight, prepare_encoder};
use crate::foundation::core::{Canvas, FrameIndex, FrameRange};
use crate::foundation::error::{ExportError, ExportResult};
use crate::memory::monitor::{GIB, format_bytes};
use crate::planner::frame_planner::{FrameDescriptor, FramePlanner};
use crate::render::compositor::FrameCompositor;
use crate::render::frame::StreamingFrame;
use crate::render::pool::RendererPool;
use crate::render::text::FontBook;
use crate::timeline::job::ExportJob;
use rayon::prelude::*;
use std::sync::Arc;

/// Knobs of the parallel engine.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Fixed batch size; derived from memory and cores when unset.
    pub batch_size: Option<usize>,
    /// Share of available memory the in-flight frames may use.
    pub available_share: f64,
    /// Cap on the memory budget of one batch.
    pub max_batch_bytes: u64,
    pub min_batch: usize,
    pub max_batch: usize,
    /// Lower bound of the reorder watermark.
    pub watermark_min: usize,
    /// Batches between memory checks.
    pub memory_stride_batches: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            available_share: 0.3,
            max_batch_bytes: 2 * GIB,
            min_batch: 2,
            max_batch: 16,
            watermark_min: 20,
            memory_stride_batches: 4,
        }
    }
}

impl ParallelConfig {
    pub fn validate(&self) -> ExportResult<()> {
        if self.batch_size == Some(0) {
            return Err(ExportError::validation("parallel.batch_size must be >= 1 when set"));
        }
        if !(self.available_share > 0.0 && self.available_share <= 1.0) {
            return Err(ExportError::validation("parallel.available_share must be in (0, 1]"));
        }
        if self.min_batch == 0 || self.max_batch < self.min_batch {
            return Err(ExportError::validation(
                "parallel batch bounds must satisfy 1 <= min_batch <= max_batch",
            ));
        }
        if self.max_batch_bytes == 0 || self.watermark_min == 0 || self.memory_stride_batches == 0 {
            return Err(ExportError::validation(
                "parallel.max_batch_bytes, watermark_min and memory_stride_batches must be > 0",
            ));
        }
        Ok(())
    }

    /// Reorder watermark for batch size `batch`.
    pub fn watermark(&self, batch: usize) -> usize {
        (batch * 2).max(self.watermark_min)
    }
}

/// Frames rendered concurrently per batch.
///
/// Budget is `min(available * share, max_batch_bytes)`, split into double-buffered frames of
/// `canvas`, clamped to `[min_batch, min(cores * 2, max_batch)]`.
pub fn batch_size(cfg: &ParallelConfig, available_bytes: u64, canvas: Canvas, cores: usize) -> usize {
    if let Some(fixed) = cfg.batch_size {
        return fixed.max(1);
    }
    let budget = ((available_bytes as f64 * cfg.available_share) as u64).min(cfg.max_batch_bytes);
    let per_frame = canvas.frame_bytes().saturating_mul(2).max(1);
    let fit = usize::try_from(budget / per_frame).unwrap_or(usize::MAX);
    let upper = cores.saturating_mul(2).min(cfg.max_batch).max(cfg.min_batch);
    fit.clamp(cfg.min_batch, upper)
}

/// Called on the worker thread just before a frame is composed.
pub type FrameHook = Arc<dyn Fn(FrameIndex) + Send + Sync>;

/// Multi-threaded exporter: batches of frames rendered on a fixed renderer pool, written
/// through a reorder buffer.
pub struct ParallelExporter {
    ctx: Arc<PipelineContext>,
    control: ExportControl,
    hook: Option<FrameHook>,
}

impl ParallelExporter {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            control: ExportControl::new(),
            hook: None,
        }
    }

    pub fn with_frame_hook(mut self, hook: FrameHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Export through the offline sequence backend.
    pub fn start_export(
        &self,
        job: &ExportJob,
        progress: &dyn Fn(ExportProgress),
    ) -> ExportResult<ExportOutcome> {
        let guard = self.control.begin()?;
        let mut reporter = ProgressReporter::new(progress);
        let result = run_parallel(
            &self.ctx,
            job,
            BackendKind::OfflineSequence,
            self.hook.as_ref(),
            &guard,
            &mut reporter,
        )
        .map(|r| r.into_outcome(job.settings.quality, EngineKind::Parallel, false))
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

impl std::fmt::Debug for ParallelExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExporter")
            .field("ctx", &self.ctx)
            .field("control", &self.control)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

#[tracing::instrument(name = "parallel_export", skip_all, fields(backend = %backend))]
pub(crate) fn run_parallel(
    ctx: &PipelineContext,
    job: &ExportJob,
    backend: BackendKind,
    hook: Option<&FrameHook>,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
) -> RunResult {
    let warnings = preflight(ctx, job, guard, reporter).map_err(RunFailure::before_encoding)?;
    let mut scope = ExportScope::open(ctx, job);
    let result = render_parallel(ctx, job, backend, hook, guard, reporter, &mut scope, warnings);
    let frames_encoded = scope.frames_encoded();
    scope.close();
    result.map_err(|error| RunFailure {
        error,
        frames_encoded,
    })
}

fn build_thread_pool(threads: usize) -> ExportResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("vexport-render-{i}"))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build rayon thread pool: {e}").into())
}

#[allow(clippy::too_many_arguments)]
fn render_parallel(
    ctx: &PipelineContext,
    job: &ExportJob,
    kind: BackendKind,
    hook: Option<&FrameHook>,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
    scope: &mut ExportScope,
    mut warnings: u32,
) -> ExportResult<RunReport> {
    let cfg = &ctx.config().parallel;
    let settings = &job.settings;
    let canvas = settings.canvas();
    let available = ctx.monitor().status().available_bytes;
    let batch = batch_size(cfg, available, canvas, ctx.cpus());
    tracing::debug!(
        batch,
        available = %format_bytes(available),
        "parallel batch size"
    );

    let fonts = FontBook::from_sources(&job.fonts)?;
    let mut renderers =
        RendererPool::new(batch, canvas, &fonts).map_err(|e| e.into_render(0, 0.0))?;
    let pool = build_thread_pool(batch)?;
    let skipped = prepare_encoder(ctx, scope, kind, job, guard, reporter)?;

    guard.enter(ExportState::Rendering);
    let planner = FramePlanner::new(settings.frame_rate, job.duration, &job.elements);
    let total = planner.total_frames();
    let checkpoint = ctx
        .monitor()
        .checkpoint((batch as u64).saturating_mul(cfg.memory_stride_batches));
    let cache = scope.cache();
    let compositor = FrameCompositor::new(&job.media, &cache, settings.background()?, canvas);
    let backend = scope.backend()?;
    let mut reorder = ReorderBuffer::new(FrameIndex(0), cfg.watermark(batch));
    let range = FrameRange::new(FrameIndex(0), FrameIndex(total))?;

    reporter.frame(0, total);
    for chunk in range.chunks(batch as u64) {
        guard.check_cancelled()?;
        memory_checkpoint(&checkpoint, chunk.start.0, reporter, &mut warnings)?;

        let frames: Vec<FrameDescriptor<'_>> =
            (chunk.start.0..chunk.end.0).map(|n| planner.frame_data(n)).collect();
        let rendered: Vec<ExportResult<StreamingFrame>> = pool.install(|| {
            renderers
                .slots_mut()
                .par_iter_mut()
                .zip(frames.par_iter())
                .map(|(renderer, frame)| {
                    if let Some(hook) = hook {
                        hook(FrameIndex(frame.frame_number));
                    }
                    let image = compositor.compose(renderer, frame)?;
                    Ok(StreamingFrame::new(frame.frame_number, image, frame.timestamp))
                })
                .collect()
        });
        for frame in rendered {
            reorder.insert(frame?)?;
        }
        reorder.drain(|f| backend.feed_frame(f))?;
        reporter.frame(reorder.next_index().0, total);
    }
    reorder.flush(|f| backend.feed_frame(f))?;
    reporter.frame(reorder.next_index().0, total);

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
#[path = "../../tests/unit/export/parallel.rs"]
mod tests;

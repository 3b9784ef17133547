//! Steps shared by the sequential and parallel orchestrators.

use crate::encode::backend::BackendKind;
use crate::export::context::PipelineContext;
use crate::export::control::{ExportState, RunGuard};
use crate::export::outcome::RunReport;
use crate::export::preflight::check_memory;
use crate::export::progress::ProgressReporter;
use crate::export::scope::ExportScope;
use crate::foundation::error::ExportResult;
use crate::memory::monitor::{MemoryCheckpoint, MemoryTier};
use crate::timeline::job::ExportJob;

/// Validation, capability and memory admission. Returns the number of memory warnings raised.
pub(crate) fn preflight(
    ctx: &PipelineContext,
    job: &ExportJob,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
) -> ExportResult<u32> {
    guard.enter(ExportState::Preflighting);
    reporter.report(2, "Checking system compatibility");
    job.validate()?;
    ctx.check_capabilities(job)?;
    let mut warnings = 0;
    if let Some(projected) = check_memory(ctx.monitor(), job)? {
        warnings += 1;
        reporter.warn(format!(
            "Memory usage will be high during this export (about {:.0}% of the limit)",
            projected.percent_used
        ));
    }
    guard.check_cancelled()?;
    Ok(warnings)
}

/// Mix audio, then create and start the encoder. Returns the number of skipped audio tracks.
pub(crate) fn prepare_encoder(
    ctx: &PipelineContext,
    scope: &mut ExportScope,
    kind: BackendKind,
    job: &ExportJob,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
) -> ExportResult<usize> {
    reporter.report(5, "Mixing audio");
    let (audio, skipped) = scope.mix_audio(job);
    if skipped > 0 {
        reporter.warn(format!(
            "{skipped} audio track(s) could not be processed and were left out"
        ));
    }
    guard.check_cancelled()?;
    scope.start_backend(ctx, kind, job, audio.as_ref())?;
    reporter.report(10, "Encoder ready");
    Ok(skipped)
}

/// Frame-loop memory hook; warning-tier readings are surfaced as progress warnings.
pub(crate) fn memory_checkpoint(
    checkpoint: &MemoryCheckpoint<'_>,
    frame: u64,
    reporter: &mut ProgressReporter<'_>,
    warnings: &mut u32,
) -> ExportResult<()> {
    if let Some(status) = checkpoint.check_during(frame)?
        && status.tier == MemoryTier::Warning
    {
        *warnings += 1;
        reporter.warn(format!(
            "Memory usage is high ({:.0}% of the limit); freeing caches",
            status.percent_used
        ));
    }
    Ok(())
}

pub(crate) struct FinishedFrames {
    pub frames: u64,
    pub backend: BackendKind,
    pub skipped_audio_tracks: usize,
    pub memory_warnings: u32,
}

/// Stop the encoder and assemble the report.
pub(crate) fn finalize(
    scope: &mut ExportScope,
    job: &ExportJob,
    guard: &RunGuard<'_>,
    reporter: &mut ProgressReporter<'_>,
    done: FinishedFrames,
) -> ExportResult<RunReport> {
    guard.check_cancelled()?;
    guard.enter(ExportState::Finalizing);
    reporter.report(90, "Finalizing export");
    let blob = scope.finish()?;
    reporter.report(100, "Export complete");
    tracing::info!(
        frames = done.frames,
        bytes = blob.size_bytes,
        backend = %done.backend,
        "export finished"
    );
    Ok(RunReport {
        blob,
        frames: done.frames,
        fps: job.settings.frame_rate,
        backend: done.backend,
        skipped_audio_tracks: done.skipped_audio_tracks,
        memory_warnings: done.memory_warnings,
    })
}

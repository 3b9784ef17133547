use crate::config::PipelineConfig;
use crate::encode::backend::BackendKind;
use crate::encode::hardware::HardwareSupport;
use crate::encode::targets::EncoderTargets;
use crate::export::context::PipelineContext;
use crate::export::control::{ExportControl, ExportState};
use crate::export::orchestrator::run_sequential;
use crate::export::outcome::{EngineKind, ExportOutcome, ExportProfile, RunFailure};
use crate::export::parallel::{FrameHook, run_parallel};
use crate::export::progress::{ExportProgress, ProgressReporter};
use crate::foundation::error::{ErrorKind, ExportError, ExportResult};
use crate::memory::monitor::{GIB, MemoryMonitor, MemoryStatus, MemoryTier};
use crate::timeline::job::ExportJob;
use std::str::FromStr;
use std::sync::Arc;

/// Resources the parallel engine needs before it is chosen automatically.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SelectorThresholds {
    /// Available memory must exceed this.
    pub parallel_min_available_bytes: u64,
    pub parallel_min_cores: usize,
}

impl Default for SelectorThresholds {
    fn default() -> Self {
        Self {
            parallel_min_available_bytes: 2 * GIB,
            parallel_min_cores: 4,
        }
    }
}

/// Caller preference for the engine. `Auto` lets [`decide`] choose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOverride {
    #[default]
    Auto,
    Stable,
    Parallel,
    #[serde(alias = "webcodecs")]
    Hardware,
}

impl FromStr for EngineOverride {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "stable" => Ok(Self::Stable),
            "parallel" => Ok(Self::Parallel),
            "hardware" | "webcodecs" => Ok(Self::Hardware),
            other => Err(ExportError::validation(format!(
                "unknown engine '{other}' (expected auto, stable, parallel or hardware)"
            ))),
        }
    }
}

/// Engine, backend and profile chosen for one attempt.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct EnginePlan {
    pub engine: EngineKind,
    pub backend: BackendKind,
    pub profile: ExportProfile,
    pub reason: String,
}

impl EnginePlan {
    fn sequential(backend: BackendKind, profile: ExportProfile, reason: impl Into<String>) -> Self {
        Self {
            engine: EngineKind::Sequential,
            backend,
            profile,
            reason: reason.into(),
        }
    }

    /// Sequential engine on the realtime stream backend, the end of every fallback chain.
    pub fn stable(profile: ExportProfile, reason: impl Into<String>) -> Self {
        Self::sequential(BackendKind::RealtimeStream, profile, reason)
    }

    pub fn is_stable(&self) -> bool {
        self.engine == EngineKind::Sequential && self.backend == BackendKind::RealtimeStream
    }

    /// Next plan down the chain, `None` once stable.
    pub fn fallback(&self) -> Option<EnginePlan> {
        if self.is_stable() {
            return None;
        }
        Some(Self::stable(
            self.profile,
            format!("fallback from {:?} + {}", self.engine, self.backend),
        ))
    }

    /// Whether a failed attempt of this plan may be retried down the chain.
    ///
    /// Only failures before the first encoded frame qualify.
    pub fn can_fall_back(&self, error: &ExportError, frames_encoded: u64) -> bool {
        if frames_encoded > 0 || self.is_stable() {
            return false;
        }
        match error.kind() {
            ErrorKind::Encoder | ErrorKind::Compatibility => true,
            ErrorKind::Memory => self.engine == EngineKind::Parallel,
            _ => false,
        }
    }
}

/// Pure engine choice from the current readings.
pub fn decide(
    status: &MemoryStatus,
    hardware: &HardwareSupport,
    cpus: usize,
    requested: EngineOverride,
    thresholds: &SelectorThresholds,
) -> EnginePlan {
    if status.tier == MemoryTier::Critical {
        return EnginePlan::stable(ExportProfile::MemoryOptimized, "memory critical");
    }
    let profile = if status.tier.is_pressure() {
        ExportProfile::MemoryOptimized
    } else {
        ExportProfile::Standard
    };
    let hardware_plan = || match hardware {
        HardwareSupport::Supported { codec } => Some(EnginePlan::sequential(
            BackendKind::Hardware,
            profile,
            format!("hardware encoder {codec} available"),
        )),
        HardwareSupport::Unsupported { .. } => None,
    };
    let parallel_plan = |reason: &str| EnginePlan {
        engine: EngineKind::Parallel,
        backend: BackendKind::OfflineSequence,
        profile,
        reason: reason.to_owned(),
    };

    match requested {
        EngineOverride::Stable => EnginePlan::stable(profile, "stable engine requested"),
        EngineOverride::Parallel => parallel_plan("parallel engine requested"),
        EngineOverride::Hardware => hardware_plan().unwrap_or_else(|| {
            EnginePlan::stable(profile, "hardware requested but unsupported")
        }),
        EngineOverride::Auto => {
            if let Some(plan) = hardware_plan() {
                return plan;
            }
            if status.available_bytes > thresholds.parallel_min_available_bytes
                && cpus >= thresholds.parallel_min_cores
            {
                return parallel_plan("enough memory and cores for parallel rendering");
            }
            EnginePlan::stable(profile, "default")
        }
    }
}

/// Entry point: picks an engine per export and falls back down the chain when an attempt
/// fails before encoding.
pub struct Exporter {
    ctx: Arc<PipelineContext>,
    control: ExportControl,
    requested: EngineOverride,
    hook: Option<FrameHook>,
}

impl Exporter {
    pub fn new(
        config: PipelineConfig,
        monitor: Arc<MemoryMonitor>,
        targets: Arc<dyn EncoderTargets>,
    ) -> Self {
        Self::from_context(Arc::new(PipelineContext::new(config, monitor, targets)))
    }

    pub fn from_context(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            control: ExportControl::new(),
            requested: EngineOverride::Auto,
            hook: None,
        }
    }

    pub fn with_override(mut self, requested: EngineOverride) -> Self {
        self.requested = requested;
        self
    }

    /// Hook run before every frame of the parallel engine.
    pub fn with_frame_hook(mut self, hook: FrameHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// The plan the next export would start with.
    pub fn plan(&self) -> EnginePlan {
        let hardware = match self.requested {
            EngineOverride::Auto | EngineOverride::Hardware => self.ctx.targets().probe_hardware(),
            EngineOverride::Stable | EngineOverride::Parallel => HardwareSupport::Unsupported {
                reason: "not requested".to_owned(),
            },
        };
        decide(
            &self.ctx.monitor().status(),
            &hardware,
            self.ctx.cpus(),
            self.requested,
            &self.ctx.config().selector,
        )
    }

    #[tracing::instrument(name = "export", skip_all, fields(requested = ?self.requested))]
    pub fn start_export(
        &self,
        job: &ExportJob,
        progress: &dyn Fn(ExportProgress),
    ) -> ExportResult<ExportOutcome> {
        let guard = self.control.begin()?;
        let mut reporter = ProgressReporter::new(progress);
        let mut plan = self.plan();
        let mut fallback_occurred = false;
        tracing::info!(engine = ?plan.engine, backend = %plan.backend, reason = %plan.reason, "engine selected");

        let result = loop {
            let attempt = match plan.engine {
                EngineKind::Sequential => run_sequential(
                    &self.ctx,
                    job,
                    plan.backend,
                    plan.profile,
                    &guard,
                    &mut reporter,
                ),
                EngineKind::Parallel => run_parallel(
                    &self.ctx,
                    job,
                    plan.backend,
                    self.hook.as_ref(),
                    &guard,
                    &mut reporter,
                ),
            };
            match attempt {
                Ok(report) => {
                    break Ok(report.into_outcome(job.settings.quality, plan.engine, fallback_occurred));
                }
                Err(RunFailure {
                    error,
                    frames_encoded,
                }) => {
                    let next = plan
                        .can_fall_back(&error, frames_encoded)
                        .then(|| plan.fallback())
                        .flatten();
                    let Some(next) = next else {
                        break Err(error);
                    };
                    tracing::warn!(
                        error = %error,
                        from = %plan.backend,
                        to = %next.backend,
                        "export attempt failed before encoding; falling back"
                    );
                    fallback_occurred = true;
                    plan = next;
                }
            }
        };
        guard.settle(&result);
        if let Err(e) = &result {
            tracing::warn!(error = %e, kind = ?e.kind(), "export failed");
        }
        result
    }

    /// Request cancellation of the running export. Idempotent.
    pub fn cancel_export(&self) {
        self.control.cancel();
    }

    pub fn state(&self) -> ExportState {
        self.control.state()
    }

    pub fn is_busy(&self) -> bool {
        self.control.is_busy()
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("ctx", &self.ctx)
            .field("requested", &self.requested)
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/export/selector.rs"]
mod tests;

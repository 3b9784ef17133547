use crate::encode::ffmpeg::is_ffmpeg_on_path;
use crate::foundation::error::{ExportError, ExportResult};
use crate::memory::monitor::{MemoryMonitor, MemoryStatus, estimate_export_bytes, format_bytes};
use crate::timeline::job::ExportJob;
use std::process::{Command, Stdio};

/// External tool an export may depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Ffmpeg,
    Ffprobe,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Ffprobe => "ffprobe",
        }
    }
}

/// What this machine offers.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    pub ffmpeg: bool,
    pub ffprobe: bool,
    pub cpus: usize,
}

impl Capabilities {
    pub fn probe() -> Self {
        let caps = Self {
            ffmpeg: is_ffmpeg_on_path(),
            ffprobe: tool_on_path("ffprobe"),
            cpus: available_cpus(),
        };
        tracing::debug!(?caps, "capabilities probed");
        caps
    }

    /// Every tool present, with `cpus` cores.
    pub fn full(cpus: usize) -> Self {
        Self {
            ffmpeg: true,
            ffprobe: true,
            cpus: cpus.max(1),
        }
    }

    pub fn has(&self, c: Capability) -> bool {
        match c {
            Capability::Ffmpeg => self.ffmpeg,
            Capability::Ffprobe => self.ffprobe,
        }
    }

    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        let mut out: Vec<Capability> = required.iter().copied().filter(|c| !self.has(*c)).collect();
        out.dedup();
        out
    }

    /// `Compatibility` error naming every missing tool.
    pub fn require(&self, required: &[Capability]) -> ExportResult<()> {
        let missing = self.missing(required);
        if missing.is_empty() {
            return Ok(());
        }
        Err(ExportError::compatibility(missing.iter().map(|c| c.as_str())))
    }
}

pub(crate) fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn tool_on_path(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Admission check run before any encoder starts.
///
/// Rejects with a memory error when the estimate does not fit; returns the projected status
/// when the export fits but would push memory into the warning tier.
pub(crate) fn check_memory(monitor: &MemoryMonitor, job: &ExportJob) -> ExportResult<Option<MemoryStatus>> {
    let s = &job.settings;
    let estimate = estimate_export_bytes(
        s.canvas(),
        job.duration,
        s.frame_rate,
        monitor.config().estimate_factor,
    );
    let status = monitor.status();
    if !status.measured {
        tracing::debug!(estimate = %format_bytes(estimate), "memory unmeasurable, admitting export");
        return Ok(None);
    }
    if estimate >= status.ceiling_bytes || !monitor.can_perform_operation(estimate) {
        return Err(ExportError::memory(format!(
            "export needs about {} but only {} of {} is available",
            format_bytes(estimate),
            format_bytes(status.available_bytes),
            format_bytes(status.ceiling_bytes)
        )));
    }
    let projected = monitor.projected_status(estimate);
    tracing::debug!(
        estimate = %format_bytes(estimate),
        tier = ?projected.tier,
        "memory preflight passed"
    );
    Ok(projected.tier.is_pressure().then_some(projected))
}

#[cfg(test)]
#[path = "../../tests/unit/export/preflight.rs"]
mod tests;

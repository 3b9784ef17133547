use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::{ExportError, ExportResult};
use crate::memory::ledger::MemoryLedger;
use crate::memory::probe::{MemoryProbe, ProcessMemoryProbe};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Thresholds and knobs of the memory monitor.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Absolute ceiling all percentages are measured against.
    pub ceiling_bytes: u64,
    pub warning_percent: f64,
    pub critical_percent: f64,
    /// Headroom above which the tier is `High`.
    pub high_headroom_bytes: u64,
    /// Headroom above which the tier is `Medium`.
    pub medium_headroom_bytes: u64,
    /// An operation is admitted while its estimate stays within this share of headroom.
    pub admission_ratio: f64,
    /// Share of the raw `w*h*4*frames` size expected to be resident during export.
    pub estimate_factor: f64,
    /// Minimum spacing between warning-tier cleanup passes.
    pub cleanup_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: 8 * GIB,
            warning_percent: 85.0,
            critical_percent: 95.0,
            high_headroom_bytes: 4 * GIB,
            medium_headroom_bytes: 2 * GIB,
            admission_ratio: 0.8,
            estimate_factor: 0.5,
            cleanup_interval_ms: 5_000,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> ExportResult<()> {
        if self.ceiling_bytes == 0 {
            return Err(ExportError::validation("memory ceiling must be > 0"));
        }
        if !(0.0 < self.warning_percent && self.warning_percent < self.critical_percent)
            || self.critical_percent > 100.0
        {
            return Err(ExportError::validation(
                "memory thresholds must satisfy 0 < warning < critical <= 100",
            ));
        }
        if !(0.0..=1.0).contains(&self.admission_ratio) || self.admission_ratio == 0.0 {
            return Err(ExportError::validation("admission_ratio must be in (0, 1]"));
        }
        if !self.estimate_factor.is_finite() || self.estimate_factor < 0.0 {
            return Err(ExportError::validation("estimate_factor must be >= 0"));
        }
        Ok(())
    }
}

/// Pressure classification. `Low`/`Medium`/`High` describe headroom and are informational.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Low,
    Medium,
    High,
    Warning,
    Critical,
}

impl MemoryTier {
    pub fn is_pressure(self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }
}

/// One memory reading. Never cached across polls.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct MemoryStatus {
    pub used_bytes: u64,
    pub ceiling_bytes: u64,
    pub available_bytes: u64,
    pub percent_used: f64,
    pub tier: MemoryTier,
    pub admission_allowed: bool,
    /// `false` when the probe could not measure; figures then cover tracked caches only.
    pub measured: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Low,
    Medium,
    High,
}

/// Encoder settings sized to the current headroom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct OptimalSettings {
    pub preset: QualityPreset,
    pub bitrate: u64,
    pub keyframe_interval: u32,
    pub buffer_bytes: u64,
    pub max_concurrency: usize,
}

/// A cache the monitor may shrink under pressure.
pub trait Evictable: Send + Sync {
    /// Drop roughly the colder half of the cache; returns bytes released.
    fn trim(&self) -> u64;

    /// Drop everything; returns bytes released.
    fn evict_all(&self) -> u64;
}

/// Raw export working-set estimate: `w * h * 4 * duration * fps * factor`.
pub fn estimate_export_bytes(canvas: Canvas, duration: f64, fps: Fps, factor: f64) -> u64 {
    if !duration.is_finite() || duration <= 0.0 {
        return 0;
    }
    let bytes = canvas.frame_bytes() as f64 * duration * fps.as_f64() * factor;
    if bytes >= u64::MAX as f64 {
        u64::MAX
    } else {
        bytes.max(0.0) as u64
    }
}

/// Human-readable byte count (`1.50 GB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_owned();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Samples memory through a [`MemoryProbe`] and classifies it against the ceiling.
///
/// Shared by every orchestrator of a process (wrap it in an `Arc`). Caches register here so
/// that pressure can evict them; registration holds only weak references.
pub struct MemoryMonitor {
    config: MemoryConfig,
    probe: Box<dyn MemoryProbe>,
    ledger: Arc<MemoryLedger>,
    caches: Mutex<Vec<Weak<dyn Evictable>>>,
    last_cleanup: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("config", &self.config)
            .field("probe", &self.probe.name())
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, probe: impl MemoryProbe + 'static) -> Self {
        Self::with_ledger(config, probe, MemoryLedger::new())
    }

    /// Build a monitor that shares an existing ledger (e.g. with a [`LedgerMemoryProbe`]).
    ///
    /// [`LedgerMemoryProbe`]: crate::memory::probe::LedgerMemoryProbe
    pub fn with_ledger(
        config: MemoryConfig,
        probe: impl MemoryProbe + 'static,
        ledger: Arc<MemoryLedger>,
    ) -> Self {
        Self {
            config,
            probe: Box::new(probe),
            ledger,
            caches: Mutex::new(Vec::new()),
            last_cleanup: Mutex::new(None),
        }
    }

    /// Monitor backed by the process resident set size.
    pub fn for_process(config: MemoryConfig) -> Self {
        Self::new(config, ProcessMemoryProbe)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    pub fn probe_name(&self) -> &'static str {
        self.probe.name()
    }

    pub fn status(&self) -> MemoryStatus {
        let (used, measured) = match self.probe.used_bytes() {
            Some(used) => (used, true),
            None => (self.ledger.retained_bytes(), false),
        };
        self.classify(used, measured)
    }

    fn classify(&self, used: u64, measured: bool) -> MemoryStatus {
        let ceiling = self.config.ceiling_bytes.max(1);
        let available = ceiling.saturating_sub(used);
        let percent_used = used as f64 / ceiling as f64 * 100.0;
        let tier = if percent_used >= self.config.critical_percent {
            MemoryTier::Critical
        } else if percent_used >= self.config.warning_percent {
            MemoryTier::Warning
        } else if available > self.config.high_headroom_bytes {
            MemoryTier::High
        } else if available > self.config.medium_headroom_bytes {
            MemoryTier::Medium
        } else {
            MemoryTier::Low
        };
        MemoryStatus {
            used_bytes: used,
            ceiling_bytes: ceiling,
            available_bytes: available,
            percent_used,
            tier,
            admission_allowed: !measured || tier != MemoryTier::Critical,
            measured,
        }
    }

    /// Admission control: `false` when `estimated_bytes` exceeds the admitted share of
    /// headroom. Unmeasurable memory admits everything.
    pub fn can_perform_operation(&self, estimated_bytes: u64) -> bool {
        let status = self.status();
        if !status.measured {
            return true;
        }
        let allowed = status.available_bytes as f64 * self.config.admission_ratio;
        (estimated_bytes as f64) <= allowed
    }

    /// Status as it would look after `extra_bytes` more were in use.
    pub fn projected_status(&self, extra_bytes: u64) -> MemoryStatus {
        let now = self.status();
        self.classify(now.used_bytes.saturating_add(extra_bytes), now.measured)
    }

    /// Pick one of three presets from the headroom left once this export's estimate is
    /// accounted for. Less headroom never yields more concurrency or bitrate.
    pub fn optimal_settings(&self, canvas: Canvas, duration: f64, fps: Fps) -> OptimalSettings {
        let estimate = estimate_export_bytes(canvas, duration, fps, self.config.estimate_factor);
        let headroom = self.status().available_bytes.saturating_sub(estimate);
        let is_4k = u64::from(canvas.width) * u64::from(canvas.height) >= 3840 * 2160;
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);

        if headroom < self.config.medium_headroom_bytes {
            OptimalSettings {
                preset: QualityPreset::Low,
                bitrate: if is_4k { 15_000_000 } else { 8_000_000 },
                keyframe_interval: 60,
                buffer_bytes: 64 * MIB,
                max_concurrency: 1,
            }
        } else if headroom < self.config.high_headroom_bytes {
            OptimalSettings {
                preset: QualityPreset::Medium,
                bitrate: if is_4k { 25_000_000 } else { 12_000_000 },
                keyframe_interval: 30,
                buffer_bytes: 256 * MIB,
                max_concurrency: 2.min(cores.max(1)),
            }
        } else {
            OptimalSettings {
                preset: QualityPreset::High,
                bitrate: if is_4k { 40_000_000 } else { 20_000_000 },
                keyframe_interval: 30,
                buffer_bytes: 512 * MIB,
                max_concurrency: 4.min(cores.max(2)),
            }
        }
    }

    /// Make `cache` eligible for pressure-driven eviction while it is alive.
    pub fn register_cache(&self, cache: &Arc<dyn Evictable>) {
        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        caches.retain(|w| w.strong_count() > 0);
        caches.push(Arc::downgrade(cache));
    }

    fn live_caches(&self) -> Vec<Arc<dyn Evictable>> {
        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        caches.retain(|w| w.strong_count() > 0);
        caches.iter().filter_map(Weak::upgrade).collect()
    }

    /// Trim registered caches, at most once per `cleanup_interval_ms`.
    ///
    /// Returns `None` when skipped by the rate limit.
    pub fn cleanup_pass(&self) -> Option<u64> {
        {
            let mut last = self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
            let interval = Duration::from_millis(self.config.cleanup_interval_ms);
            if let Some(t) = *last
                && t.elapsed() < interval
            {
                return None;
            }
            *last = Some(Instant::now());
        }
        let freed: u64 = self.live_caches().iter().map(|c| c.trim()).sum();
        tracing::debug!(freed = %format_bytes(freed), "memory cleanup pass");
        Some(freed)
    }

    /// Evict every registered cache, then take a fresh reading.
    pub fn emergency_cleanup(&self) -> MemoryStatus {
        let freed: u64 = self.live_caches().iter().map(|c| c.evict_all()).sum();
        let status = self.status();
        tracing::warn!(
            freed = %format_bytes(freed),
            used = %format_bytes(status.used_bytes),
            tier = ?status.tier,
            "emergency memory cleanup"
        );
        status
    }

    /// Periodic check hook that only samples every `stride` frames.
    pub fn checkpoint(&self, stride: u64) -> MemoryCheckpoint<'_> {
        MemoryCheckpoint {
            monitor: self,
            stride: stride.max(1),
        }
    }
}

/// Frame-loop memory hook bound to a sampling stride.
#[derive(Debug)]
pub struct MemoryCheckpoint<'a> {
    monitor: &'a MemoryMonitor,
    stride: u64,
}

impl MemoryCheckpoint<'_> {
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// No-op (`Ok(None)`) off-stride. On stride: warning runs a cleanup pass; critical runs an
    /// emergency cleanup and fails with a memory error if a measured re-check is still critical.
    ///
    /// Ledger-only readings evict like measured ones but never abort the export.
    pub fn check_during(&self, frame: u64) -> ExportResult<Option<MemoryStatus>> {
        if !frame.is_multiple_of(self.stride) {
            return Ok(None);
        }
        let status = self.monitor.status();
        match status.tier {
            MemoryTier::Warning => {
                self.monitor.cleanup_pass();
                Ok(Some(status))
            }
            MemoryTier::Critical => {
                let after = self.monitor.emergency_cleanup();
                if after.tier == MemoryTier::Critical && after.measured {
                    return Err(ExportError::memory(format!(
                        "memory critical at frame {frame}: {} of {} in use",
                        format_bytes(after.used_bytes),
                        format_bytes(after.ceiling_bytes)
                    )));
                }
                Ok(Some(after))
            }
            _ => Ok(Some(status)),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/memory/monitor.rs"]
mod tests;

use crate::memory::ledger::MemoryLedger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Source of "bytes in use" readings.
///
/// `None` means memory cannot be measured in this environment.
pub trait MemoryProbe: Send + Sync {
    fn used_bytes(&self) -> Option<u64>;

    fn name(&self) -> &'static str;
}

/// Resident set size of the current process (Linux `/proc/self/status`).
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss_bytes(&status)
    }

    fn name(&self) -> &'static str {
        "process-rss"
    }
}

/// Extract `VmRSS` (reported in kB) from a `/proc/<pid>/status` dump.
pub(crate) fn parse_vm_rss_bytes(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb.saturating_mul(1024))
}

/// Probe driven by the host (or a test) through [`ManualMemoryProbe::set_used`].
#[derive(Debug)]
pub struct ManualMemoryProbe {
    used: AtomicU64,
    measurable: AtomicBool,
}

impl ManualMemoryProbe {
    pub fn new(used: u64) -> Arc<Self> {
        Arc::new(Self {
            used: AtomicU64::new(used),
            measurable: AtomicBool::new(true),
        })
    }

    pub fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::Release);
        self.measurable.store(true, Ordering::Release);
    }

    pub fn set_unmeasurable(&self) {
        self.measurable.store(false, Ordering::Release);
    }
}

impl MemoryProbe for ManualMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        self.measurable
            .load(Ordering::Acquire)
            .then(|| self.used.load(Ordering::Acquire))
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

impl<P: MemoryProbe + ?Sized> MemoryProbe for Arc<P> {
    fn used_bytes(&self) -> Option<u64> {
        (**self).used_bytes()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// A fixed baseline plus whatever export caches currently retain.
#[derive(Debug)]
pub struct LedgerMemoryProbe {
    baseline: u64,
    ledger: Arc<MemoryLedger>,
}

impl LedgerMemoryProbe {
    pub fn new(baseline: u64, ledger: Arc<MemoryLedger>) -> Self {
        Self { baseline, ledger }
    }
}

impl MemoryProbe for LedgerMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        Some(self.baseline.saturating_add(self.ledger.retained_bytes()))
    }

    fn name(&self) -> &'static str {
        "ledger"
    }
}

/// Live heap bytes reported by the instrumented global allocator.
#[cfg(feature = "alloc-track")]
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocTrackProbe;

#[cfg(feature = "alloc-track")]
impl MemoryProbe for AllocTrackProbe {
    fn used_bytes(&self) -> Option<u64> {
        Some(crate::foundation::alloc_track::live_heap_bytes())
    }

    fn name(&self) -> &'static str {
        "alloc-track"
    }
}

#[cfg(test)]
#[path = "../../tests/unit/memory/probe.rs"]
mod tests;

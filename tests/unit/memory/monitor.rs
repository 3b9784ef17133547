use super::*;
use crate::memory::probe::ManualMemoryProbe;
use std::sync::atomic::{AtomicU64, Ordering};

fn monitor_with(used: u64) -> (MemoryMonitor, Arc<ManualMemoryProbe>) {
    let probe = ManualMemoryProbe::new(used);
    let monitor = MemoryMonitor::new(MemoryConfig::default(), Arc::clone(&probe));
    (monitor, probe)
}

fn canvas(width: u32, height: u32) -> Canvas {
    Canvas { width, height }
}

#[test]
fn tiers_follow_percent_then_headroom() {
    let (m, probe) = monitor_with(GIB);
    assert_eq!(m.status().tier, MemoryTier::High);
    probe.set_used(5 * GIB);
    assert_eq!(m.status().tier, MemoryTier::Medium);
    probe.set_used(6 * GIB + GIB / 2);
    assert_eq!(m.status().tier, MemoryTier::Low);
    probe.set_used(7 * GIB);
    assert_eq!(m.status().tier, MemoryTier::Warning);
    probe.set_used(8 * GIB - GIB / 50);
    let s = m.status();
    assert_eq!(s.tier, MemoryTier::Critical);
    assert!(!s.admission_allowed);
    assert!(s.percent_used >= 95.0);
}

#[test]
fn status_is_recomputed_on_every_poll() {
    let (m, probe) = monitor_with(GIB);
    let a = m.status();
    probe.set_used(2 * GIB);
    let b = m.status();
    assert_eq!(a.used_bytes, GIB);
    assert_eq!(b.used_bytes, 2 * GIB);
    assert_eq!(b.available_bytes, 6 * GIB);
}

#[test]
fn admission_rejects_estimates_above_eighty_percent_of_headroom() {
    let (m, _probe) = monitor_with(6 * GIB);
    let available = 2 * GIB;
    let limit = (available as f64 * 0.8) as u64;
    assert!(m.can_perform_operation(limit));
    assert!(!m.can_perform_operation(limit + 1));
    assert!(!m.can_perform_operation(3 * GIB));
}

#[test]
fn admission_allows_when_unmeasurable() {
    let (m, probe) = monitor_with(0);
    probe.set_unmeasurable();
    assert!(m.can_perform_operation(u64::MAX));
    assert!(!m.status().measured);
}

#[test]
fn estimate_matches_frame_size_times_frames_times_factor() {
    let fps = Fps::integer(30).unwrap();
    let est = estimate_export_bytes(canvas(100, 100), 2.0, fps, 0.5);
    assert_eq!(est, 100 * 100 * 4 * 60 / 2);
    assert_eq!(estimate_export_bytes(canvas(100, 100), 0.0, fps, 0.5), 0);
}

#[test]
fn optimal_settings_shrink_with_headroom() {
    let fps = Fps::integer(30).unwrap();
    let hd = canvas(1920, 1080);

    let (m, probe) = monitor_with(GIB);
    let high = m.optimal_settings(hd, 0.0, fps);
    assert_eq!(high.preset, QualityPreset::High);
    assert_eq!(high.bitrate, 20_000_000);
    assert_eq!(high.buffer_bytes, 512 * MIB);

    probe.set_used(5 * GIB);
    let medium = m.optimal_settings(hd, 0.0, fps);
    assert_eq!(medium.preset, QualityPreset::Medium);
    assert_eq!(medium.keyframe_interval, 30);

    probe.set_used(7 * GIB);
    let low = m.optimal_settings(hd, 0.0, fps);
    assert_eq!(low.preset, QualityPreset::Low);
    assert_eq!(low.keyframe_interval, 60);
    assert_eq!(low.max_concurrency, 1);

    assert!(high.bitrate >= medium.bitrate && medium.bitrate >= low.bitrate);
    assert!(high.max_concurrency >= medium.max_concurrency);
    assert!(medium.max_concurrency >= low.max_concurrency);

    probe.set_used(GIB);
    let uhd = m.optimal_settings(canvas(3840, 2160), 0.0, fps);
    assert_eq!(uhd.bitrate, 40_000_000);
}

#[test]
fn longer_exports_leave_less_headroom() {
    let fps = Fps::integer(30).unwrap();
    let (m, _probe) = monitor_with(GIB);
    let short = m.optimal_settings(canvas(1920, 1080), 1.0, fps);
    let long = m.optimal_settings(canvas(1920, 1080), 60.0, fps);
    assert_eq!(short.preset, QualityPreset::High);
    assert_eq!(long.preset, QualityPreset::Low);
}

struct CountingCache {
    trims: AtomicU64,
    evictions: AtomicU64,
}

impl Evictable for CountingCache {
    fn trim(&self) -> u64 {
        self.trims.fetch_add(1, Ordering::SeqCst);
        10
    }

    fn evict_all(&self) -> u64 {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        100
    }
}

fn counting_cache() -> Arc<CountingCache> {
    Arc::new(CountingCache {
        trims: AtomicU64::new(0),
        evictions: AtomicU64::new(0),
    })
}

#[test]
fn checkpoint_is_noop_off_stride() {
    let (m, probe) = monitor_with(8 * GIB);
    let cp = m.checkpoint(30);
    assert!(cp.check_during(31).unwrap().is_none());
    assert!(cp.check_during(59).unwrap().is_none());
    probe.set_used(GIB);
    assert!(cp.check_during(60).unwrap().is_some());
}

#[test]
fn warning_tier_triggers_rate_limited_trim() {
    let (m, _probe) = monitor_with(7 * GIB);
    let cache = counting_cache();
    let dyn_cache: Arc<dyn Evictable> = cache.clone();
    m.register_cache(&dyn_cache);

    let cp = m.checkpoint(10);
    let status = cp.check_during(0).unwrap().unwrap();
    assert_eq!(status.tier, MemoryTier::Warning);
    cp.check_during(10).unwrap();
    assert_eq!(cache.trims.load(Ordering::SeqCst), 1);
}

#[test]
fn critical_tier_evicts_then_fails_if_still_critical() {
    let (m, _probe) = monitor_with(8 * GIB);
    let cache = counting_cache();
    let dyn_cache: Arc<dyn Evictable> = cache.clone();
    m.register_cache(&dyn_cache);

    let err = m.checkpoint(1).check_during(3).unwrap_err();
    assert!(matches!(err, ExportError::Memory(_)));
    assert_eq!(cache.evictions.load(Ordering::SeqCst), 1);
}

struct LedgerCache(std::sync::Mutex<Vec<crate::memory::ledger::LedgerEntry>>);

impl Evictable for LedgerCache {
    fn trim(&self) -> u64 {
        0
    }

    fn evict_all(&self) -> u64 {
        let mut v = self.0.lock().unwrap();
        let freed = v.iter().map(|e| e.bytes()).sum();
        v.clear();
        freed
    }
}

#[test]
fn critical_tier_recovers_when_eviction_frees_enough() {
    let ledger = MemoryLedger::new();
    let probe = crate::memory::probe::LedgerMemoryProbe::new(GIB, Arc::clone(&ledger));
    let m = MemoryMonitor::with_ledger(MemoryConfig::default(), probe, Arc::clone(&ledger));

    let cache = Arc::new(LedgerCache(std::sync::Mutex::new(vec![ledger.retain(7 * GIB)])));
    let dyn_cache: Arc<dyn Evictable> = cache.clone();
    m.register_cache(&dyn_cache);
    assert_eq!(m.status().tier, MemoryTier::Critical);

    let after = m.checkpoint(1).check_during(0).unwrap().unwrap();
    assert_eq!(after.tier, MemoryTier::High);
    assert_eq!(ledger.retained_bytes(), 0);
}

fn unmeasured_monitor(ceiling: u64) -> (MemoryMonitor, Arc<MemoryLedger>) {
    let ledger = MemoryLedger::new();
    let probe = ManualMemoryProbe::new(0);
    probe.set_unmeasurable();
    let config = MemoryConfig {
        ceiling_bytes: ceiling,
        ..MemoryConfig::default()
    };
    (
        MemoryMonitor::with_ledger(config, probe, Arc::clone(&ledger)),
        ledger,
    )
}

#[test]
fn ledger_only_critical_reading_still_evicts() {
    let (m, ledger) = unmeasured_monitor(100 * MIB);
    let cache = Arc::new(LedgerCache(std::sync::Mutex::new(vec![ledger.retain(99 * MIB)])));
    let dyn_cache: Arc<dyn Evictable> = cache.clone();
    m.register_cache(&dyn_cache);
    let before = m.status();
    assert!(!before.measured);
    assert_eq!(before.tier, MemoryTier::Critical);

    let after = m.checkpoint(1).check_during(0).unwrap().unwrap();
    assert_eq!(ledger.retained_bytes(), 0);
    assert_ne!(after.tier, MemoryTier::Critical);
}

#[test]
fn ledger_only_critical_reading_never_aborts() {
    let (m, ledger) = unmeasured_monitor(100 * MIB);
    let _pinned = ledger.retain(99 * MIB);
    let cache = counting_cache();
    let dyn_cache: Arc<dyn Evictable> = cache.clone();
    m.register_cache(&dyn_cache);

    let after = m.checkpoint(1).check_during(0).unwrap().unwrap();
    assert_eq!(after.tier, MemoryTier::Critical);
    assert_eq!(cache.evictions.load(Ordering::SeqCst), 1);
}

#[test]
fn dropped_caches_are_not_evicted() {
    let (m, _probe) = monitor_with(8 * GIB);
    {
        let cache = counting_cache();
        let dyn_cache: Arc<dyn Evictable> = cache.clone();
        m.register_cache(&dyn_cache);
    }
    let status = m.emergency_cleanup();
    assert_eq!(status.tier, MemoryTier::Critical);
}

#[test]
fn format_bytes_units() {
    assert_eq!(format_bytes(0), "0 B");
    assert_eq!(format_bytes(512), "512.00 B");
    assert_eq!(format_bytes(3 * GIB / 2), "1.50 GB");
}

#[test]
fn config_validation() {
    assert!(MemoryConfig::default().validate().is_ok());
    let bad = MemoryConfig {
        warning_percent: 96.0,
        ..MemoryConfig::default()
    };
    assert!(bad.validate().is_err());
}

use super::*;

#[test]
fn parses_vm_rss_in_kib() {
    let status = "Name:\tvexport\nVmPeak:\t  900 kB\nVmRSS:\t  2048 kB\nThreads:\t4\n";
    assert_eq!(parse_vm_rss_bytes(status), Some(2048 * 1024));
    assert_eq!(parse_vm_rss_bytes("Name:\tx\n"), None);
    assert_eq!(parse_vm_rss_bytes("VmRSS:\tlots kB\n"), None);
}

#[test]
fn manual_probe_switches_between_measured_and_unmeasured() {
    let p = ManualMemoryProbe::new(10);
    assert_eq!(p.used_bytes(), Some(10));
    p.set_unmeasurable();
    assert_eq!(p.used_bytes(), None);
    p.set_used(42);
    assert_eq!(p.used_bytes(), Some(42));
}

#[test]
fn ledger_probe_adds_retained_bytes_to_baseline() {
    let ledger = MemoryLedger::new();
    let probe = LedgerMemoryProbe::new(1_000, Arc::clone(&ledger));
    assert_eq!(probe.used_bytes(), Some(1_000));
    let entry = ledger.retain(500);
    assert_eq!(probe.used_bytes(), Some(1_500));
    assert_eq!(ledger.retained_handles(), 1);
    drop(entry);
    assert_eq!(probe.used_bytes(), Some(1_000));
    assert_eq!(ledger.retained_handles(), 0);
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes and handles currently retained by export-scoped caches.
///
/// Every retained allocation is represented by a [`LedgerEntry`]; dropping the entry releases
/// it, so a cache that drops its contents always brings the ledger back to where it started.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    bytes: AtomicU64,
    handles: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `bytes` as retained until the returned entry is dropped.
    pub fn retain(self: &Arc<Self>, bytes: u64) -> LedgerEntry {
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
        self.handles.fetch_add(1, Ordering::AcqRel);
        LedgerEntry {
            ledger: Arc::clone(self),
            bytes,
        }
    }

    pub fn retained_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn retained_handles(&self) -> u64 {
        self.handles.load(Ordering::Acquire)
    }
}

/// RAII token for one retained allocation.
#[derive(Debug)]
pub struct LedgerEntry {
    ledger: Arc<MemoryLedger>,
    bytes: u64,
}

impl LedgerEntry {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        self.ledger.bytes.fetch_sub(self.bytes, Ordering::AcqRel);
        self.ledger.handles.fetch_sub(1, Ordering::AcqRel);
    }
}

use stats_alloc::{INSTRUMENTED_SYSTEM, StatsAlloc};
use std::alloc::System;

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

/// Heap bytes currently live according to the instrumented global allocator.
pub(crate) fn live_heap_bytes() -> u64 {
    let s = GLOBAL.stats();
    let grown = s.bytes_allocated as i128 + s.bytes_reallocated as i128;
    (grown - s.bytes_deallocated as i128).max(0) as u64
}

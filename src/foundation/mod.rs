pub(crate) mod core;
pub(crate) mod error;
pub(crate) mod math;

#[cfg(feature = "alloc-track")]
pub(crate) mod alloc_track;

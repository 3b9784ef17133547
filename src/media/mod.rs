//! Media decoding and the export-scoped decoded media cache.

pub(crate) mod cache;
pub(crate) mod decode;

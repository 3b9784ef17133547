//! Read-only timeline snapshot handed to the export pipeline.

pub(crate) mod job;
pub(crate) mod model;
pub(crate) mod settings;

//! Export orchestration: preflight, engines, engine selection and fallback.

pub(crate) mod context;
pub(crate) mod control;
pub(crate) mod orchestrator;
pub(crate) mod outcome;
pub(crate) mod parallel;
pub(crate) mod preflight;
pub(crate) mod progress;
pub(crate) mod reorder;
pub(crate) mod scope;
pub(crate) mod selector;
pub(crate) mod stages;

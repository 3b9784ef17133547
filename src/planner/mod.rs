//! Per-frame visibility and draw order.

pub(crate) mod frame_planner;

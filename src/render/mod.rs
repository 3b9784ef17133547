//! CPU rendering: per-worker drawing surfaces, the frame compositor and the renderer pool.

pub(crate) mod blur;
pub(crate) mod compositor;
pub(crate) mod frame;
pub(crate) mod pool;
pub(crate) mod surface;
pub(crate) mod text;

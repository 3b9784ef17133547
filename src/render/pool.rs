use crate::foundation::core::Canvas;
use crate::render::surface::{SurfaceError, SurfaceRenderer};
use crate::render::text::FontBook;

/// Fixed set of renderers allocated once per export.
///
/// The pool never grows or shrinks; each slot is handed to at most one worker at a time.
#[derive(Debug)]
pub struct RendererPool {
    renderers: Vec<SurfaceRenderer>,
}

impl RendererPool {
    /// Allocate `size` renderers (at least one), each with every face of `fonts` registered.
    pub fn new(size: usize, canvas: Canvas, fonts: &FontBook) -> Result<Self, SurfaceError> {
        let renderers = (0..size.max(1))
            .map(|_| SurfaceRenderer::with_fonts(canvas.width, canvas.height, fonts))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            renderers = renderers.len(),
            width = canvas.width,
            height = canvas.height,
            "renderer pool allocated"
        );
        Ok(Self { renderers })
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    /// The first renderer, used by the sequential engine.
    pub fn primary(&mut self) -> &mut SurfaceRenderer {
        &mut self.renderers[0]
    }

    pub fn slots_mut(&mut self) -> &mut [SurfaceRenderer] {
        &mut self.renderers
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/pool.rs"]
mod tests;

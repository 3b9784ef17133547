use crate::foundation::core::{Canvas, Rgba8};
use crate::foundation::error::{ExportError, ExportResult};
use crate::media::cache::MediaCache;
use crate::media::decode::DecodeError;
use crate::planner::frame_planner::{FrameDescriptor, element_bounds};
use crate::render::frame::FrameRGBA;
use crate::render::surface::{SurfaceError, SurfaceRenderer};
use crate::timeline::model::{ElementPayload, MediaKind, MediaLibrary, TimelineElement};

#[derive(thiserror::Error, Debug)]
enum ElementError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("media '{0}' is not in the library")]
    MissingMedia(String),
}

/// Draws planned frames. Shared by both orchestrators; holds no per-frame state.
#[derive(Clone, Copy, Debug)]
pub struct FrameCompositor<'a> {
    media: &'a MediaLibrary,
    cache: &'a MediaCache,
    background: Rgba8,
    canvas: Canvas,
}

impl<'a> FrameCompositor<'a> {
    pub fn new(
        media: &'a MediaLibrary,
        cache: &'a MediaCache,
        background: Rgba8,
        canvas: Canvas,
    ) -> Self {
        Self {
            media,
            cache,
            background,
            canvas,
        }
    }

    /// Render `frame` through `renderer`, bottom element first.
    pub fn compose(
        &self,
        renderer: &mut SurfaceRenderer,
        frame: &FrameDescriptor<'_>,
    ) -> ExportResult<FrameRGBA> {
        renderer.clear(Some(self.background));
        for el in &frame.visible_elements {
            renderer.save();
            let drawn = self.draw_element(renderer, el, frame.timestamp);
            renderer.restore();
            drawn.map_err(|e| {
                ExportError::render(
                    frame.frame_number,
                    frame.timestamp,
                    format!("element '{}': {e}", el.id),
                )
            })?;
        }
        Ok(renderer.snapshot())
    }

    fn draw_element(
        &self,
        renderer: &mut SurfaceRenderer,
        el: &TimelineElement,
        t: f64,
    ) -> Result<(), ElementError> {
        let bounds = element_bounds(el, self.canvas.width, self.canvas.height);
        match &el.payload {
            ElementPayload::Media(m) => {
                let item = self
                    .media
                    .get(&m.media_id)
                    .ok_or_else(|| ElementError::MissingMedia(m.media_id.clone()))?;
                let image = match m.kind {
                    MediaKind::Audio => return Ok(()),
                    MediaKind::Image => self.cache.image(item)?,
                    MediaKind::Video => self.cache.video_frame(item, el.source_time_at(t))?,
                };
                renderer.draw_image(
                    &image,
                    bounds.x0,
                    bounds.y0,
                    bounds.width(),
                    bounds.height(),
                )?;
            }
            ElementPayload::Text(text) => {
                renderer.draw_text(
                    &text.content,
                    text.x.unwrap_or(bounds.x0),
                    text.y.unwrap_or(bounds.y0),
                    &text.style,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;

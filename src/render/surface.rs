use crate::foundation::core::{Affine, Rect, Rgba8};
use crate::foundation::error::ExportError;
use crate::media::decode::DecodedImage;
use crate::render::blur::{BlurError, blur_rgba8_premul};
use crate::render::frame::FrameRGBA;
use crate::render::text::{
    FontBook, TextBrushRgba8, TextError, TextExtent, TextLayoutEngine, text_origin,
};
use crate::timeline::model::TextStyle;

/// Failure of a single surface operation. Callers attach the frame it happened on.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("surface size {width}x{height} must be within 1..=65535")]
    Size { width: u32, height: u32 },
    #[error("text: {0}")]
    Text(#[from] TextError),
    #[error("blur: {0}")]
    Blur(#[from] BlurError),
    #[error("invalid color '{0}'")]
    Color(String),
    #[error("image: {0}")]
    Image(String),
}

impl SurfaceError {
    pub fn into_render(self, frame: u64, timestamp: f64) -> ExportError {
        ExportError::render(frame, timestamp, self.to_string())
    }
}

/// Drawing state captured by `save()` and reinstated by `restore()`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct DrawState {
    transform: Affine,
    opacity: f32,
    blur_sigma: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Affine::IDENTITY,
            opacity: 1.0,
            blur_sigma: 0.0,
        }
    }
}

/// One owned `vello_cpu` drawing surface with canvas-like state.
///
/// Each parallel worker owns its own instance; nothing is shared between renderers.
pub struct SurfaceRenderer {
    width: u16,
    height: u16,
    ctx: vello_cpu::RenderContext,
    /// Offscreen context for filtered draws, created on first use.
    filter_ctx: Option<vello_cpu::RenderContext>,
    state: DrawState,
    stack: Vec<DrawState>,
    text: TextLayoutEngine,
}

impl SurfaceRenderer {
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        let size_err = || SurfaceError::Size { width, height };
        let w: u16 = width.try_into().map_err(|_| size_err())?;
        let h: u16 = height.try_into().map_err(|_| size_err())?;
        if w == 0 || h == 0 {
            return Err(size_err());
        }
        Ok(Self {
            width: w,
            height: h,
            ctx: vello_cpu::RenderContext::new(w, h),
            filter_ctx: None,
            state: DrawState::default(),
            stack: Vec::new(),
            text: TextLayoutEngine::new(),
        })
    }

    /// New surface with every face of `fonts` registered.
    pub fn with_fonts(width: u32, height: u32, fonts: &FontBook) -> Result<Self, SurfaceError> {
        let mut r = Self::new(width, height)?;
        for face in fonts.faces() {
            r.register_font(face)?;
        }
        Ok(r)
    }

    /// Add a font face to this renderer's font book; returns its family name.
    pub fn register_font(&mut self, bytes: &[u8]) -> Result<String, SurfaceError> {
        Ok(self.text.register(bytes)?)
    }

    pub fn font_count(&self) -> usize {
        self.text.face_count()
    }

    pub fn width(&self) -> u32 {
        u32::from(self.width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.height)
    }

    /// Drop all drawn content and fill with `bg`, or leave transparent.
    ///
    /// The drawing state stack is kept.
    pub fn clear(&mut self, bg: Option<Rgba8>) {
        self.ctx.reset();
        if let Some(c) = bg {
            self.ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
            self.ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
            self.ctx
                .set_paint(vello_cpu::peniko::Color::from_rgba8(c.r, c.g, c.b, c.a));
            self.ctx.fill_rect(&self.full_rect());
        }
    }

    pub fn save(&mut self) {
        self.stack.push(self.state);
    }

    /// Pop the last saved state. No-op on an empty stack.
    pub fn restore(&mut self) {
        if let Some(s) = self.stack.pop() {
            self.state = s;
        }
    }

    pub fn saved_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn set_transform(&mut self, transform: Affine) {
        self.state.transform = transform;
    }

    pub fn transform(&self) -> Affine {
        self.state.transform
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.state.transform *= Affine::translate((dx, dy));
    }

    /// Global alpha for subsequent draws, clamped to `[0, 1]`.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.state.opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    pub fn opacity(&self) -> f32 {
        self.state.opacity
    }

    /// Blur subsequent draws with a gaussian of standard deviation `radius` pixels.
    pub fn apply_blur(&mut self, radius: f32) {
        self.state.blur_sigma = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
    }

    pub fn reset_filters(&mut self) {
        self.state.blur_sigma = 0.0;
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Rgba8) -> Result<(), SurfaceError> {
        let r = rect_to_cpu(rect);
        self.paint(|ctx, base| {
            ctx.set_transform(base);
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                color.r, color.g, color.b, color.a,
            ));
            ctx.fill_rect(&r);
        })
    }

    /// Draw `image` scaled into the `w x h` box at `(x, y)`.
    pub fn draw_image(
        &mut self,
        image: &DecodedImage,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> Result<(), SurfaceError> {
        if !(w > 0.0 && h > 0.0) {
            return Ok(());
        }
        let sx = w / f64::from(image.width);
        let sy = h / f64::from(image.height);
        let local = Affine::translate((x, y)) * Affine::scale_non_uniform(sx, sy);
        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(std::sync::Arc::clone(&image.pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };
        let src = vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(image.width),
            f64::from(image.height),
        );
        self.paint(move |ctx, base| {
            ctx.set_transform(base * affine_to_cpu(local));
            ctx.set_paint(paint);
            ctx.fill_rect(&src);
        })
    }

    /// Lay out and draw `text` anchored at `(x, y)` per the style's align and baseline.
    pub fn draw_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        style: &TextStyle,
    ) -> Result<(), SurfaceError> {
        let face = self.text.resolve(&style.font_family)?;
        let color = Rgba8::parse_hex(&style.color)
            .map_err(|_| SurfaceError::Color(style.color.clone()))?;
        let brush = TextBrushRgba8 {
            r: color.r,
            g: color.g,
            b: color.b,
            a: color.a,
        };
        let layout = self
            .text
            .layout(text, face, style.font_size, brush, style.max_width)?;
        let (ox, oy) = text_origin(x, y, TextExtent::of(&layout), style.align, style.baseline);
        let font = self.text.font(face).cloned().ok_or(TextError::NoFonts)?;

        self.paint(|ctx, base| {
            ctx.set_transform(base * vello_cpu::kurbo::Affine::translate((ox, oy)));
            for line in layout.lines() {
                for item in line.items() {
                    let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                        continue;
                    };
                    let b = run.style().brush;
                    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(b.r, b.g, b.b, b.a));
                    let glyphs = run.positioned_glyphs().map(|g| vello_cpu::Glyph {
                        id: g.id,
                        x: g.x,
                        y: g.y,
                    });
                    ctx.glyph_run(&font)
                        .font_size(run.run().font_size())
                        .fill_glyphs(glyphs);
                }
            }
        })
    }

    /// Rasterize everything drawn since the last `clear` into a premultiplied frame.
    pub fn snapshot(&mut self) -> FrameRGBA {
        let mut pixmap = vello_cpu::Pixmap::new(self.width, self.height);
        self.ctx.flush();
        self.ctx.render_to_pixmap(&mut pixmap);
        FrameRGBA {
            width: u32::from(self.width),
            height: u32::from(self.height),
            data: pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        }
    }

    fn full_rect(&self) -> vello_cpu::kurbo::Rect {
        vello_cpu::kurbo::Rect::new(0.0, 0.0, f64::from(self.width), f64::from(self.height))
    }

    /// Run `draw` with the current opacity and filter applied.
    ///
    /// `draw` receives the context to issue commands on and the base transform.
    fn paint<F>(&mut self, draw: F) -> Result<(), SurfaceError>
    where
        F: FnOnce(&mut vello_cpu::RenderContext, vello_cpu::kurbo::Affine),
    {
        let state = self.state;
        let base = affine_to_cpu(state.transform);
        if state.opacity <= 0.0 {
            return Ok(());
        }

        if state.blur_sigma <= 0.0 {
            self.ctx
                .set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
            if state.opacity < 1.0 {
                self.ctx.push_opacity_layer(state.opacity);
            }
            draw(&mut self.ctx, base);
            if state.opacity < 1.0 {
                self.ctx.pop_layer();
            }
            return Ok(());
        }

        // Filtered draw: render the element alone, blur it, then composite the result.
        let (w, h) = (self.width, self.height);
        let layer = self
            .filter_ctx
            .get_or_insert_with(|| vello_cpu::RenderContext::new(w, h));
        layer.reset();
        layer.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        draw(layer, base);
        layer.flush();
        let mut pixmap = vello_cpu::Pixmap::new(w, h);
        layer.render_to_pixmap(&mut pixmap);

        let blurred = blur_rgba8_premul(
            pixmap.data_as_u8_slice(),
            u32::from(w),
            u32::from(h),
            state.blur_sigma,
        )?;
        let image = DecodedImage::from_premul_bytes(u32::from(w), u32::from(h), &blurred)
            .map_err(|e| SurfaceError::Image(e.to_string()))?;

        let full = self.full_rect();
        self.ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        self.ctx
            .set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        self.ctx.set_paint(vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(image.pixmap),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        });
        if state.opacity < 1.0 {
            self.ctx.push_opacity_layer(state.opacity);
        }
        self.ctx.fill_rect(&full);
        if state.opacity < 1.0 {
            self.ctx.pop_layer();
        }
        Ok(())
    }
}

impl std::fmt::Debug for SurfaceRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceRenderer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("state", &self.state)
            .field("saved", &self.stack.len())
            .field("fonts", &self.text.face_count())
            .finish()
    }
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn rect_to_cpu(r: Rect) -> vello_cpu::kurbo::Rect {
    vello_cpu::kurbo::Rect::new(r.x0, r.y0, r.x1, r.y1)
}

#[cfg(test)]
#[path = "../../tests/unit/render/surface.rs"]
mod tests;

use crate::foundation::error::ExportResult;
use crate::timeline::job::FontSource;
use crate::timeline::model::{TextAlign, TextBaseline};
use anyhow::Context as _;
use std::sync::Arc;

/// Font files for one export, shared read-only by every renderer.
#[derive(Clone, Debug, Default)]
pub struct FontBook {
    faces: Vec<Arc<Vec<u8>>>,
}

impl FontBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every font file of a job.
    pub fn from_sources(sources: &[FontSource]) -> ExportResult<Self> {
        let mut book = Self::new();
        for src in sources {
            let bytes = std::fs::read(&src.path)
                .with_context(|| format!("read font file '{}'", src.path.display()))?;
            book.push(bytes);
        }
        Ok(book)
    }

    pub fn push(&mut self, bytes: Vec<u8>) {
        self.faces.push(Arc::new(bytes));
    }

    pub fn faces(&self) -> &[Arc<Vec<u8>>] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TextError {
    #[error("no fonts registered")]
    NoFonts,
    #[error("font data holds no usable family")]
    NoFamily,
    #[error("font size must be finite and > 0, got {0}")]
    Size(f32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// RGBA8 brush color used by Parley text layout.
pub(crate) struct TextBrushRgba8 {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

struct RegisteredFace {
    family: String,
    font: vello_cpu::peniko::FontData,
}

/// Parley contexts plus the faces registered into them. One per renderer.
pub(crate) struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    faces: Vec<RegisteredFace>,
}

impl Default for TextLayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLayoutEngine {
    pub(crate) fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
            faces: Vec::new(),
        }
    }

    /// Register font bytes and return the family name they were registered under.
    pub(crate) fn register(&mut self, bytes: &[u8]) -> Result<String, TextError> {
        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(bytes.to_vec()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or(TextError::NoFamily)?;
        let family = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or(TextError::NoFamily)?
            .to_string();
        self.faces.push(RegisteredFace {
            family: family.clone(),
            font: vello_cpu::peniko::FontData::new(
                vello_cpu::peniko::Blob::from(bytes.to_vec()),
                0,
            ),
        });
        Ok(family)
    }

    pub(crate) fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Index of the face matching a CSS-style family list, else the first face.
    pub(crate) fn resolve(&self, font_family: &str) -> Result<usize, TextError> {
        if self.faces.is_empty() {
            return Err(TextError::NoFonts);
        }
        let wanted = font_family
            .split(',')
            .map(|f| f.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|f| !f.is_empty());
        for name in wanted {
            if let Some(i) = self
                .faces
                .iter()
                .position(|f| f.family.eq_ignore_ascii_case(name))
            {
                return Ok(i);
            }
        }
        Ok(0)
    }

    pub(crate) fn font(&self, face: usize) -> Option<&vello_cpu::peniko::FontData> {
        self.faces.get(face).map(|f| &f.font)
    }

    /// Shape and lay out plain text in `face`.
    pub(crate) fn layout(
        &mut self,
        text: &str,
        face: usize,
        size_px: f32,
        brush: TextBrushRgba8,
        max_width_px: Option<f32>,
    ) -> Result<parley::Layout<TextBrushRgba8>, TextError> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(TextError::Size(size_px));
        }
        let family = self
            .faces
            .get(face)
            .map(|f| f.family.clone())
            .ok_or(TextError::NoFonts)?;

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(max_width_px);
        if let Some(w) = max_width_px {
            layout.align(
                Some(w),
                parley::Alignment::Start,
                parley::AlignmentOptions::default(),
            );
        }
        Ok(layout)
    }
}

/// Measured extent of a laid-out block of text.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TextExtent {
    pub(crate) width: f64,
    pub(crate) height: f64,
    /// Distance from the top of the block to the first line's baseline.
    pub(crate) first_baseline: f64,
}

impl TextExtent {
    pub(crate) fn of(layout: &parley::Layout<TextBrushRgba8>) -> Self {
        let first_baseline = layout
            .lines()
            .next()
            .map(|l| f64::from(l.metrics().baseline))
            .unwrap_or(0.0);
        Self {
            width: f64::from(layout.width()),
            height: f64::from(layout.height()),
            first_baseline,
        }
    }
}

/// Top-left corner of a text block anchored at `(x, y)`.
pub(crate) fn text_origin(
    x: f64,
    y: f64,
    extent: TextExtent,
    align: TextAlign,
    baseline: TextBaseline,
) -> (f64, f64) {
    let ox = match align {
        TextAlign::Left => x,
        TextAlign::Center => x - extent.width / 2.0,
        TextAlign::Right => x - extent.width,
    };
    let oy = match baseline {
        TextBaseline::Top => y,
        TextBaseline::Middle => y - extent.height / 2.0,
        TextBaseline::Alphabetic => y - extent.first_baseline,
        TextBaseline::Bottom => y - extent.height,
    };
    (ox, oy)
}

#[cfg(test)]
#[path = "../../tests/unit/render/text.rs"]
mod tests;

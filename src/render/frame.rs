use crate::foundation::core::{FrameIndex, Rgba8};
use crate::foundation::math::flatten_premul_over_bg;
use std::sync::Arc;

/// A rendered frame in RGBA8 format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether the `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn byte_len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Opaque RGBA8 bytes composited over `bg`, the layout encoders consume.
    pub fn flatten_over(&self, bg: Rgba8) -> Vec<u8> {
        let mut out = vec![0u8; self.data.len()];
        if self.premultiplied {
            flatten_premul_over_bg(&mut out, &self.data, [bg.r, bg.g, bg.b]);
        } else {
            let mut premul = self.data.clone();
            crate::foundation::math::premultiply_rgba8_in_place(&mut premul);
            flatten_premul_over_bg(&mut out, &premul, [bg.r, bg.g, bg.b]);
        }
        out
    }
}

/// One rendered frame on its way to the encoder.
///
/// Ownership moves from the rendering worker to the reorder buffer to the encoder backend.
#[derive(Clone, Debug)]
pub struct StreamingFrame {
    pub index: FrameIndex,
    pub image: Arc<FrameRGBA>,
    /// Seconds from the start of the export.
    pub timestamp: f64,
}

impl StreamingFrame {
    pub fn new(index: u64, image: FrameRGBA, timestamp: f64) -> Self {
        Self {
            index: FrameIndex(index),
            image: Arc::new(image),
            timestamp,
        }
    }
}

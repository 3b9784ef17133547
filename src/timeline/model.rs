use crate::foundation::error::{ExportError, ExportResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One element of the flattened timeline.
///
/// Times are in seconds. The element is visible over
/// `[start_time, start_time + duration - trim_start - trim_end]`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimelineElement {
    pub id: String,
    /// Track order; lower tracks are drawn first.
    #[serde(default)]
    pub track_index: u32,
    /// Layer within the track. Missing layers sort as `0`.
    #[serde(default)]
    pub layer: Option<i32>,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub trim_start: f64,
    #[serde(default)]
    pub trim_end: f64,
    pub payload: ElementPayload,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementPayload {
    Media(MediaPayload),
    Text(TextPayload),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaPayload {
    pub media_id: String,
    pub kind: MediaKind,
    #[serde(default = "unit_volume")]
    pub volume: f32,
    /// Stereo pan in `[-1, 1]`; negative is left.
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub muted: bool,
}

fn unit_volume() -> f32 {
    1.0
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextPayload {
    pub content: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextBaseline {
    #[default]
    Top,
    Middle,
    Alphabetic,
    Bottom,
}

/// Text drawing options.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub font_size: f32,
    pub font_family: String,
    /// CSS-style hex color.
    pub color: String,
    pub align: TextAlign,
    pub baseline: TextBaseline,
    pub max_width: Option<f32>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 24.0,
            font_family: "sans-serif".to_owned(),
            color: "#000000".to_owned(),
            align: TextAlign::Left,
            baseline: TextBaseline::Top,
            max_width: None,
        }
    }
}

impl TimelineElement {
    /// Visible length after trimming.
    pub fn effective_duration(&self) -> f64 {
        self.duration - self.trim_start - self.trim_end
    }

    /// Inclusive end of the visible window.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.effective_duration()
    }

    /// Position inside the source media at timeline time `t`.
    pub fn source_time_at(&self, t: f64) -> f64 {
        self.trim_start + (t - self.start_time).max(0.0)
    }

    pub fn media(&self) -> Option<&MediaPayload> {
        match &self.payload {
            ElementPayload::Media(m) => Some(m),
            ElementPayload::Text(_) => None,
        }
    }

    /// Media payload of elements that can contribute sound.
    pub fn audio(&self) -> Option<&MediaPayload> {
        self.media()
            .filter(|m| matches!(m.kind, MediaKind::Audio | MediaKind::Video))
    }

    /// Check the trim invariant `0 <= trim_start`, `trim_start + trim_end < duration`.
    pub fn validate(&self) -> ExportResult<()> {
        let finite = [self.start_time, self.duration, self.trim_start, self.trim_end]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(ExportError::validation(format!(
                "element '{}' has non-finite timing",
                self.id
            )));
        }
        if self.start_time < 0.0 {
            return Err(ExportError::validation(format!(
                "element '{}' starts before 0",
                self.id
            )));
        }
        if self.trim_start < 0.0 || self.trim_end < 0.0 {
            return Err(ExportError::validation(format!(
                "element '{}' has negative trim",
                self.id
            )));
        }
        if self.trim_start + self.trim_end >= self.duration {
            return Err(ExportError::validation(format!(
                "element '{}' trims ({} + {}) leave nothing of duration {}",
                self.id, self.trim_start, self.trim_end, self.duration
            )));
        }
        if let Some(m) = self.media() {
            if !m.volume.is_finite() || m.volume < 0.0 {
                return Err(ExportError::validation(format!(
                    "element '{}' volume must be finite and >= 0",
                    self.id
                )));
            }
            if !(-1.0..=1.0).contains(&m.pan) {
                return Err(ExportError::validation(format!(
                    "element '{}' pan must be within [-1, 1]",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Where a media item's bytes come from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    Path(PathBuf),
    /// Encoded image bytes held in memory.
    #[serde(skip)]
    Bytes(Arc<Vec<u8>>),
    /// Decoded interleaved PCM held in memory.
    #[serde(skip)]
    Pcm {
        sample_rate: u32,
        channels: u16,
        samples: Arc<Vec<f32>>,
    },
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub source: MediaSource,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Media lookup table (`id -> item`) owned by the timeline collaborator.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<MediaItem>", into = "Vec<MediaItem>")]
pub struct MediaLibrary {
    items: BTreeMap<String, MediaItem>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: MediaItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &str) -> Option<&MediaItem> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaItem> {
        self.items.values()
    }
}

impl From<Vec<MediaItem>> for MediaLibrary {
    fn from(items: Vec<MediaItem>) -> Self {
        let mut lib = Self::new();
        for item in items {
            lib.insert(item);
        }
        lib
    }
}

impl From<MediaLibrary> for Vec<MediaItem> {
    fn from(lib: MediaLibrary) -> Self {
        lib.items.into_values().collect()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/model.rs"]
mod tests;

use crate::foundation::core::{Canvas, Fps, Rgba8};
use crate::foundation::error::{ExportError, ExportResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Mp4,
    #[serde(rename = "webm")]
    WebM,
    Mov,
}

impl ExportFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::WebM => "video/webm",
            Self::Mov => "video/quicktime",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
            Self::Mov => "mov",
        }
    }

    /// Software codecs used when the settings leave the codec open.
    pub fn default_codecs(self) -> (&'static str, &'static str) {
        match self {
            Self::Mp4 | Self::Mov => ("libx264", "aac"),
            Self::WebM => ("libvpx-vp9", "libopus"),
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
    Lossless,
}

impl Quality {
    fn bitrate_scale(self) -> f64 {
        match self {
            Self::Low => 0.5,
            Self::Medium => 1.0,
            Self::High | Self::Lossless => 1.5,
        }
    }
}

/// Output settings, immutable for one export.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Fps,
    #[serde(default)]
    pub target_bitrate: Option<u64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    /// Canvas clear color; white when unset.
    #[serde(default)]
    pub background: Option<String>,
}

const MIN_AUTO_BITRATE: f64 = 1_000_000.0;
const MAX_AUTO_BITRATE: f64 = 10_000_000.0;

impl ExportSettings {
    pub fn new(width: u32, height: u32, frame_rate: Fps) -> Self {
        Self {
            format: ExportFormat::default(),
            quality: Quality::default(),
            width,
            height,
            frame_rate,
            target_bitrate: None,
            video_codec: None,
            audio_codec: None,
            background: None,
        }
    }

    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.width,
            height: self.height,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn video_codec(&self) -> &str {
        self.video_codec
            .as_deref()
            .unwrap_or(self.format.default_codecs().0)
    }

    pub fn audio_codec(&self) -> &str {
        self.audio_codec
            .as_deref()
            .unwrap_or(self.format.default_codecs().1)
    }

    /// Video bitrate in bits per second.
    ///
    /// An explicit `target_bitrate` wins; otherwise 0.1 bit per pixel per frame, clamped to
    /// 1..10 Mbps, then scaled by quality.
    pub fn effective_bitrate(&self) -> u64 {
        if let Some(b) = self.target_bitrate {
            return b;
        }
        let pixels = f64::from(self.width) * f64::from(self.height);
        let base = (pixels * self.frame_rate.as_f64() * 0.1).clamp(MIN_AUTO_BITRATE, MAX_AUTO_BITRATE);
        (base * self.quality.bitrate_scale()).round() as u64
    }

    pub fn background(&self) -> ExportResult<Rgba8> {
        match self.background.as_deref() {
            Some(hex) => Rgba8::parse_hex(hex),
            None => Ok(Rgba8::WHITE),
        }
    }

    pub fn validate(&self) -> ExportResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::validation("export width/height must be non-zero"));
        }
        Fps::new(self.frame_rate.num, self.frame_rate.den)?;
        if self.target_bitrate == Some(0) {
            return Err(ExportError::validation("target_bitrate must be > 0 when set"));
        }
        self.background()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/settings.rs"]
mod tests;

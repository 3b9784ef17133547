use std::fmt;

/// Crate-wide result alias.
pub type ExportResult<T> = Result<T, ExportError>;

/// Error kinds callers branch on (fallback decisions, user messaging, analytics).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Compatibility,
    Memory,
    Render,
    Encoder,
    Audio,
    Cancelled,
    Busy,
    Validation,
    Other,
}

/// Encoder lifecycle step that produced an [`ExportError::Encoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderStage {
    Probe,
    Init,
    Start,
    Feed,
    Stop,
}

impl EncoderStage {
    /// `true` for failures raised before any frame reached the encoder.
    pub fn is_initialization(self) -> bool {
        matches!(self, Self::Probe | Self::Init | Self::Start)
    }
}

impl fmt::Display for EncoderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Probe => "probe",
            Self::Init => "init",
            Self::Start => "start",
            Self::Feed => "feed",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Export pipeline error taxonomy.
///
/// `Display` keeps the raw detail for logs; [`ExportError::user_message`] is the short,
/// actionable text meant for end users.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("compatibility error: missing {}", .missing.join(", "))]
    Compatibility { missing: Vec<String> },

    #[error("memory error: {0}")]
    Memory(String),

    #[error("render error at frame {frame} ({timestamp:.3}s): {message}")]
    Render {
        frame: u64,
        timestamp: f64,
        message: String,
    },

    #[error("encoder error during {stage}: {message}")]
    Encoder {
        stage: EncoderStage,
        message: String,
    },

    #[error("audio error for '{source_id}': {message}")]
    Audio { source_id: String, message: String },

    #[error("export cancelled")]
    Cancelled,

    #[error("export busy: an export is already running on this instance")]
    Busy,

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    pub fn compatibility<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Compatibility {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn memory(msg: impl Into<String>) -> Self {
        Self::Memory(msg.into())
    }

    pub fn render(frame: u64, timestamp: f64, msg: impl Into<String>) -> Self {
        Self::Render {
            frame,
            timestamp,
            message: msg.into(),
        }
    }

    pub fn encoder(stage: EncoderStage, msg: impl Into<String>) -> Self {
        Self::Encoder {
            stage,
            message: msg.into(),
        }
    }

    pub fn audio(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Audio {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compatibility { .. } => ErrorKind::Compatibility,
            Self::Memory(_) => ErrorKind::Memory,
            Self::Render { .. } => ErrorKind::Render,
            Self::Encoder { .. } => ErrorKind::Encoder,
            Self::Audio { .. } => ErrorKind::Audio,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Busy => ErrorKind::Busy,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Audio failures degrade the export instead of ending it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Audio { .. })
    }

    /// Re-tag a lower-level error as an encoder failure at `stage`.
    ///
    /// Cancellation and busy errors pass through unchanged.
    pub fn into_encoder(self, stage: EncoderStage) -> Self {
        match self {
            Self::Encoder { .. } | Self::Cancelled | Self::Busy => self,
            other => Self::encoder(stage, other.to_string()),
        }
    }

    /// Short, actionable message for end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::Compatibility { missing } => format!(
                "This system cannot export video (missing: {}). Install ffmpeg or switch to a supported environment.",
                missing.join(", ")
            ),
            Self::Memory(_) => "Insufficient memory to complete export. Reduce quality or duration, or close other work.".to_owned(),
            Self::Render { frame, timestamp, .. } => format!(
                "Failed to render frame {frame} ({timestamp:.2}s). Check the media at that point of the timeline and try again."
            ),
            Self::Encoder { .. } => {
                "Video encoding failed. Try a different format or a lower quality setting.".to_owned()
            }
            Self::Audio { .. } => {
                "An audio track could not be processed and was left out of the export.".to_owned()
            }
            Self::Cancelled => "Export was cancelled.".to_owned(),
            Self::Busy => {
                "An export is already running. Wait for it to finish or cancel it first.".to_owned()
            }
            Self::Validation(msg) => format!("The timeline contains invalid data: {msg}."),
            Self::Other(_) => "Export failed unexpectedly. Please try again.".to_owned(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;

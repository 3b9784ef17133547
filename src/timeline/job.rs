use crate::foundation::error::{ExportError, ExportResult};
use crate::timeline::model::{MediaLibrary, TimelineElement};
use crate::timeline::settings::ExportSettings;
use anyhow::Context as _;
use std::path::{Path, PathBuf};

/// Font file made available to text elements.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FontSource {
    pub path: PathBuf,
}

/// Everything one export run reads: the element snapshot, media lookup table and settings.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExportJob {
    pub elements: Vec<TimelineElement>,
    #[serde(default)]
    pub media: MediaLibrary,
    pub settings: ExportSettings,
    /// Export length in seconds.
    pub duration: f64,
    #[serde(default)]
    pub fonts: Vec<FontSource>,
}

impl ExportJob {
    pub fn new(settings: ExportSettings, duration: f64) -> Self {
        Self {
            elements: Vec::new(),
            media: MediaLibrary::new(),
            settings,
            duration,
            fonts: Vec::new(),
        }
    }

    /// Load a job description from JSON.
    ///
    /// Relative media and font paths are resolved against the JSON file's directory.
    pub fn from_json_path(path: impl AsRef<Path>) -> ExportResult<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)
            .with_context(|| format!("open export job '{}'", path.display()))?;
        let mut job: ExportJob = serde_json::from_reader(std::io::BufReader::new(f))
            .map_err(|e| ExportError::validation(format!("parse export job JSON: {e}")))?;
        if let Some(root) = path.parent() {
            job.resolve_paths(root);
        }
        Ok(job)
    }

    fn resolve_paths(&mut self, root: &Path) {
        use crate::timeline::model::{MediaItem, MediaSource};

        let items: Vec<MediaItem> = std::mem::take(&mut self.media).into();
        self.media = items
            .into_iter()
            .map(|mut item| {
                if let MediaSource::Path(p) = &item.source
                    && p.is_relative()
                {
                    item.source = MediaSource::Path(root.join(p));
                }
                item
            })
            .collect::<Vec<_>>()
            .into();
        for font in &mut self.fonts {
            if font.path.is_relative() {
                font.path = root.join(&font.path);
            }
        }
    }

    /// Validate settings, duration, every element and every media reference.
    pub fn validate(&self) -> ExportResult<()> {
        self.settings.validate()?;
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ExportError::validation(
                "export duration must be finite and >= 0",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for el in &self.elements {
            el.validate()?;
            if !seen.insert(el.id.as_str()) {
                return Err(ExportError::validation(format!(
                    "duplicate element id '{}'",
                    el.id
                )));
            }
            if let Some(m) = el.media() {
                let item = self.media.get(&m.media_id).ok_or_else(|| {
                    ExportError::validation(format!(
                        "element '{}' references unknown media '{}'",
                        el.id, m.media_id
                    ))
                })?;
                if item.kind != m.kind {
                    return Err(ExportError::validation(format!(
                        "element '{}' expects {:?} media but '{}' is {:?}",
                        el.id, m.kind, item.id, item.kind
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn has_text(&self) -> bool {
        use crate::timeline::model::ElementPayload;
        self.elements
            .iter()
            .any(|e| matches!(e.payload, ElementPayload::Text(_)))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/job.rs"]
mod tests;

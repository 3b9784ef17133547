use std::time::Instant;

/// Percent reported for warnings, which carry no progress.
pub const WARNING_PERCENT: i8 = -1;

/// One progress notification: `percent` in `0..=100`, or [`WARNING_PERCENT`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ExportProgress {
    pub percent: i8,
    pub status: String,
}

impl ExportProgress {
    pub fn is_warning(&self) -> bool {
        self.percent == WARNING_PERCENT
    }
}

/// Progress callback that drops every notification.
pub fn ignore_progress(_: ExportProgress) {}

/// First and last percent of the frame phase.
const FRAMES_FROM: u64 = 15;
const FRAMES_TO: u64 = 90;

/// Deduplicating front for a progress callback.
///
/// Emits once per whole-percent change and never goes backwards, including across fallback
/// attempts that share one reporter.
pub(crate) struct ProgressReporter<'a> {
    sink: &'a dyn Fn(ExportProgress),
    last: Option<u8>,
    frames_started: Option<Instant>,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(sink: &'a dyn Fn(ExportProgress)) -> Self {
        Self {
            sink,
            last: None,
            frames_started: None,
        }
    }

    pub(crate) fn report(&mut self, percent: u8, status: impl Into<String>) {
        let percent = percent.min(100);
        if self.last.is_some_and(|l| percent <= l) {
            return;
        }
        self.last = Some(percent);
        (self.sink)(ExportProgress {
            percent: percent as i8,
            status: status.into(),
        });
    }

    pub(crate) fn warn(&mut self, status: impl Into<String>) {
        let status = status.into();
        tracing::warn!(%status, "export warning");
        (self.sink)(ExportProgress {
            percent: WARNING_PERCENT,
            status,
        });
    }

    /// Frame-phase progress after `done` of `total` frames, with a remaining-time estimate.
    pub(crate) fn frame(&mut self, done: u64, total: u64) {
        let started = *self.frames_started.get_or_insert_with(Instant::now);
        if total == 0 {
            return;
        }
        let done = done.min(total);
        let percent = (FRAMES_FROM + (FRAMES_TO - FRAMES_FROM) * done / total) as u8;
        if self.last.is_some_and(|l| percent <= l) {
            return;
        }
        let elapsed = started.elapsed().as_secs_f64();
        let status = if done == 0 {
            format!("Rendering frame {done} of {total}")
        } else {
            let eta = elapsed / done as f64 * (total - done) as f64;
            format!("Rendering frame {done} of {total} (about {eta:.0}s remaining)")
        };
        self.report(percent, status);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/export/progress.rs"]
mod tests;

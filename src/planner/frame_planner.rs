use crate::foundation::core::{Fps, Rect};
use crate::timeline::model::TimelineElement;

/// Tolerance for treating `fps * duration` as a whole number of frames.
const FRAME_COUNT_EPSILON: f64 = 1e-9;

/// Number of output frames for `duration` seconds: `ceil(fps * duration)`.
///
/// Products within a rounding error of an integer are not bumped to the next frame.
pub fn total_frames(fps: Fps, duration: f64) -> u64 {
    if !duration.is_finite() || duration <= 0.0 {
        return 0;
    }
    let raw = duration * f64::from(fps.num) / f64::from(fps.den);
    let nearest = raw.round();
    if (raw - nearest).abs() < FRAME_COUNT_EPSILON {
        nearest as u64
    } else {
        raw.ceil() as u64
    }
}

/// Screen bounds of an element on a `width x height` canvas.
///
/// Every kind currently fills the whole canvas.
pub fn element_bounds(_element: &TimelineElement, width: u32, height: u32) -> Rect {
    Rect::new(0.0, 0.0, f64::from(width), f64::from(height))
}

/// Visible elements of one output frame, in draw order (bottom first).
#[derive(Clone, Debug)]
pub struct FrameDescriptor<'a> {
    pub frame_number: u64,
    /// Seconds from the start of the export.
    pub timestamp: f64,
    pub visible_elements: Vec<&'a TimelineElement>,
}

/// Pure planner over a borrowed element snapshot.
///
/// Holds no mutable state, so one planner is shared by reference across render workers.
#[derive(Clone, Copy, Debug)]
pub struct FramePlanner<'a> {
    fps: Fps,
    duration: f64,
    elements: &'a [TimelineElement],
}

impl<'a> FramePlanner<'a> {
    pub fn new(fps: Fps, duration: f64, elements: &'a [TimelineElement]) -> Self {
        Self {
            fps,
            duration,
            elements,
        }
    }

    pub fn fps(&self) -> Fps {
        self.fps
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn total_frames(&self) -> u64 {
        total_frames(self.fps, self.duration)
    }

    pub fn timestamp(&self, frame_number: u64) -> f64 {
        (frame_number as f64) * f64::from(self.fps.den) / f64::from(self.fps.num)
    }

    /// `true` when `t` lies in the element's window, both ends included.
    pub fn is_visible(element: &TimelineElement, t: f64) -> bool {
        t >= element.start_time && t <= element.end_time()
    }

    /// Elements visible at `t`, sorted by track then layer.
    ///
    /// The sort is stable and works on a fresh list; the snapshot is never reordered.
    pub fn visible_elements(&self, t: f64) -> Vec<&'a TimelineElement> {
        let mut out: Vec<&'a TimelineElement> = self
            .elements
            .iter()
            .filter(|e| Self::is_visible(e, t))
            .collect();
        out.sort_by_key(|e| (e.track_index, e.layer.unwrap_or(0)));
        out
    }

    pub fn frame_data(&self, frame_number: u64) -> FrameDescriptor<'a> {
        let timestamp = self.timestamp(frame_number);
        FrameDescriptor {
            frame_number,
            timestamp,
            visible_elements: self.visible_elements(timestamp),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/planner/frame_planner.rs"]
mod tests;

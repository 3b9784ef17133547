//! Audio mixing aligned to the video frame clock.

pub(crate) mod mixer;

use crate::foundation::core::FrameIndex;
use crate::foundation::error::{ExportError, ExportResult};
use crate::render::frame::StreamingFrame;
use std::collections::BTreeMap;

/// Holds rendered frames until every lower index has been delivered.
///
/// Delivery is strictly ascending and gap-free: a frame leaves the buffer only when its index
/// equals [`ReorderBuffer::next_index`].
#[derive(Debug)]
pub struct ReorderBuffer {
    pending: BTreeMap<u64, StreamingFrame>,
    next: u64,
    watermark: usize,
}

impl ReorderBuffer {
    /// Buffer delivering from `start`; a drain pass pauses while more than `watermark` frames
    /// remain parked.
    pub fn new(start: FrameIndex, watermark: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            next: start.0,
            watermark: watermark.max(1),
        }
    }

    /// Park a rendered frame. Duplicates and already-delivered indices are rejected.
    pub fn insert(&mut self, frame: StreamingFrame) -> ExportResult<()> {
        let idx = frame.index.0;
        if idx < self.next {
            return Err(ExportError::validation(format!(
                "frame {idx} arrived after frame {} was already written",
                self.next.saturating_sub(1)
            )));
        }
        if self.pending.contains_key(&idx) {
            return Err(ExportError::validation(format!("frame {idx} rendered twice")));
        }
        self.pending.insert(idx, frame);
        Ok(())
    }

    /// Deliver the contiguous run starting at `next_index`. Stops at the first gap, or after any
    /// delivery that still leaves more than `watermark` frames parked. Returns the number
    /// delivered.
    pub fn drain(
        &mut self,
        mut deliver: impl FnMut(StreamingFrame) -> ExportResult<()>,
    ) -> ExportResult<usize> {
        let mut delivered = 0;
        while let Some(frame) = self.pending.remove(&self.next) {
            self.next += 1;
            deliver(frame)?;
            delivered += 1;
            if self.pending.len() > self.watermark {
                tracing::warn!(
                    parked = self.pending.len(),
                    watermark = self.watermark,
                    "reorder backlog above watermark, pausing delivery"
                );
                break;
            }
        }
        Ok(delivered)
    }

    /// Deliver everything left. A missing index is an error; nothing past it is delivered.
    pub fn flush(
        &mut self,
        mut deliver: impl FnMut(StreamingFrame) -> ExportResult<()>,
    ) -> ExportResult<usize> {
        let mut delivered = 0;
        while let Some((&idx, _)) = self.pending.first_key_value() {
            if idx != self.next {
                return Err(ExportError::validation(format!(
                    "frame {} missing before frame {idx}",
                    self.next
                )));
            }
            if let Some(frame) = self.pending.remove(&idx) {
                self.next += 1;
                deliver(frame)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Index the encoder expects next.
    pub fn next_index(&self) -> FrameIndex {
        FrameIndex(self.next)
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/export/reorder.rs"]
mod tests;

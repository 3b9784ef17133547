use crate::foundation::error::{ExportError, ExportResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle of one export run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    #[default]
    Idle,
    Preflighting,
    Rendering,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Preflighting | Self::Rendering | Self::Finalizing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Cooperative cancellation flag, checked per frame or per batch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> ExportResult<()> {
        if self.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        Ok(())
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One-export-at-a-time gate plus state and cancellation for an exporter instance.
#[derive(Debug, Default)]
pub struct ExportControl {
    /// Serializes claim, release and cancel so a cancel can never land between the token
    /// reset and the busy flip.
    gate: Mutex<()>,
    busy: AtomicBool,
    state: Mutex<ExportState>,
    cancel: CancelToken,
}

impl ExportControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the instance for a new run. Fails with `Busy` while another run is active.
    pub fn begin(&self) -> ExportResult<RunGuard<'_>> {
        {
            let _gate = self.lock_gate();
            if self.busy.load(Ordering::SeqCst) {
                return Err(ExportError::Busy);
            }
            self.cancel.reset();
            self.busy.store(true, Ordering::SeqCst);
        }
        let guard = RunGuard { control: self };
        guard.enter(ExportState::Preflighting);
        Ok(guard)
    }

    /// Request cancellation of the active run. Idempotent; a no-op when idle.
    pub fn cancel(&self) {
        let _gate = self.lock_gate();
        if self.busy.load(Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    pub fn state(&self) -> ExportState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn lock_gate(&self) -> std::sync::MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ExportState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Held for the duration of a run; releases the instance on drop.
#[derive(Debug)]
pub struct RunGuard<'a> {
    control: &'a ExportControl,
}

impl RunGuard<'_> {
    pub(crate) fn enter(&self, state: ExportState) {
        tracing::debug!(?state, "export state");
        self.control.set_state(state);
    }

    pub(crate) fn check_cancelled(&self) -> ExportResult<()> {
        self.control.cancel.check()
    }

    /// Record the terminal state matching `result`.
    pub(crate) fn settle<T>(&self, result: &ExportResult<T>) {
        self.enter(match result {
            Ok(_) => ExportState::Completed,
            Err(ExportError::Cancelled) => ExportState::Cancelled,
            Err(_) => ExportState::Failed,
        });
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.control.state().is_active() {
            self.control.set_state(ExportState::Failed);
        }
        let _gate = self.control.lock_gate();
        self.control.busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/export/control.rs"]
mod tests;

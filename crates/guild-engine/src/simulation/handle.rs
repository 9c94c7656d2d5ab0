use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use guild_core::error::SimulationError;
use guild_core::types::{RunId, RunProgress, SimulationResult};

/// Handle to an in-flight simulation run.
///
/// Await [`RunHandle::wait`] for the outcome; dropping the handle does not
/// stop the run.
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    progress: watch::Receiver<RunProgress>,
    task: JoinHandle<Result<SimulationResult, SimulationError>>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: RunId,
        cancel: CancellationToken,
        progress: watch::Receiver<RunProgress>,
        task: JoinHandle<Result<SimulationResult, SimulationError>>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            progress,
            task,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Request cooperative cancellation. Takes effect at the next node boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> RunProgress {
        self.progress.borrow().clone()
    }

    /// Receiver that observes every progress update.
    pub fn watch_progress(&self) -> watch::Receiver<RunProgress> {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to resolve.
    pub async fn wait(self) -> Result<SimulationResult, SimulationError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(SimulationError::Aborted(e.to_string())),
        }
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Holds the runner's single in-flight slot; releases it on drop.
pub(crate) struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    /// Claim the slot, or `None` when a run already holds it.
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_slot_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = InFlightGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(InFlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}

//! Injected task lifecycle callbacks.

use crate::executor::TaskId;
use crate::result::OutcomeStatus;
use tracing::{debug, warn};

/// Callbacks the engine invokes as tasks move through it.
///
/// Called from producer and worker threads; implementations must be cheap
/// and must not block on the engine they observe.
pub trait EngineObserver: Send + Sync {
    fn on_submit(&self, _id: TaskId, _work: &str) {}

    fn on_complete(&self, _id: TaskId, _status: OutcomeStatus) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// Emits one `tracing` event per submission and completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn on_submit(&self, id: TaskId, work: &str) {
        debug!(task = %id, work, "task submitted");
    }

    fn on_complete(&self, id: TaskId, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Success => debug!(task = %id, "task succeeded"),
            OutcomeStatus::Failure => warn!(task = %id, "task failed"),
            OutcomeStatus::Cancelled => debug!(task = %id, "task cancelled"),
        }
    }
}

use super::task::TaskError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Task kind reported for a work function that panicked.
pub const PANIC_KIND: &str = "panic";

/// Failure boundary around user code.
///
/// A panic is caught, logged under the handler's scope and handed back as a
/// [`PanicInfo`]; the calling thread keeps running.
#[derive(Debug, Clone, Copy)]
pub struct PanicHandler {
    scope: &'static str,
}

impl PanicHandler {
    /// `scope` names the kind of code being guarded in log events.
    pub fn new(scope: &'static str) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn execute<F, R>(&self, f: F) -> Result<R, PanicInfo>
    where
        F: FnOnce() -> R,
    {
        catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            let info = PanicInfo::from_payload(payload);
            warn!(scope = self.scope, message = %info.message, "panic caught");
            info
        })
    }

    /// Run a work function, folding a panic into the task's error.
    pub fn run_task<F, R>(&self, f: F) -> Result<R, TaskError>
    where
        F: FnOnce() -> Result<R, TaskError>,
    {
        self.execute(f)
            .unwrap_or_else(|info| Err(TaskError::new(PANIC_KIND, info.message)))
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new("task")
    }
}

#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        Self { message }
    }
}

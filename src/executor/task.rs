//! Task representation and execution.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Values that can be handed to a worker and back.
///
/// Thread workers move them; process workers encode them as JSON, so the
/// bound holds in both models and switching models never changes the API.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// The execution context running the task died, or none was left to run it.
pub const WORKER_LOST_KIND: &str = "worker_lost";
/// A value could not be decoded at the process boundary.
pub const DECODE_KIND: &str = "decode";
/// A value could not be encoded at the process boundary.
pub const ENCODE_KIND: &str = "encode";
/// The worker process has no function registered under the requested name.
pub const UNKNOWN_FUNCTION_KIND: &str = "unknown_function";

/// Submission sequence number, unique per engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(seq: u64) -> Self {
        TaskId(seq)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Error a work function reports for its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
}

impl TaskError {
    pub fn new<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

type BoxedFn<P, R> = dyn Fn(P) -> Result<R, TaskError> + Send + Sync;

/// A named work function.
///
/// Thread workers call the closure. Process workers send only the name; the
/// child resolves it in its own [`Registry`](super::process::Registry), so
/// the same name must be registered there with the same behavior.
pub struct WorkFn<P, R> {
    name: Arc<str>,
    func: Arc<BoxedFn<P, R>>,
}

impl<P, R> WorkFn<P, R> {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(P) -> Result<R, TaskError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, payload: P) -> Result<R, TaskError> {
        (self.func)(payload)
    }
}

impl<P, R> Clone for WorkFn<P, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func.clone(),
        }
    }
}

impl<P, R> std::fmt::Debug for WorkFn<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkFn").field("name", &self.name).finish()
    }
}

/// Internal task representation
pub(crate) struct Task<P, R> {
    pub(crate) id: TaskId,
    pub(crate) payload: P,
    pub(crate) work: WorkFn<P, R>,
    pub(crate) submit_time: Instant,
}

impl<P, R> Task<P, R> {
    pub fn new(id: TaskId, payload: P, work: WorkFn<P, R>) -> Self {
        Task {
            id,
            payload,
            work,
            submit_time: Instant::now(),
        }
    }

    /// Run the work function in this thread
    pub fn execute(self) -> Result<R, TaskError> {
        self.work.call(self.payload)
    }
}

impl<P, R> std::fmt::Debug for Task<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("work", &self.work.name())
            .field("submit_time", &self.submit_time)
            .finish()
    }
}

use crate::executor::TaskId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("timed out waiting")]
    Timeout,

    #[error("queue is closed")]
    ClosedQueue,

    #[error("engine is closed to new submissions")]
    EngineClosed,

    #[error("task failed ({kind}): {message}")]
    TaskFailure { kind: String, message: String },

    #[error("task {0} was cancelled before it ran")]
    Cancelled(TaskId),

    #[error("result for task {0} recorded twice")]
    DuplicateResult(TaskId),

    #[error("no result will ever be recorded for task {0}")]
    UnknownTask(TaskId),

    #[error("no live workers remain")]
    NoLiveWorkers,

    #[error("worker {worker} lost: {reason}")]
    WorkerLost { worker: usize, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn worker_lost<S: Into<String>>(worker: usize, reason: S) -> Self {
        Error::WorkerLost {
            worker,
            reason: reason.into(),
        }
    }

    /// True for errors that leave the operation's target unchanged and can be retried.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

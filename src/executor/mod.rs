//! Task execution infrastructure.
//!
//! This module provides the task representation, the failure boundary around
//! user code, the worker loop and the pool that owns the workers, plus the
//! process-isolated execution backend.

pub mod panic_handler;
pub(crate) mod pool;
pub mod process;
pub mod task;
pub mod worker;

pub use panic_handler::{PanicHandler, PanicInfo, PANIC_KIND};
pub use process::{builtin_registry, serve, serve_on, Registry};
pub use task::{
    Payload, TaskError, TaskId, WorkFn, DECODE_KIND, ENCODE_KIND, UNKNOWN_FUNCTION_KIND,
    WORKER_LOST_KIND,
};
pub use worker::{WorkerFault, WorkerId, WorkerState};

pub(crate) use pool::WorkerPool;
pub(crate) use task::Task;

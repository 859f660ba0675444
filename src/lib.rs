//! Conveyor - concurrent task execution engine
//!
//! Callers submit `(payload, work function)` pairs to an [`Engine`], which runs
//! them on a fixed pool of workers fed from one shared FIFO queue and hands
//! back per-task results.
//!
//! # Quick Start
//!
//! ```no_run
//! use conveyor::prelude::*;
//!
//! let engine: Engine<(i64, i64), i64> = Engine::new(Config::builder().worker_count(4).build()?)?;
//! let divide = WorkFn::new("divide", |(a, b): (i64, i64)| {
//!     if b == 0 {
//!         Err(TaskError::new("DivideByZero", "division by zero"))
//!     } else {
//!         Ok(a / b)
//!     }
//! });
//!
//! let handle = engine.submit((1, 0), &divide)?;
//! let result = handle.result();
//! assert_eq!(result.failure().map(|f| f.kind.as_str()), Some("DivideByZero"));
//!
//! engine.close(true)?;
//! # Ok::<(), conveyor::Error>(())
//! ```
//!
//! # Features
//!
//! - **Thread or process workers**: the same API over in-process threads or
//!   child processes speaking line-delimited JSON
//! - **Bounded queue with backpressure**: producers block while the queue is full
//! - **Exactly-once results**: every accepted task resolves to one success,
//!   failure or cancellation
//! - **Failure isolation**: a failing or panicking task never takes down its worker
//! - **Graceful or immediate close**: drain the queue or cancel what is left

#![warn(missing_debug_implementations)]

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod queue;
pub mod result;
pub mod telemetry;

pub use config::{Config, ConfigBuilder, ExecutionModel};
pub use engine::{BatchRejected, Engine, EngineState};
pub use error::{Error, Result};
pub use executor::{Payload, TaskError, TaskId, WorkFn};
pub use queue::{Message, SynchronizedQueue};
pub use result::{AsCompleted, Outcome, OutcomeStatus, TaskFailure, TaskHandle, TaskResult};
pub use telemetry::EngineObserver;

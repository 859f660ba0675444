pub use crate::config::{Config, ConfigBuilder, ExecutionModel};
pub use crate::engine::{BatchRejected, Engine, EngineState};
pub use crate::error::{Error, Result};
pub use crate::executor::{Payload, TaskError, TaskId, WorkFn};
pub use crate::result::{AsCompleted, Outcome, OutcomeStatus, TaskFailure, TaskHandle, TaskResult};
pub use crate::telemetry::{EngineObserver, MetricsSnapshot, TracingObserver};

//! Engine observability: counters and injected lifecycle callbacks.

pub mod metrics;
pub mod observer;

pub use metrics::{Metrics, MetricsSnapshot};
pub use observer::{EngineObserver, NoopObserver, TracingObserver};

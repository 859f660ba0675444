use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{Payload, Task, TaskId, WorkFn, WorkerFault, WorkerPool, WorkerState};
use crate::executor::worker::WorkerContext;
use crate::queue::SynchronizedQueue;
use crate::result::{AsCompleted, Outcome, ResultCollector, TaskHandle, TaskResult};
use crate::telemetry::{EngineObserver, Metrics, MetricsSnapshot, NoopObserver};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Engine lifecycle: `Open -> Draining -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Open,
    Draining,
    Closed,
}

/// Accepts tasks, runs them on a worker pool and hands back their results.
///
/// All methods take `&self`; share the engine across producer threads with an `Arc`.
///
/// ```no_run
/// use conveyor::prelude::*;
///
/// let engine: Engine<i64, i64> = Engine::new(Config::builder().worker_count(2).build()?)?;
/// let square = WorkFn::new("square", |x: i64| Ok(x * x));
///
/// let handles = engine.submit_batch(vec![2, 3, 4, 5], &square)?;
/// let values: Vec<i64> = engine
///     .await_all(handles)
///     .into_iter()
///     .filter_map(|r| r.into_result().ok())
///     .collect();
/// assert_eq!(values, vec![4, 9, 16, 25]);
///
/// engine.close(true)?;
/// # Ok::<(), conveyor::Error>(())
/// ```
pub struct Engine<P: Payload, R: Payload> {
    config: Config,
    // held for reading across enqueue so close() cannot slip between check and put
    state: RwLock<EngineState>,
    next_id: AtomicU64,
    context: Arc<WorkerContext<P, R>>,
    pool: WorkerPool<P, R>,
}

impl<P: Payload, R: Payload> Engine<P, R> {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    pub fn with_observer(config: Config, observer: Arc<dyn EngineObserver>) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(SynchronizedQueue::with_capacity(config.queue_capacity));
        let context = Arc::new(WorkerContext::new(
            queue,
            Arc::new(ResultCollector::new()),
            Arc::new(Metrics::new()),
            observer,
        ));
        let pool = WorkerPool::start(&config, context.clone())?;

        Ok(Self {
            config,
            state: RwLock::new(EngineState::Open),
            next_id: AtomicU64::new(1),
            context,
            pool,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Queue a task. Blocks while a bounded queue is full.
    pub fn submit(&self, payload: P, work: &WorkFn<P, R>) -> Result<TaskHandle<R>> {
        let state = self.state.read();
        if *state != EngineState::Open {
            return Err(Error::EngineClosed);
        }

        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.context.notify_submit(id, work.name());

        match self.context.queue.put(Task::new(id, payload, work.clone())) {
            Ok(()) => Ok(TaskHandle::new(id, self.context.collector.clone())),
            Err(err) => {
                self.context.notify_rejected(id);
                match err {
                    // engine still open, so the queue was closed because every worker died
                    Error::ClosedQueue => Err(Error::NoLiveWorkers),
                    other => Err(other),
                }
            }
        }
    }

    /// Submit each payload in order. Handles come back in submission order.
    ///
    /// Stops at the first rejected submission. The handles issued before it
    /// travel back inside the [`BatchRejected`]; those tasks still resolve.
    pub fn submit_batch<I>(
        &self,
        payloads: I,
        work: &WorkFn<P, R>,
    ) -> std::result::Result<Vec<TaskHandle<R>>, BatchRejected<R>>
    where
        I: IntoIterator<Item = P>,
    {
        let mut accepted = Vec::new();
        for payload in payloads {
            match self.submit(payload, work) {
                Ok(handle) => accepted.push(handle),
                Err(error) => return Err(BatchRejected { accepted, error }),
            }
        }
        Ok(accepted)
    }

    /// Wait for every handle; results come back in the order given.
    pub fn await_all(&self, handles: Vec<TaskHandle<R>>) -> Vec<TaskResult<R>> {
        handles.into_iter().map(TaskHandle::result).collect()
    }

    /// Yield results as their tasks finish, whatever the submission order.
    ///
    /// The handles must have been issued by this engine.
    pub fn as_completed(&self, handles: Vec<TaskHandle<R>>) -> AsCompleted<R> {
        AsCompleted::new(self.context.collector.clone(), handles)
    }

    /// Close with the configured `drain_on_close` policy.
    pub fn shutdown(&self) -> Result<()> {
        self.close(self.config.drain_on_close)
    }

    /// Stop intake, stop the workers and resolve every task.
    ///
    /// With `drain_pending` queued tasks still run; without it they resolve as
    /// cancelled. Fails with the first worker fault seen during the engine's
    /// lifetime. Closing again is a no-op.
    pub fn close(&self, drain_pending: bool) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != EngineState::Open {
                drop(state);
                self.pool.join();
                return Ok(());
            }
            *state = EngineState::Draining;
        }

        info!(drain_pending, queued = self.queue_len(), "closing engine");

        let mut bookkeeping = Ok(());
        for task in self.pool.shutdown(drain_pending) {
            if let Err(err) = self.context.complete(task.id, Outcome::Cancelled) {
                error!(task = %task.id, error = %err, "could not cancel task");
                bookkeeping = Err(err);
            }
        }

        self.pool.join();
        *self.state.write() = EngineState::Closed;
        self.context.collector.finalize();

        let metrics = self.metrics();
        info!(
            succeeded = metrics.tasks_succeeded,
            failed = metrics.tasks_failed,
            cancelled = metrics.tasks_cancelled,
            "engine closed"
        );

        bookkeeping?;

        let mut faults = self.worker_faults().into_iter();
        match faults.next() {
            Some(first) => {
                for extra in faults {
                    warn!(worker = extra.worker, reason = %extra.reason, "additional worker fault");
                }
                Err(first.into())
            }
            None => Ok(()),
        }
    }

    /// Results recorded but never claimed through a handle, by task id.
    pub fn drain_results(&self) -> Vec<TaskResult<R>> {
        self.context.collector.drain()
    }

    /// Advisory queue length.
    pub fn queue_len(&self) -> usize {
        self.context.queue.try_size()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.context.metrics.snapshot()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.worker_states()
    }

    pub fn worker_faults(&self) -> Vec<WorkerFault> {
        self.pool.faults()
    }

    pub fn live_workers(&self) -> usize {
        self.context.live_workers()
    }
}

/// A batch submission refused part way through.
pub struct BatchRejected<R> {
    /// Handles for the payloads accepted before the refusal, in order.
    pub accepted: Vec<TaskHandle<R>>,
    pub error: Error,
}

impl<R> From<BatchRejected<R>> for Error {
    fn from(rejected: BatchRejected<R>) -> Self {
        rejected.error
    }
}

impl<R> std::fmt::Display for BatchRejected<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} accepted before)", self.error, self.accepted.len())
    }
}

impl<R> std::fmt::Debug for BatchRejected<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRejected")
            .field("accepted", &self.accepted.len())
            .field("error", &self.error)
            .finish()
    }
}

impl<R> std::error::Error for BatchRejected<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<P: Payload, R: Payload> Drop for Engine<P, R> {
    fn drop(&mut self) {
        if self.state() == EngineState::Closed {
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "engine dropped with errors");
        }
    }
}

impl<P: Payload, R: Payload> std::fmt::Debug for Engine<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("workers", &self.pool.size())
            .field("model", &self.pool.model())
            .field("queued", &self.queue_len())
            .finish()
    }
}

// worker loop and the state it shares with the pool
use super::panic_handler::{PanicHandler, PANIC_KIND};
use super::task::{Task, TaskId, WORKER_LOST_KIND};
use crate::error::{Error, Result};
use crate::queue::{Message, SynchronizedQueue};
use crate::result::{Outcome, ResultCollector};
use crate::telemetry::{EngineObserver, Metrics};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub type WorkerId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: WorkerState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Running,
            1 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Running -> Draining; a stopped worker stays stopped.
    pub fn begin_drain(&self) {
        let _ = self.0.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// A worker slot that died, kept until the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    pub worker: WorkerId,
    pub reason: String,
}

impl From<WorkerFault> for Error {
    fn from(fault: WorkerFault) -> Self {
        Error::worker_lost(fault.worker, fault.reason)
    }
}

/// Runs one task to a terminal outcome.
///
/// `Err` means the execution context itself is gone, not that the task failed.
pub(crate) trait Runner<P, R>: Send {
    fn run(&mut self, task: Task<P, R>) -> Result<Outcome<R>>;

    /// How often an idle worker should call [`check_alive`](Runner::check_alive).
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    fn check_alive(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Calls the work function on the worker thread.
pub(crate) struct LocalRunner {
    panic_handler: PanicHandler,
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            panic_handler: PanicHandler::default(),
        }
    }
}

impl<P, R> Runner<P, R> for LocalRunner {
    fn run(&mut self, task: Task<P, R>) -> Result<Outcome<R>> {
        let result = self.panic_handler.run_task(|| task.execute());
        Ok(Outcome::from_result(result))
    }
}

/// Everything workers and the engine share to resolve tasks.
pub(crate) struct WorkerContext<P, R> {
    pub queue: Arc<SynchronizedQueue<Task<P, R>>>,
    pub collector: Arc<ResultCollector<R>>,
    pub metrics: Arc<Metrics>,
    observer: Arc<dyn EngineObserver>,
    // observer code is user code too
    guard: PanicHandler,
    faults: Mutex<Vec<WorkerFault>>,
    live_workers: AtomicUsize,
}

impl<P, R> WorkerContext<P, R> {
    pub fn new(
        queue: Arc<SynchronizedQueue<Task<P, R>>>,
        collector: Arc<ResultCollector<R>>,
        metrics: Arc<Metrics>,
        observer: Arc<dyn EngineObserver>,
    ) -> Self {
        Self {
            queue,
            collector,
            metrics,
            observer,
            guard: PanicHandler::new("observer"),
            faults: Mutex::new(Vec::new()),
            live_workers: AtomicUsize::new(0),
        }
    }

    pub fn notify_submit(&self, id: TaskId, work: &str) {
        self.metrics.record_submit();
        let _ = self.guard.execute(|| self.observer.on_submit(id, work));
    }

    /// A submission that never reached the queue.
    pub fn notify_rejected(&self, id: TaskId) {
        let status = Outcome::<R>::Cancelled.status();
        self.metrics.record_outcome(status);
        let _ = self.guard.execute(|| self.observer.on_complete(id, status));
    }

    /// Record the terminal outcome of `id`.
    pub fn complete(&self, id: TaskId, outcome: Outcome<R>) -> Result<()> {
        let status = outcome.status();
        if let Outcome::Failure(failure) = &outcome {
            if failure.kind == PANIC_KIND {
                self.metrics.record_panic();
            }
        }

        self.collector.record(id, outcome)?;
        self.metrics.record_outcome(status);
        let _ = self.guard.execute(|| self.observer.on_complete(id, status));
        Ok(())
    }

    pub fn worker_started(&self) {
        self.live_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    pub fn report_fault(&self, worker: WorkerId, reason: String) {
        error!(worker, %reason, "worker lost");
        self.faults.lock().push(WorkerFault { worker, reason });
    }

    pub fn faults(&self) -> Vec<WorkerFault> {
        self.faults.lock().clone()
    }

    /// Bookkeeping when a worker leaves its loop, for whatever reason.
    pub fn worker_exited(&self, worker: WorkerId, fault: Option<String>) {
        if let Some(reason) = fault {
            self.report_fault(worker, reason);
        }

        let remaining = self.live_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            return;
        }

        // nobody is left to run queued work; resolve it instead of hanging callers
        let orphaned = self.queue.close_and_take();
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "no live workers remain, failing queued tasks");
        }
        for task in orphaned {
            let outcome = Outcome::failure(WORKER_LOST_KIND, "no live workers remain");
            if let Err(err) = self.complete(task.id, outcome) {
                error!(task = %task.id, error = %err, "could not resolve orphaned task");
            }
        }
    }
}

pub(crate) struct Worker<P, R> {
    pub id: WorkerId,
    context: Arc<WorkerContext<P, R>>,
    state: Arc<StateCell>,
}

impl<P, R> Worker<P, R> {
    pub fn new(id: WorkerId, context: Arc<WorkerContext<P, R>>, state: Arc<StateCell>) -> Self {
        Self { id, context, state }
    }

    // main loop
    pub fn run<X: Runner<P, R>>(&self, mut runner: X) {
        debug!(worker = self.id, "worker started");

        let fault = loop {
            let message = match runner.poll_interval() {
                None => Ok(self.context.queue.get()),
                Some(interval) => self.context.queue.get_timeout(interval),
            };

            match message {
                Ok(Message::Job(task)) => {
                    if let Err(err) = self.execute_task(&mut runner, task) {
                        break Some(err.to_string());
                    }
                }
                // sentinel: no further dequeues from this worker
                Ok(Message::Shutdown) => break None,
                Err(Error::Timeout) => {
                    if let Err(err) = runner.check_alive() {
                        break Some(err.to_string());
                    }
                }
                Err(err) => break Some(err.to_string()),
            }
        };

        drop(runner);
        self.state.set(WorkerState::Stopped);
        debug!(worker = self.id, faulted = fault.is_some(), "worker stopped");
        self.context.worker_exited(self.id, fault);
    }

    fn execute_task<X: Runner<P, R>>(&self, runner: &mut X, task: Task<P, R>) -> Result<()> {
        let id = task.id;
        let queued = task.submit_time.elapsed();
        let start = Instant::now();

        match runner.run(task) {
            Ok(outcome) => {
                self.context.metrics.record_execution(queued, start.elapsed());
                self.context.complete(id, outcome)
            }
            Err(err) => {
                let outcome = Outcome::failure(WORKER_LOST_KIND, err.to_string());
                self.context.complete(id, outcome)?;
                Err(err)
            }
        }
    }
}

impl<P, R> Drop for Worker<P, R> {
    fn drop(&mut self) {
        // the loop itself panicked: the slot is dead and must still be accounted for
        if thread::panicking() {
            self.state.set(WorkerState::Stopped);
            self.context
                .worker_exited(self.id, Some("worker thread panicked".to_string()));
        }
    }
}

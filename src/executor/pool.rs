use super::process::ProcessSlot;
use super::task::{Payload, Task};
use super::worker::{
    LocalRunner, Runner, StateCell, Worker, WorkerContext, WorkerFault, WorkerId, WorkerState,
};
use crate::config::{Config, ExecutionModel};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Fixed set of workers draining one queue.
pub(crate) struct WorkerPool<P, R> {
    workers: Vec<WorkerHandle>,
    context: Arc<WorkerContext<P, R>>,
    model: ExecutionModel,
}

struct WorkerHandle {
    id: WorkerId,
    state: Arc<StateCell>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Payload, R: Payload> WorkerPool<P, R> {
    pub fn start(config: &Config, context: Arc<WorkerContext<P, R>>) -> Result<Self> {
        let num_workers = config.workers();
        if num_workers == 0 {
            return Err(Error::config("need at least 1 worker"));
        }

        let mut pool = Self {
            workers: Vec::with_capacity(num_workers),
            context,
            model: config.execution_model,
        };

        for id in 0..num_workers {
            let spawned = match config.execution_model {
                ExecutionModel::Thread => pool.spawn_worker(id, config, LocalRunner::new()),
                ExecutionModel::Process => match config.worker_program.as_deref() {
                    Some(program) => {
                        ProcessSlot::spawn(id, program, &config.worker_args, config.poll_interval)
                            .and_then(|slot| pool.spawn_worker(id, config, slot))
                    }
                    None => Err(Error::config(
                        "process execution model requires worker_program",
                    )),
                },
            };

            if let Err(err) = spawned {
                error!(worker = id, error = %err, "failed to start worker, tearing pool down");
                // workers already running see the closed queue as their sentinel
                pool.context.queue.close();
                pool.join();
                return Err(err);
            }
        }

        info!(
            workers = num_workers,
            model = %pool.model,
            capacity = ?pool.context.queue.capacity(),
            "worker pool started"
        );

        Ok(pool)
    }

    fn spawn_worker<X>(&mut self, id: WorkerId, config: &Config, runner: X) -> Result<()>
    where
        X: Runner<P, R> + 'static,
    {
        let state = Arc::new(StateCell::new(WorkerState::Running));
        let worker = Worker::new(id, self.context.clone(), state.clone());

        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        self.context.worker_started();
        let thread = match builder.spawn(move || worker.run(runner)) {
            Ok(thread) => thread,
            Err(e) => {
                // the closure never ran, so the worker never checked out
                self.context.worker_exited(id, Some(format!("spawn failed: {}", e)));
                return Err(Error::Io(e));
            }
        };

        self.workers.push(WorkerHandle {
            id,
            state,
            thread: Mutex::new(Some(thread)),
        });
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn model(&self) -> ExecutionModel {
        self.model
    }

    /// Stop the workers.
    ///
    /// Draining enqueues one sentinel per worker behind the pending work and
    /// closes the queue. Otherwise the queue is closed and emptied at once, and
    /// the abandoned tasks are returned for the caller to resolve.
    pub fn shutdown(&self, drain_pending: bool) -> Vec<Task<P, R>> {
        for worker in &self.workers {
            worker.state.begin_drain();
        }

        if !drain_pending {
            let abandoned = self.context.queue.close_and_take();
            debug!(abandoned = abandoned.len(), "pool shutting down without draining");
            return abandoned;
        }

        for _ in 0..self.workers.len() {
            // fails only once every worker is gone and the queue was closed for them
            if self.context.queue.put_sentinel().is_err() {
                break;
            }
        }
        self.context.queue.close();
        debug!(workers = self.workers.len(), "pool draining");
        Vec::new()
    }

    /// Block until every worker is stopped. Safe to call repeatedly.
    pub fn join(&self) {
        for worker in &self.workers {
            if let Some(thread) = worker.thread.lock().take() {
                if thread.join().is_err() {
                    error!(worker = worker.id, "worker thread terminated by panic");
                }
            }
        }
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| w.state.get()).collect()
    }

    pub fn faults(&self) -> Vec<WorkerFault> {
        self.context.faults()
    }
}

//! Task outcomes, the collector that stores them and the handles callers wait on.

use crate::error::{Error, Result};
use crate::executor::{TaskError, TaskId};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Failure kind for a handle whose result can no longer be found.
pub const LOST_KIND: &str = "lost";

/// Why a task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

impl From<TaskError> for TaskFailure {
    fn from(err: TaskError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome<R> {
    Success(R),
    Failure(TaskFailure),
    Cancelled,
}

impl<R> Outcome<R> {
    pub fn from_result(result: std::result::Result<R, TaskError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err.into()),
        }
    }

    pub fn failure<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        Outcome::Failure(TaskFailure {
            kind: kind.into(),
            message: message.into(),
        })
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            Outcome::Success(_) => OutcomeStatus::Success,
            Outcome::Failure(_) => OutcomeStatus::Failure,
            Outcome::Cancelled => OutcomeStatus::Cancelled,
        }
    }
}

/// Outcome without its value, for observers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failure,
    Cancelled,
}

/// The terminal result of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult<R> {
    pub id: TaskId,
    pub outcome: Outcome<R>,
}

impl<R> TaskResult<R> {
    pub fn new(id: TaskId, outcome: Outcome<R>) -> Self {
        Self { id, outcome }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn value(&self) -> Option<&R> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            Outcome::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Outcome::Cancelled)
    }

    /// Convert into the crate error taxonomy.
    pub fn into_result(self) -> Result<R> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(f) => Err(Error::TaskFailure {
                kind: f.kind,
                message: f.message,
            }),
            Outcome::Cancelled => Err(Error::Cancelled(self.id)),
        }
    }
}

enum Slot<R> {
    Ready(Outcome<R>),
    // handed out; kept so a second record is still caught
    Taken,
}

struct Inner<R> {
    slots: HashMap<TaskId, Slot<R>>,
    finalized: bool,
}

/// Stores each task's result exactly once and wakes whoever waits for it.
pub struct ResultCollector<R> {
    inner: Mutex<Inner<R>>,
    ready: Condvar,
}

impl<R> ResultCollector<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                finalized: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn record(&self, id: TaskId, outcome: Outcome<R>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(&id) {
            return Err(Error::DuplicateResult(id));
        }
        inner.slots.insert(id, Slot::Ready(outcome));
        drop(inner);

        self.ready.notify_all();
        Ok(())
    }

    /// Block until `id` has a result and take it.
    pub fn result_for(&self, id: TaskId) -> Result<TaskResult<R>> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(result) = Self::take_locked(&mut inner, id)? {
                return Ok(result);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Wait up to `timeout` for `id` to be recorded, without taking it.
    pub fn wait_for(&self, id: TaskId, timeout: Duration) -> Result<()> {
        // None: the timeout is too large to express as an instant, wait without one
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();
        loop {
            match inner.slots.get(&id) {
                Some(Slot::Ready(_)) => return Ok(()),
                Some(Slot::Taken) => return Err(Error::UnknownTask(id)),
                None if inner.finalized => return Err(Error::UnknownTask(id)),
                None => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut inner, deadline).timed_out() {
                        return match inner.slots.get(&id) {
                            Some(Slot::Ready(_)) => Ok(()),
                            _ => Err(Error::Timeout),
                        };
                    }
                }
                None => self.ready.wait(&mut inner),
            }
        }
    }

    /// Block until one of `ids` can be resolved and take it, scanning in
    /// the order given. Returns the id with its result, or with the error for
    /// an id that will never get one. `ids` must not be empty.
    pub(crate) fn take_first_ready(&self, ids: &[TaskId]) -> (TaskId, Result<TaskResult<R>>) {
        let mut inner = self.inner.lock();
        loop {
            for id in ids {
                match Self::take_locked(&mut inner, *id) {
                    Ok(Some(result)) => return (*id, Ok(result)),
                    Ok(None) => {}
                    Err(err) => return (*id, Err(err)),
                }
            }
            self.ready.wait(&mut inner);
        }
    }

    pub fn try_result_for(&self, id: TaskId) -> Result<Option<TaskResult<R>>> {
        let mut inner = self.inner.lock();
        Self::take_locked(&mut inner, id)
    }

    fn take_locked(inner: &mut Inner<R>, id: TaskId) -> Result<Option<TaskResult<R>>> {
        match inner.slots.get_mut(&id) {
            Some(slot) => match std::mem::replace(slot, Slot::Taken) {
                Slot::Ready(outcome) => Ok(Some(TaskResult::new(id, outcome))),
                Slot::Taken => Err(Error::UnknownTask(id)),
            },
            None if inner.finalized => Err(Error::UnknownTask(id)),
            None => Ok(None),
        }
    }

    pub fn is_recorded(&self, id: TaskId) -> bool {
        self.inner.lock().slots.contains_key(&id)
    }

    /// Number of results recorded so far, taken or not.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No more results will arrive; waiting on an unrecorded id now fails.
    pub fn finalize(&self) {
        self.inner.lock().finalized = true;
        self.ready.notify_all();
    }

    /// Take every result no handle has claimed yet, ordered by task id.
    pub fn drain(&self) -> Vec<TaskResult<R>> {
        let mut inner = self.inner.lock();
        let mut drained: Vec<TaskResult<R>> = inner
            .slots
            .iter_mut()
            .filter_map(|(id, slot)| match std::mem::replace(slot, Slot::Taken) {
                Slot::Ready(outcome) => Some(TaskResult::new(*id, outcome)),
                Slot::Taken => None,
            })
            .collect();
        drained.sort_by_key(|r| r.id);
        drained
    }
}

impl<R> Default for ResultCollector<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for ResultCollector<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResultCollector")
            .field("recorded", &inner.slots.len())
            .field("finalized", &inner.finalized)
            .finish()
    }
}

/// Caller's side of a submitted task.
pub struct TaskHandle<R> {
    id: TaskId,
    collector: Arc<ResultCollector<R>>,
}

impl<R> TaskHandle<R> {
    pub(crate) fn new(id: TaskId, collector: Arc<ResultCollector<R>>) -> Self {
        Self { id, collector }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_ready(&self) -> bool {
        self.collector.is_recorded(self.id)
    }

    /// Block up to `timeout` for the result. The handle stays usable on `Error::Timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        self.collector.wait_for(self.id, timeout)
    }

    /// Take the result if it is already there.
    pub fn try_result(&self) -> Option<TaskResult<R>> {
        self.collector.try_result_for(self.id).ok().flatten()
    }

    /// Block until the task has a terminal result.
    pub fn result(self) -> TaskResult<R> {
        self.collector
            .result_for(self.id)
            .unwrap_or_else(|err| lost(self.id, err))
    }
}

// only reachable if the engine lost track of the task
fn lost<R>(id: TaskId, err: Error) -> TaskResult<R> {
    TaskResult::new(id, Outcome::failure(LOST_KIND, err.to_string()))
}

/// Results of a set of handles in the order their tasks finish.
///
/// Each `next` blocks until one of the remaining tasks has a result. When
/// several are already done, the one handed in first comes first.
pub struct AsCompleted<R> {
    collector: Arc<ResultCollector<R>>,
    pending: Vec<TaskId>,
}

impl<R> AsCompleted<R> {
    pub(crate) fn new(collector: Arc<ResultCollector<R>>, handles: Vec<TaskHandle<R>>) -> Self {
        debug_assert!(handles.iter().all(|h| Arc::ptr_eq(&h.collector, &collector)));
        let pending = handles.into_iter().map(|h| h.id).collect();
        Self { collector, pending }
    }

    /// Tasks not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl<R> Iterator for AsCompleted<R> {
    type Item = TaskResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            return None;
        }
        let (id, taken) = self.collector.take_first_ready(&self.pending);
        self.pending.retain(|pending| *pending != id);
        Some(taken.unwrap_or_else(|err| lost(id, err)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.pending.len(), Some(self.pending.len()))
    }
}

impl<R> ExactSizeIterator for AsCompleted<R> {}

impl<R> std::fmt::Debug for AsCompleted<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsCompleted")
            .field("pending", &self.pending)
            .finish()
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_record_once() {
        let collector = ResultCollector::new();
        let id = TaskId::new(1);

        collector.record(id, Outcome::Success(4)).unwrap();
        let dup = collector.record(id, Outcome::Success(5));
        assert!(matches!(dup, Err(Error::DuplicateResult(d)) if d == id));

        let result = collector.result_for(id).unwrap();
        assert_eq!(result.value(), Some(&4));

        // still guarded after the result was handed out
        assert!(collector.record(id, Outcome::Cancelled).is_err());
    }

    #[test]
    fn test_result_for_blocks_until_recorded() {
        let collector = Arc::new(ResultCollector::new());
        let id = TaskId::new(9);

        let waiter = {
            let collector = collector.clone();
            thread::spawn(move || collector.result_for(id).unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        collector.record(id, Outcome::<u32>::Cancelled).unwrap();

        assert!(waiter.join().unwrap().is_cancelled());
    }

    #[test]
    fn test_wait_for_times_out() {
        let collector: ResultCollector<u32> = ResultCollector::new();
        let id = TaskId::new(1);

        let err = collector.wait_for(id, Duration::from_millis(10)).unwrap_err();
        assert!(err.is_timeout());

        collector.record(id, Outcome::Success(1)).unwrap();
        assert!(collector.wait_for(id, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_finalize_unblocks_unknown() {
        let collector: Arc<ResultCollector<u32>> = Arc::new(ResultCollector::new());

        let waiter = {
            let collector = collector.clone();
            thread::spawn(move || collector.result_for(TaskId::new(77)))
        };

        thread::sleep(Duration::from_millis(20));
        collector.finalize();

        assert!(matches!(waiter.join().unwrap(), Err(Error::UnknownTask(_))));
    }

    #[test]
    fn test_drain_skips_taken() {
        let collector = ResultCollector::new();
        for i in (1..=4).rev() {
            collector.record(TaskId::new(i), Outcome::Success(i * 10)).unwrap();
        }
        assert_eq!(collector.len(), 4);

        collector.result_for(TaskId::new(2)).unwrap();

        let drained = collector.drain();
        let ids: Vec<u64> = drained.iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert!(collector.drain().is_empty());
    }

    #[test]
    fn test_into_result_mapping() {
        let ok = TaskResult::new(TaskId::new(1), Outcome::Success(3));
        assert_eq!(ok.into_result().unwrap(), 3);

        let failed: TaskResult<u8> =
            TaskResult::new(TaskId::new(2), Outcome::failure("DivideByZero", "x / 0"));
        assert_eq!(failed.failure().unwrap().kind, "DivideByZero");
        match failed.into_result() {
            Err(Error::TaskFailure { kind, .. }) => assert_eq!(kind, "DivideByZero"),
            other => panic!("unexpected: {:?}", other),
        }

        let cancelled: TaskResult<u8> = TaskResult::new(TaskId::new(3), Outcome::Cancelled);
        assert!(matches!(cancelled.into_result(), Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_handle_poll_and_wait() {
        let collector = Arc::new(ResultCollector::new());
        let handle = TaskHandle::new(TaskId::new(5), collector.clone());

        assert!(!handle.is_ready());
        assert!(handle.try_result().is_none());
        assert!(handle.wait(Duration::from_millis(5)).unwrap_err().is_timeout());

        collector.record(TaskId::new(5), Outcome::Success("done")).unwrap();
        assert!(handle.is_ready());
        handle.wait(Duration::from_millis(5)).unwrap();
        assert_eq!(handle.result().value(), Some(&"done"));
    }

    #[test]
    fn test_wait_without_deadline() {
        let collector = Arc::new(ResultCollector::new());
        let id = TaskId::new(3);

        let waiter = {
            let collector = collector.clone();
            thread::spawn(move || collector.wait_for(id, Duration::MAX))
        };

        thread::sleep(Duration::from_millis(20));
        collector.record(id, Outcome::Success(30u32)).unwrap();
        waiter.join().unwrap().unwrap();

        // already recorded: returns at once
        let handle = TaskHandle::new(id, collector);
        handle.wait(Duration::MAX).unwrap();
        assert_eq!(handle.result().value(), Some(&30));
    }

    #[test]
    fn test_as_completed_yields_in_finish_order() {
        let collector = Arc::new(ResultCollector::new());
        let handles: Vec<TaskHandle<u32>> = (1..=3)
            .map(|i| TaskHandle::new(TaskId::new(i), collector.clone()))
            .collect();

        let mut completed = AsCompleted::new(collector.clone(), handles);
        assert_eq!(completed.len(), 3);

        collector.record(TaskId::new(3), Outcome::Success(3)).unwrap();
        assert_eq!(completed.next().unwrap().id.get(), 3);
        collector.record(TaskId::new(1), Outcome::Success(1)).unwrap();
        assert_eq!(completed.next().unwrap().id.get(), 1);

        // the last one has to be waited for
        let recorder = {
            let collector = collector.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                collector.record(TaskId::new(2), Outcome::Success(2)).unwrap();
            })
        };
        let last = completed.next().unwrap();
        recorder.join().unwrap();

        assert_eq!(last.value(), Some(&2));
        assert_eq!(completed.remaining(), 0);
        assert!(completed.next().is_none());
    }

    #[test]
    fn test_as_completed_reports_unknown_as_lost() {
        let collector: Arc<ResultCollector<u32>> = Arc::new(ResultCollector::new());
        collector.record(TaskId::new(1), Outcome::Success(1)).unwrap();
        collector.finalize();

        let handles = vec![
            TaskHandle::new(TaskId::new(2), collector.clone()),
            TaskHandle::new(TaskId::new(1), collector.clone()),
        ];
        let results: Vec<TaskResult<u32>> = AsCompleted::new(collector, handles).collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].failure().unwrap().kind, LOST_KIND);
        assert_eq!(results[1].value(), Some(&1));
    }

    #[test]
    fn test_outcome_serde_shape() {
        let json = serde_json::to_string(&Outcome::Success(4)).unwrap();
        assert_eq!(json, r#"{"success":4}"#);

        let failure: Outcome<i32> = Outcome::failure("panic", "boom");
        let json = serde_json::to_string(&failure).unwrap();
        assert_eq!(json, r#"{"failure":{"kind":"panic","message":"boom"}}"#);
    }
}

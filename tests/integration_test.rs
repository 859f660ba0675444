//! Integration tests for the thread execution model

use conveyor::prelude::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn engine<P: Payload, R: Payload>(workers: usize) -> Engine<P, R> {
    let config = Config::builder().worker_count(workers).build().unwrap();
    Engine::new(config).unwrap()
}

fn square() -> WorkFn<i64, i64> {
    WorkFn::new("square", |x: i64| Ok(x * x))
}

fn divide() -> WorkFn<(i64, i64), i64> {
    WorkFn::new("divide", |(a, b): (i64, i64)| {
        if b == 0 {
            Err(TaskError::new("DivideByZero", "division by zero"))
        } else {
            Ok(a / b)
        }
    })
}

fn sleepy(millis: u64) -> WorkFn<u64, u64> {
    WorkFn::new("sleepy", move |x: u64| {
        thread::sleep(Duration::from_millis(millis));
        Ok(x)
    })
}

#[test]
fn test_square_batch() {
    let engine: Engine<i64, i64> = engine(4);

    let handles = engine.submit_batch(vec![2, 3, 4, 5], &square()).unwrap();
    let values: Vec<i64> = engine
        .await_all(handles)
        .into_iter()
        .map(|r| r.into_result().unwrap())
        .collect();

    assert_eq!(values, vec![4, 9, 16, 25]);
    engine.close(true).unwrap();
}

#[test]
fn test_task_failure_does_not_break_engine() {
    let engine: Engine<(i64, i64), i64> = engine(2);

    let result = engine.submit((1, 0), &divide()).unwrap().result();
    let failure = result.failure().unwrap();
    assert_eq!(failure.kind, "DivideByZero");
    assert!(matches!(
        result.into_result(),
        Err(Error::TaskFailure { ref kind, .. }) if kind == "DivideByZero"
    ));

    assert_eq!(engine.state(), EngineState::Open);
    let ok = engine.submit((10, 2), &divide()).unwrap().result();
    assert_eq!(ok.value(), Some(&5));

    engine.close(true).unwrap();
}

#[test]
fn test_panicking_task_is_isolated() {
    let engine: Engine<i64, i64> = engine(1);
    let explode = WorkFn::new("explode", |x: i64| {
        if x == 3 {
            panic!("bad input {}", x);
        }
        Ok(x)
    });

    let handles = engine.submit_batch(0..6, &explode).unwrap();
    let results = engine.await_all(handles);

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 5);
    let failure = results[3].failure().unwrap();
    assert_eq!(failure.kind, "panic");
    assert!(failure.message.contains("bad input 3"));

    // the single worker survived the panic
    assert_eq!(engine.live_workers(), 1);
    engine.close(true).unwrap();
    assert_eq!(engine.metrics().tasks_panicked, 1);
}

#[test]
fn test_backpressure_with_two_producers() {
    let config = Config::builder()
        .worker_count(1)
        .queue_capacity(1)
        .build()
        .unwrap();
    let engine: Arc<Engine<u64, u64>> = Arc::new(Engine::new(config).unwrap());
    let work = sleepy(5);

    let producers: Vec<_> = (0..2u64)
        .map(|p| {
            let engine = engine.clone();
            let work = work.clone();
            thread::spawn(move || {
                let mut submitted = Vec::new();
                for i in 0..5 {
                    let payload = p * 100 + i;
                    submitted.push((payload, engine.submit(payload, &work).unwrap()));
                    assert!(engine.queue_len() <= 1);
                }
                submitted
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for producer in producers {
        for (payload, handle) in producer.join().unwrap() {
            let id = handle.id();
            let result = handle.result();
            // each result belongs to the handle it came back on
            assert_eq!(result.id, id);
            assert_eq!(result.value(), Some(&payload));
            assert!(seen.insert(id));
        }
    }

    assert_eq!(seen.len(), 10);
    engine.close(true).unwrap();
}

#[test]
fn test_close_without_drain_cancels_pending() {
    let engine: Engine<u64, u64> = engine(1);

    let handles = engine.submit_batch(0..50, &sleepy(10)).unwrap();
    engine.close(false).unwrap();
    assert_eq!(engine.state(), EngineState::Closed);

    let results = engine.await_all(handles);
    assert_eq!(results.len(), 50);

    let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    assert!(cancelled > 0);
    assert_eq!(cancelled + succeeded, 50);

    let cancelled_id = results.iter().find(|r| r.is_cancelled()).unwrap().id;
    let err = results
        .into_iter()
        .find(|r| r.id == cancelled_id)
        .unwrap()
        .into_result()
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(id) if id == cancelled_id));

    assert_eq!(engine.metrics().tasks_cancelled, cancelled as u64);
}

#[test]
fn test_close_with_drain_runs_everything() {
    let engine: Engine<u64, u64> = engine(2);

    let handles = engine.submit_batch(0..20, &sleepy(2)).unwrap();
    engine.close(true).unwrap();

    let results = engine.await_all(handles);
    assert!(results.iter().all(|r| r.is_success()));
}

#[test]
fn test_exactly_once_across_worker_counts() {
    for workers in [1, 2, 8] {
        let engine: Engine<i64, i64> = engine(workers);
        let double = WorkFn::new("double", |x: i64| Ok(x * 2));

        let handles = engine.submit_batch(0..500, &double).unwrap();
        let results = engine.await_all(handles);

        let ids: HashSet<TaskId> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 500);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.value(), Some(&(i as i64 * 2)));
        }

        engine.close(true).unwrap();
        let metrics = engine.metrics();
        assert_eq!(metrics.tasks_submitted, 500);
        assert_eq!(metrics.tasks_completed(), 500);
        // nothing left over once every handle was claimed
        assert!(engine.drain_results().is_empty());
    }
}

#[test]
fn test_batch_preserves_order_with_uneven_work() {
    let engine: Engine<u64, u64> = engine(4);
    let uneven = WorkFn::new("uneven", |x: u64| {
        thread::sleep(Duration::from_millis((10 - x % 10) * 2));
        Ok(x)
    });

    let handles = engine.submit_batch(0..20, &uneven).unwrap();
    let values: Vec<u64> = engine
        .await_all(handles)
        .into_iter()
        .filter_map(|r| r.into_result().ok())
        .collect();

    assert_eq!(values, (0..20).collect::<Vec<_>>());
    engine.close(true).unwrap();
}

#[test]
fn test_as_completed_follows_finish_order() {
    let engine: Engine<u64, u64> = engine(2);
    let nap = WorkFn::new("nap", |millis: u64| {
        thread::sleep(Duration::from_millis(millis));
        Ok(millis)
    });

    let slow = engine.submit(300, &nap).unwrap();
    let fast = engine.submit(10, &nap).unwrap();
    let (slow_id, fast_id) = (slow.id(), fast.id());

    let mut completed = engine.as_completed(vec![slow, fast]);
    assert_eq!(completed.len(), 2);

    let first = completed.next().unwrap();
    assert_eq!(first.id, fast_id);
    assert_eq!(first.value(), Some(&10));

    let second = completed.next().unwrap();
    assert_eq!(second.id, slow_id);
    assert_eq!(second.value(), Some(&300));
    assert!(completed.next().is_none());

    engine.close(true).unwrap();
}

#[test]
fn test_as_completed_covers_every_handle() {
    let engine: Engine<u64, u64> = engine(4);
    let uneven = WorkFn::new("uneven", |x: u64| {
        thread::sleep(Duration::from_millis(x % 5));
        Ok(x)
    });

    let handles = engine.submit_batch(0..40, &uneven).unwrap();
    let mut values: Vec<u64> = engine
        .as_completed(handles)
        .filter_map(|r| r.into_result().ok())
        .collect();

    values.sort_unstable();
    assert_eq!(values, (0..40).collect::<Vec<_>>());
    engine.close(true).unwrap();
}

#[test]
fn test_rejected_batch_returns_accepted_handles() {
    let engine: Engine<u64, u64> = engine(1);
    let work = sleepy(5);

    // the engine closes while the batch is being fed
    let payloads = (0..10u64).inspect(|&i| {
        if i == 3 {
            engine.close(false).unwrap();
        }
    });
    let rejected = engine.submit_batch(payloads, &work).unwrap_err();

    assert!(matches!(rejected.error, Error::EngineClosed));
    assert_eq!(rejected.accepted.len(), 3);

    let results = engine.await_all(rejected.accepted);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.id.get(), i as u64 + 1);
        assert!(result.value() == Some(&(i as u64)) || result.is_cancelled());
    }
}

#[test]
fn test_unbounded_wait_on_handle() {
    let engine: Engine<u64, u64> = engine(1);

    let handle = engine.submit(9, &sleepy(20)).unwrap();
    handle.wait(Duration::MAX).unwrap();
    assert_eq!(handle.result().value(), Some(&9));

    engine.close(true).unwrap();
}

#[test]
fn test_submit_after_close_rejected() {
    let engine: Engine<i64, i64> = engine(2);
    engine.close(true).unwrap();

    assert!(matches!(
        engine.submit(1, &square()),
        Err(Error::EngineClosed)
    ));
    assert_eq!(engine.metrics().tasks_submitted, 0);
}

#[test]
fn test_unclaimed_results_are_drained() {
    let engine: Engine<i64, i64> = engine(2);

    // handles dropped on purpose
    engine.submit_batch(vec![1, 2, 3], &square()).unwrap();
    let kept = engine.submit(4, &square()).unwrap();
    engine.close(true).unwrap();

    assert_eq!(kept.result().value(), Some(&16));

    let drained = engine.drain_results();
    let values: Vec<i64> = drained.iter().filter_map(|r| r.value().copied()).collect();
    assert_eq!(values, vec![1, 4, 9]);
    assert!(engine.drain_results().is_empty());
}

#[test]
fn test_handle_wait_timeout() {
    let engine: Engine<u64, u64> = engine(1);

    let handle = engine.submit(7, &sleepy(200)).unwrap();
    assert!(handle.try_result().is_none());
    assert!(handle.wait(Duration::from_millis(1)).unwrap_err().is_timeout());

    handle.wait(Duration::from_secs(10)).unwrap();
    assert!(handle.is_ready());
    assert_eq!(handle.result().value(), Some(&7));
    engine.close(true).unwrap();
}

#[test]
fn test_submit_racing_close() {
    let engine: Arc<Engine<u64, u64>> = Arc::new(engine(2));
    let work = sleepy(1);

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let work = work.clone();
            thread::spawn(move || {
                let mut handles = Vec::new();
                for i in 0..100 {
                    match engine.submit(i, &work) {
                        Ok(handle) => handles.push(handle),
                        Err(Error::EngineClosed) => break,
                        Err(other) => panic!("unexpected error: {}", other),
                    }
                }
                handles
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    engine.close(false).unwrap();

    let mut accepted = 0;
    for producer in producers {
        for result in engine.await_all(producer.join().unwrap()) {
            accepted += 1;
            // every accepted task resolves, none are lost
            assert!(result.is_success() || result.is_cancelled());
        }
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.tasks_submitted, accepted);
    assert_eq!(metrics.tasks_in_flight(), 0);
}

#[derive(Default)]
struct Counting {
    submitted: AtomicUsize,
    completed: Mutex<Vec<(TaskId, OutcomeStatus)>>,
}

impl EngineObserver for Counting {
    fn on_submit(&self, _id: TaskId, work: &str) {
        assert_eq!(work, "divide");
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_complete(&self, id: TaskId, status: OutcomeStatus) {
        self.completed.lock().push((id, status));
    }
}

#[test]
fn test_observer_sees_every_task() {
    let observer = Arc::new(Counting::default());
    let config = Config::builder().worker_count(3).build().unwrap();
    let engine: Engine<(i64, i64), i64> =
        Engine::with_observer(config, observer.clone()).unwrap();

    let inputs: Vec<(i64, i64)> = (0..30).map(|i| (i, i % 3)).collect();
    let handles = engine.submit_batch(inputs, &divide()).unwrap();
    engine.await_all(handles);
    engine.close(true).unwrap();

    assert_eq!(observer.submitted.load(Ordering::SeqCst), 30);
    let completed = observer.completed.lock();
    assert_eq!(completed.len(), 30);
    assert_eq!(
        completed
            .iter()
            .filter(|(_, s)| *s == OutcomeStatus::Failure)
            .count(),
        10
    );
}

#[test]
fn test_shutdown_uses_configured_policy() {
    let config = Config::builder()
        .worker_count(1)
        .drain_on_close(false)
        .build()
        .unwrap();
    let engine: Engine<u64, u64> = Engine::new(config).unwrap();

    let handles = engine.submit_batch(0..30, &sleepy(10)).unwrap();
    engine.shutdown().unwrap();

    let results = engine.await_all(handles);
    assert!(results.iter().any(|r| r.is_cancelled()));
}

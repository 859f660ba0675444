//! Pipeline example - squares a batch, then divides with one bad input
//!
//! Runs on threads by default. To run the same pipeline on worker processes:
//!
//! ```text
//! cargo build --bin conveyor-worker
//! CONVEYOR_EXECUTION_MODEL=process \
//!     CONVEYOR_WORKER_PROGRAM=target/debug/conveyor-worker \
//!     cargo run --example pipeline
//! ```

use conveyor::prelude::*;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// names match the conveyor-worker builtins so either model can run them
fn square() -> WorkFn<i64, i64> {
    WorkFn::new("square", |x: i64| {
        x.checked_mul(x)
            .ok_or_else(|| TaskError::new("Overflow", format!("{} squared overflows", x)))
    })
}

fn divide() -> WorkFn<(i64, i64), i64> {
    WorkFn::new("divide", |(a, b): (i64, i64)| {
        if b == 0 {
            Err(TaskError::new("DivideByZero", format!("{} / 0", a)))
        } else {
            Ok(a / b)
        }
    })
}

fn main() -> conveyor::Result<()> {
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    println!("=== Pipeline Example ===\n");

    let config = Config::from_env()?;
    println!("model: {}, workers: {}", config.execution_model, config.workers());

    let squares: Engine<i64, i64> =
        Engine::with_observer(config.clone(), Arc::new(TracingObserver))?;
    let handles = squares.submit_batch(1..=10, &square())?;
    let values: Vec<i64> = squares
        .await_all(handles)
        .into_iter()
        .filter_map(|r| r.into_result().ok())
        .collect();
    println!("squares: {:?}", values);

    let m = squares.metrics();
    println!(
        "{} tasks, avg {:.1}us per task",
        m.tasks_completed(),
        m.avg_execution_ns() as f64 / 1000.0
    );
    squares.close(true)?;

    let quotients: Engine<(i64, i64), i64> = Engine::new(config)?;
    let inputs: Vec<(i64, i64)> = values.iter().map(|&v| (v, v % 4)).collect();
    let handles = quotients.submit_batch(inputs.clone(), &divide())?;

    for ((a, b), result) in inputs.iter().zip(quotients.await_all(handles)) {
        match result.outcome {
            Outcome::Success(q) => println!("{:>4} / {} = {}", a, b, q),
            Outcome::Failure(f) => println!("{:>4} / {} failed: {}", a, b, f.kind),
            Outcome::Cancelled => println!("{:>4} / {} cancelled", a, b),
        }
    }

    println!("engine still {:?} after failures", quotients.state());
    quotients.close(true)?;

    println!("\n=== Example Complete ===");
    Ok(())
}

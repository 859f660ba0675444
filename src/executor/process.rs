//! Process-isolated execution.
//!
//! Each process-mode worker slot owns one child process and talks to it over
//! its stdin/stdout, one JSON object per line:
//!
//! ```text
//! parent -> child  {"id":1,"function":"square","payload":4}
//! child  -> parent {"id":1,"outcome":{"success":16}}
//! ```
//!
//! Nothing but encoded values crosses the boundary. The child resolves the
//! function name in its own [`Registry`] and runs it under a panic boundary.
//! Closing the child's stdin is the shutdown signal. Stdout carries only the
//! protocol; diagnostics belong on stderr.

use super::panic_handler::PanicHandler;
use super::task::{
    Payload, Task, TaskError, WorkFn, DECODE_KIND, ENCODE_KIND, UNKNOWN_FUNCTION_KIND,
};
use super::worker::{Runner, WorkerId};
use crate::error::{Error, Result};
use crate::result::Outcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable carrying the slot number into the child.
pub const WORKER_ID_ENV: &str = "CONVEYOR_WORKER_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub function: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome<Value>,
}

type ErasedFn = dyn Fn(Value) -> std::result::Result<Value, TaskError> + Send + Sync;

/// Named functions a worker process can run.
#[derive(Default)]
pub struct Registry {
    functions: HashMap<String, Box<ErasedFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        P: Payload,
        R: Payload,
        F: Fn(P) -> std::result::Result<R, TaskError> + Send + Sync + 'static,
    {
        let erased = move |value: Value| {
            let payload: P = serde_json::from_value(value)
                .map_err(|e| TaskError::new(DECODE_KIND, e.to_string()))?;
            let result = f(payload)?;
            serde_json::to_value(result).map_err(|e| TaskError::new(ENCODE_KIND, e.to_string()))
        };
        self.functions.insert(name.to_string(), Box::new(erased));
        self
    }

    /// Register a [`WorkFn`] under its own name.
    pub fn register_work_fn<P: Payload, R: Payload>(&mut self, work: &WorkFn<P, R>) -> &mut Self {
        let work = work.clone();
        let name = work.name().to_string();
        self.register(&name, move |payload: P| work.call(payload))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn dispatch(&self, function: &str, payload: Value, handler: &PanicHandler) -> Outcome<Value> {
        match self.functions.get(function) {
            Some(f) => Outcome::from_result(handler.run_task(|| f(payload))),
            None => Outcome::failure(
                UNKNOWN_FUNCTION_KIND,
                format!("no function registered as '{}'", function),
            ),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.names())
            .finish()
    }
}

/// The stock functions served by the `conveyor-worker` binary.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register("square", |x: i64| {
            x.checked_mul(x)
                .ok_or_else(|| TaskError::new("Overflow", format!("{} squared overflows", x)))
        })
        .register("divide", |(a, b): (i64, i64)| {
            if b == 0 {
                Err(TaskError::new("DivideByZero", format!("{} / 0", a)))
            } else {
                Ok(a / b)
            }
        })
        .register("echo", |value: Value| Ok(value))
        .register("sleep", |millis: u64| {
            std::thread::sleep(Duration::from_millis(millis));
            Ok(millis)
        })
        .register("fail", |message: String| -> std::result::Result<Value, TaskError> {
            Err(TaskError::new("fail", message))
        })
        .register("panic", |message: String| -> std::result::Result<Value, TaskError> {
            panic!("{}", message)
        })
        // ends the worker process mid-task; exercises worker-loss handling
        .register("crash", |code: i32| -> std::result::Result<Value, TaskError> {
            std::process::exit(code)
        });
    registry
}

/// Serve requests from `input` until it ends.
pub fn serve_on<I: BufRead, O: Write>(registry: &Registry, input: I, mut output: O) -> Result<()> {
    let handler = PanicHandler::default();
    let mut served = 0u64;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = serde_json::from_str(&line)?;
        let outcome = registry.dispatch(&request.function, request.payload, &handler);
        let response = Response {
            id: request.id,
            outcome,
        };

        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
        served += 1;
    }

    debug!(served, "input closed, worker process exiting");
    Ok(())
}

/// Serve requests on this process's stdin/stdout.
pub fn serve(registry: &Registry) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_on(registry, stdin.lock(), stdout.lock())
}

/// Parent side of one worker process.
pub(crate) struct ProcessSlot {
    worker: WorkerId,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
    poll_interval: Duration,
    healthy: bool,
}

impl ProcessSlot {
    pub fn spawn(
        worker: WorkerId,
        program: &Path,
        args: &[String],
        poll_interval: Duration,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_ID_ENV, worker.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::protocol("worker process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::protocol("worker process has no stdout"))?;

        info!(worker, pid = child.id(), program = %program.display(), "worker process started");

        Ok(Self {
            worker,
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
            poll_interval,
            healthy: true,
        })
    }

    fn round_trip(&mut self, request: &Request) -> Result<Response> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::protocol("worker process input already closed"))?;
        serde_json::to_writer(&mut *stdin, request)?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            let status = self.child.try_wait()?;
            return Err(Error::protocol(match status {
                Some(status) => format!("worker process exited mid-task ({})", status),
                None => "worker process closed its output".to_string(),
            }));
        }

        let response: Response = serde_json::from_str(&line)?;
        if response.id != request.id {
            return Err(Error::protocol(format!(
                "response for task {} while waiting on {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }
}

impl<P: Payload, R: Payload> Runner<P, R> for ProcessSlot {
    fn run(&mut self, task: Task<P, R>) -> Result<Outcome<R>> {
        let payload = match serde_json::to_value(&task.payload) {
            Ok(value) => value,
            Err(e) => return Ok(Outcome::failure(ENCODE_KIND, e.to_string())),
        };
        let request = Request {
            id: task.id.get(),
            function: task.work.name().to_string(),
            payload,
        };

        let response = match self.round_trip(&request) {
            Ok(response) => response,
            Err(err) => {
                self.healthy = false;
                return Err(err);
            }
        };

        Ok(match response.outcome {
            Outcome::Success(value) => match serde_json::from_value::<R>(value) {
                Ok(result) => Outcome::Success(result),
                Err(e) => Outcome::failure(DECODE_KIND, e.to_string()),
            },
            Outcome::Failure(failure) => Outcome::Failure(failure),
            Outcome::Cancelled => Outcome::Cancelled,
        })
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.poll_interval)
    }

    fn check_alive(&mut self) -> Result<()> {
        match self.child.try_wait()? {
            Some(status) => {
                self.healthy = false;
                Err(Error::protocol(format!("worker process exited while idle ({})", status)))
            }
            None => Ok(()),
        }
    }
}

impl Drop for ProcessSlot {
    fn drop(&mut self) {
        // end of input tells a healthy child to exit
        drop(self.stdin.take());
        if !self.healthy {
            let _ = self.child.kill();
        }
        match self.child.wait() {
            Ok(status) if status.success() => {
                debug!(worker = self.worker, "worker process exited")
            }
            Ok(status) => warn!(worker = self.worker, %status, "worker process exited abnormally"),
            Err(e) => warn!(worker = self.worker, error = %e, "could not reap worker process"),
        }
    }
}

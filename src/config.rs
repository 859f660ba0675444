use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

const MAX_WORKERS: usize = 1024;

/// Where a worker runs the work function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionModel {
    /// Workers are threads sharing the engine's address space.
    #[default]
    Thread,
    /// Each worker slot owns a child process; payloads cross the boundary encoded.
    Process,
}

impl std::str::FromStr for ExecutionModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "thread" | "threads" => Ok(ExecutionModel::Thread),
            "process" | "processes" => Ok(ExecutionModel::Process),
            other => Err(Error::config(format!("unknown execution model: {}", other))),
        }
    }
}

impl std::fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionModel::Thread => f.write_str("thread"),
            ExecutionModel::Process => f.write_str("process"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub worker_count: Option<usize>,
    pub execution_model: ExecutionModel,
    /// 0 means unbounded.
    pub queue_capacity: usize,
    pub drain_on_close: bool,

    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
    pub poll_interval: Duration,

    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: None,
            execution_model: ExecutionModel::default(),
            queue_capacity: 0,
            drain_on_close: true,
            worker_program: None,
            worker_args: Vec::new(),
            poll_interval: Duration::from_millis(250),
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "conveyor-worker".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Defaults overridden by `CONVEYOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(workers) = std::env::var("CONVEYOR_WORKERS") {
            let n = workers
                .trim()
                .parse::<usize>()
                .map_err(|e| Error::config(format!("CONVEYOR_WORKERS: {}", e)))?;
            config.worker_count = Some(n);
        }
        if let Ok(model) = std::env::var("CONVEYOR_EXECUTION_MODEL") {
            config.execution_model = model.parse()?;
        }
        if let Ok(capacity) = std::env::var("CONVEYOR_QUEUE_CAPACITY") {
            config.queue_capacity = capacity
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("CONVEYOR_QUEUE_CAPACITY: {}", e)))?;
        }
        if let Ok(drain) = std::env::var("CONVEYOR_DRAIN_ON_CLOSE") {
            config.drain_on_close = parse_bool(&drain)
                .ok_or_else(|| Error::config(format!("CONVEYOR_DRAIN_ON_CLOSE: {}", drain)))?;
        }
        if let Ok(program) = std::env::var("CONVEYOR_WORKER_PROGRAM") {
            config.worker_program = Some(PathBuf::from(program));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.worker_count {
            if n == 0 {
                return Err(Error::config("worker_count must be > 0"));
            }
            if n > MAX_WORKERS {
                return Err(Error::config(format!(
                    "worker_count too large (max {})",
                    MAX_WORKERS
                )));
            }
        }

        if self.execution_model == ExecutionModel::Process && self.worker_program.is_none() {
            return Err(Error::config(
                "process execution model requires worker_program",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::config("poll_interval must be > 0"));
        }

        Ok(())
    }

    pub fn workers(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| num_cpus::get().min(MAX_WORKERS))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = Some(n);
        self
    }

    pub fn execution_model(mut self, model: ExecutionModel) -> Self {
        self.config.execution_model = model;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn drain_on_close(mut self, drain: bool) -> Self {
        self.config.drain_on_close = drain;
        self
    }

    pub fn worker_program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.config.worker_program = Some(program.into());
        self
    }

    pub fn worker_arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.config.worker_args.push(arg.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

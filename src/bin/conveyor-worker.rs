//! Conveyor worker process - serves the builtin functions over stdin/stdout

use clap::Parser;
use conveyor::executor::{builtin_registry, serve};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Worker process for conveyor's process execution model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Slot number assigned by the parent engine
    #[arg(long, env = "CONVEYOR_WORKER_ID")]
    worker_id: Option<usize>,

    /// Log filter: a level or directives such as `conveyor=debug,warn`
    #[arg(long, default_value = "warn", env = "CONVEYOR_LOG_LEVEL")]
    log_level: String,
}

fn main() -> conveyor::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .map_err(|e| conveyor::Error::config(format!("log level: {}", e)))?;

    // stdout carries the protocol
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let registry = builtin_registry();
    info!(
        worker = ?args.worker_id,
        functions = ?registry.names(),
        "conveyor worker v{} ready",
        env!("CARGO_PKG_VERSION")
    );

    serve(&registry).inspect_err(|e| error!(error = %e, "worker stopped"))
}

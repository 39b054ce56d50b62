//! Command-line seam for consumer binaries.
//!
//! The embedding program constructs its queues, registers their tasks, and
//! hands them to [`run`]; `--queue` selects one by name.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{Consumer, Error, Queue, Result};

const BANNER: &str = r"
  _            _
 | |_ __ _ ___| | ____ _
 | __/ _` / __| |/ / _` |
 | || (_| \__ \   < (_| |
  \__\__,_|___/_|\_\__, |
                      |_|
";

#[derive(Debug, Parser)]
#[command(name = "taskq", about = "distributed task queue runner")]
struct Cli {
    /// Name of the queue to operate on.
    #[arg(long)]
    queue: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the queue name and its registered task identifiers.
    QueueInfo,
    /// Run a consumer around the queue.
    Consumer,
}

/// Install a `tracing` subscriber writing to stderr, filtered by `RUST_LOG`
/// (default `info`). Panics if a subscriber is already installed.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Parse the process arguments and run the selected subcommand against one
/// of `queues`.
pub async fn run(queues: impl IntoIterator<Item = Queue>) -> Result<()> {
    dispatch(Cli::parse(), queues).await
}

async fn dispatch(cli: Cli, queues: impl IntoIterator<Item = Queue>) -> Result<()> {
    println!("{BANNER}");
    let queue = queues
        .into_iter()
        .find(|queue| queue.name() == cli.queue)
        .ok_or_else(|| Error::Configuration(format!("no queue named `{}`", cli.queue)))?;

    match cli.command {
        Command::QueueInfo => {
            println!("queue: {}", queue.name());
            for ident in queue.task_idents() {
                println!("[+] registered task: {ident}");
            }
            Ok(())
        }
        Command::Consumer => Consumer::new(queue).run().await,
    }
}

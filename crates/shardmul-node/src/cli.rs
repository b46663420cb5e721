use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use shardmul::{Address, partition::Layout, wire::DEFAULT_MAX_FRAME_LEN};

use crate::job::{ElementKind, JobSpec, ProbeKind};

/// Distributed block matrix multiplication.
///
/// Logging can be controlled with an EnvFilter via the `SHARDMUL_LOG` environment
/// variable.
#[derive(Debug, Parser)]
#[command(name = "shardmul-node", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve block products until interrupted.
    Worker(WorkerArgs),
    /// Multiply two random matrices on the registered workers and verify the result.
    Dispatch(DispatchArgs),
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// The socket address to bind the worker to.
    #[arg(long, short, default_value = "127.0.0.1:5000")]
    pub addr: SocketAddr,
    /// The address to announce, if it differs from the bound address.
    #[arg(long)]
    pub advertise: Option<Address>,
    /// The worker registry to announce this worker in.
    #[arg(long, short, default_value = "workers.txt")]
    pub registry: PathBuf,
    /// Available memory to announce, in GB.
    #[arg(long, default_value_t = 1.0)]
    pub memory_gb: f64,
    /// Element type of the jobs this worker serves.
    #[arg(long, value_enum, default_value_t = ElementKind::Int)]
    pub element: ElementKind,
    /// Serve without announcing.
    #[arg(long)]
    pub no_announce: bool,
    /// The largest accepted request, in bytes. Also bounds the size of computed products.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// A JSON job file; flags override its values.
    #[arg(long, short)]
    pub job: Option<PathBuf>,
    /// Rows of A.
    #[arg(long)]
    pub rows: Option<usize>,
    /// Columns of A and rows of B.
    #[arg(long)]
    pub inner: Option<usize>,
    /// Columns of B.
    #[arg(long)]
    pub cols: Option<usize>,
    /// Number of row bands of A.
    #[arg(long)]
    pub horizontal: Option<usize>,
    /// Number of column slices per row band.
    #[arg(long)]
    pub vertical: Option<usize>,
    /// Number of workers to select; random if neither given here nor in the job file.
    #[arg(long, short = 'n')]
    pub workers: Option<usize>,
    /// Use these workers instead of selecting from the registry.
    #[arg(long = "worker", value_name = "ADDR")]
    pub worker_addrs: Vec<Address>,
    /// The worker registry.
    #[arg(long, short)]
    pub registry: Option<PathBuf>,
    /// How to check whether registered workers are up.
    #[arg(long, value_enum)]
    pub probe: Option<ProbeKind>,
    /// Element type.
    #[arg(long, value_enum)]
    pub element: Option<ElementKind>,
    /// Seed for operand generation, selection and redaction.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Hide operand entries from workers.
    #[arg(long)]
    pub redact: bool,
    /// Send every task instead of computing some locally.
    #[arg(long)]
    pub no_local: bool,
    /// Send one task at a time.
    #[arg(long)]
    pub sequential: bool,
    /// Give up on a task after this many failed exchanges.
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Timeout of a single exchange in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Print the product.
    #[arg(long)]
    pub print: bool,
}

impl DispatchArgs {
    /// Applies the flags on top of `spec`.
    pub fn apply(&self, mut spec: JobSpec) -> JobSpec {
        if let Some(rows) = self.rows {
            spec.rows = rows;
        }
        if let Some(inner) = self.inner {
            spec.inner = inner;
        }
        if let Some(cols) = self.cols {
            spec.cols = cols;
        }
        spec.layout = Layout::new(
            self.horizontal.unwrap_or(spec.layout.horizontal),
            self.vertical.unwrap_or(spec.layout.vertical),
        );
        spec.workers = self.workers.or(spec.workers);
        if let Some(registry) = &self.registry {
            spec.registry = registry.clone();
        }
        spec.probe = self.probe.unwrap_or(spec.probe);
        spec.element = self.element.unwrap_or(spec.element);
        spec.seed = self.seed.or(spec.seed);
        spec.dispatch.redact |= self.redact;
        if self.no_local {
            spec.dispatch.keep_local = false;
        }
        if self.sequential {
            spec.dispatch.max_in_flight = Some(1);
        }
        spec.dispatch.max_attempts = self.max_attempts.or(spec.dispatch.max_attempts);
        if let Some(timeout_ms) = self.timeout_ms {
            spec.dispatch.exchange_timeout_ms = timeout_ms;
        }
        spec
    }
}

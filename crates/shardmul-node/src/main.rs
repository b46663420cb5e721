//! Runs a shardmul worker or dispatches a job to registered workers.
use std::{fmt::Display, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use shardmul::{
    Matrix, Scalar,
    dispatch::Dispatcher,
    registry::{Registry, WorkerRecord},
    select::{BindProbe, ConnectProbe, select_workers},
    worker::Worker,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

use crate::{
    cli::{Cli, Command, DispatchArgs, WorkerArgs},
    job::{ElementKind, JobSpec, ProbeKind},
};

mod cli;
mod job;

/// Exit code of a job whose product differs from the locally computed one.
const EXIT_MISMATCH: u8 = 1;
/// Exit code of a job that could not be completed.
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("could not initialize tracing: {e:#}");
        return ExitCode::from(EXIT_ERROR);
    }
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Worker(args) => serve(args).await.map(|()| ExitCode::SUCCESS),
        Command::Dispatch(args) => dispatch(args).await,
    };
    outcome.unwrap_or_else(|e| {
        error!("{e:#}");
        ExitCode::from(EXIT_ERROR)
    })
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("SHARDMUL_LOG")
        .with_default_directive("shardmul=info".parse()?)
        .from_env_lossy()
        .add_directive("shardmul_node=info".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .init();

    Ok(())
}

async fn serve(args: WorkerArgs) -> anyhow::Result<()> {
    match args.element {
        ElementKind::Int => serve_elements::<i64>(args).await,
        ElementKind::Float => serve_elements::<f64>(args).await,
    }
}

async fn serve_elements<T: Scalar>(args: WorkerArgs) -> anyhow::Result<()> {
    let worker = Worker::<T>::bind(args.addr)
        .await
        .with_context(|| format!("unable to bind to {}", args.addr))?
        .with_max_frame_len(args.max_frame_len);
    let bound = worker
        .local_address()
        .context("unable to get local addr of socket")?;
    if !args.no_announce {
        let address = args.advertise.unwrap_or(bound);
        let registry = Registry::new(&args.registry);
        registry
            .announce(&WorkerRecord::describe(address, args.memory_gb))
            .await
            .with_context(|| format!("could not announce in '{}'", args.registry.display()))?;
    }
    worker.run().await.context("worker stopped accepting connections")
}

async fn dispatch(args: DispatchArgs) -> anyhow::Result<ExitCode> {
    let spec = match &args.job {
        Some(path) => JobSpec::load(path).await?,
        None => JobSpec::default(),
    };
    let spec = args.apply(spec);
    anyhow::ensure!(
        spec.min_value < spec.max_value,
        "value range {}..{} is empty",
        spec.min_value,
        spec.max_value
    );
    spec.layout.validate((spec.rows, spec.inner), (spec.inner, spec.cols))?;
    let mut rng = match spec.seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_os_rng(),
    };

    let workers = if args.worker_addrs.is_empty() {
        let registry = Registry::new(&spec.registry);
        match spec.probe {
            ProbeKind::Bind => select_workers(&registry, spec.workers, &BindProbe, &mut rng).await?,
            ProbeKind::Connect => {
                select_workers(&registry, spec.workers, &ConnectProbe::default(), &mut rng).await?
            }
        }
    } else {
        args.worker_addrs.clone()
    };

    let a = Matrix::<i64>::random(spec.rows, spec.inner, spec.min_value..spec.max_value, &mut rng);
    let b = Matrix::<i64>::random(spec.inner, spec.cols, spec.min_value..spec.max_value, &mut rng);
    let matches = match spec.element {
        ElementKind::Int => run_job(&spec, workers, a, b, args.print, &mut rng).await?,
        ElementKind::Float => {
            let (a, b) = (a.map(|&v| v as f64), b.map(|&v| v as f64));
            run_job(&spec, workers, a, b, args.print, &mut rng).await?
        }
    };
    Ok(if matches {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_MISMATCH)
    })
}

/// Runs the job and compares its product with the dense product.
async fn run_job<T: Scalar + Display>(
    spec: &JobSpec,
    workers: Vec<shardmul::Address>,
    a: Matrix<T>,
    b: Matrix<T>,
    print: bool,
    rng: &mut impl Rng,
) -> anyhow::Result<bool> {
    let dispatcher = Dispatcher::new(workers)?.with_options(spec.dispatch.clone());
    info!(
        workers = ?dispatcher.workers(),
        redact = dispatcher.options().redact,
        max_in_flight = ?dispatcher.options().max_in_flight,
        "dispatching {}x{} x {}x{}",
        a.rows(),
        a.cols(),
        b.rows(),
        b.cols()
    );
    let report = dispatcher.run_with_rng(&a, &b, spec.layout, rng).await?;
    let expected = a.multiply(&b)?;

    for (worker, score) in &report.execution.reliability {
        info!(%worker, score, "reliability");
    }
    if print {
        println!("{}", report.product);
    }
    let matches = report.product == expected;
    if matches {
        println!(
            "{}x{} product verified in {:?} ({} tasks, {} computed locally)",
            report.product.rows(),
            report.product.cols(),
            report.elapsed,
            spec.layout.tasks(),
            report.execution.local_tasks.len()
        );
    } else {
        error!("distributed product differs from the local product");
    }
    Ok(matches)
}

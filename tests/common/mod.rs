// The module is built separately for each integration test, so if some items
// are only used in one test but not the other, this will result in warnings
#![allow(dead_code)]

use std::{
    env,
    sync::{LazyLock, Mutex, MutexGuard},
};

use rand::{SeedableRng, rngs::StdRng};
use shardmul::{
    Address, Matrix,
    message::{ACKNOWLEDGEMENT, Reply},
    registry::{Registry, WorkerRecord},
    wire::{DEFAULT_MAX_FRAME_LEN, recv_frame, send_frame, send_msg},
    worker::Worker,
};
use tokio::net::TcpListener;
use tracing::{Instrument, info, info_span};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

static TEST_RNG: LazyLock<Mutex<StdRng>> = LazyLock::new(|| {
    let seed: u64 = if let Ok(var) = env::var("SHARDMUL_TEST_SEED") {
        var.parse().expect("SHARDMUL_TEST_SEED is invalid u64")
    } else {
        rand::random()
    };
    info!(seed, "testing seed");
    Mutex::new(StdRng::seed_from_u64(seed))
});

pub(crate) fn test_rng() -> MutexGuard<'static, StdRng> {
    TEST_RNG.lock().expect("TEST_RNG poisoned")
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .try_init();
}

/// Start `n` real workers and return the addresses at which they are reachable.
pub(crate) async fn start_workers(n: usize) -> Vec<Address> {
    let mut addrs = vec![];
    for i in 0..n {
        let worker = Worker::<i64>::bind("127.0.0.1:0").await.expect("bind");
        addrs.push(worker.local_address().expect("local address"));
        let span = info_span!("worker", worker = i);
        tokio::spawn(async move { worker.run().await.expect("worker crashed") }.instrument(span));
    }
    addrs
}

/// How a fake worker misbehaves.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// Acknowledges, then answers every request with `NoResult`.
    NoResult,
    /// Accepts and closes the connection without reading.
    Hangup,
    /// Answers with something other than the acknowledgement.
    BadAck,
    /// Acknowledges and then never replies.
    Silent,
}

/// Start a worker that fails every request in the given way.
pub(crate) async fn start_faulty_worker(fault: Fault) -> Address {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = Address::from(listener.local_addr().expect("local addr"));
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                if let Fault::Hangup = fault {
                    return;
                }
                if recv_frame(&mut stream, DEFAULT_MAX_FRAME_LEN).await.is_err() {
                    return;
                }
                match fault {
                    Fault::NoResult => {
                        let _ = send_frame(&mut stream, ACKNOWLEDGEMENT).await;
                        let _ = send_msg(&mut stream, &Reply::<i64>::NoResult).await;
                    }
                    Fault::BadAck => {
                        let _ = send_frame(&mut stream, b"NAK").await;
                    }
                    Fault::Silent => {
                        let _ = send_frame(&mut stream, ACKNOWLEDGEMENT).await;
                        std::future::pending::<()>().await;
                    }
                    Fault::Hangup => {}
                }
            });
        }
    });
    addr
}

/// An address nothing is listening on.
pub(crate) fn unreachable_address() -> Address {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    Address::from(listener.local_addr().expect("local addr"))
}

/// Writes a registry announcing `addrs` with the given capability and memory.
pub(crate) async fn write_registry(registry: &Registry, workers: &[(Address, u32, f64)]) {
    for (address, capability, memory_gb) in workers {
        let mut record = WorkerRecord::describe(address.clone(), *memory_gb);
        record.capability = *capability;
        registry.announce(&record).await.expect("announce");
    }
}

/// A random matrix with small entries.
pub(crate) fn random_matrix(rows: usize, cols: usize) -> Matrix<i64> {
    Matrix::random(rows, cols, -5..5, &mut *test_rng())
}

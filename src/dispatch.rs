//! Running a job against a set of workers.
//!
//! The [`Dispatcher`] keeps a FIFO of pending tasks and hands them to workers in round-robin
//! order, one connection per attempt. A task whose exchange fails is put back at the end of
//! the queue and the worker's reliability score drops; a task whose result is accepted moves
//! to the result table. Violations of the protocol are never retried: a worker that answers
//! with something other than the expected acknowledgement or result aborts the job.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::stream::{FuturesUnordered, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    channel::{Connector, TcpConnector, exchange},
    combine::{ResultTable, combine},
    error::{ConfigError, DataError, Error, ProtocolError},
    matrix::{Matrix, Scalar},
    message::{Operand, Reply, Request},
    overlay::{DEFAULT_REDACTION_PROBABILITY, PlaceholderBinding, Redactor},
    partition::{Layout, Task, partition},
    registry::Address,
    wire::{self, DEFAULT_MAX_FRAME_LEN},
};

/// Tuning knobs of a dispatch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    /// Upper bound for connecting, reading the acknowledgement and reading the reply, in
    /// milliseconds.
    pub exchange_timeout_ms: u64,
    /// How many exchanges may run at the same time. Defaults to the number of workers; `1`
    /// sends one task at a time.
    pub max_in_flight: Option<usize>,
    /// Compute every task whose index is a multiple of `workers + 1` locally instead of
    /// sending it.
    pub keep_local: bool,
    /// Hide operand entries from workers behind placeholders.
    pub redact: bool,
    /// The chance of each entry being hidden when redacting.
    pub redaction_probability: f64,
    /// Give up on a task after this many failed exchanges. Unbounded if absent.
    pub max_attempts: Option<u32>,
    /// Stop sending to a worker after this many failures in a row. `0` never retires workers.
    pub max_consecutive_failures: u32,
    /// The largest reply accepted from a worker, in bytes.
    pub max_frame_len: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: 30_000,
            max_in_flight: None,
            keep_local: true,
            redact: false,
            redaction_probability: DEFAULT_REDACTION_PROBABILITY,
            max_attempts: None,
            max_consecutive_failures: 8,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl DispatchOptions {
    /// The exchange timeout as a [`Duration`].
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

/// What a completed dispatch run produced.
#[derive(Debug, Clone)]
pub struct Execution<T> {
    /// One block per task, keyed by task index.
    pub table: ResultTable<T>,
    /// Successful minus failed exchanges, per worker.
    pub reliability: BTreeMap<Address, i64>,
    /// Number of exchanges per remotely computed task.
    pub attempts: BTreeMap<usize, u32>,
    /// Indices of the tasks computed by the dispatcher itself.
    pub local_tasks: Vec<usize>,
}

/// The outcome of [`Dispatcher::run`].
#[derive(Debug, Clone)]
pub struct JobReport<T> {
    /// `A × B`.
    pub product: Matrix<T>,
    /// How the tasks were executed.
    pub execution: Execution<T>,
    /// Wall-clock time from partitioning to the combined product.
    pub elapsed: Duration,
}

/// A task waiting for an accepted result.
struct PendingTask {
    expected_shape: (usize, usize),
    request: Arc<[u8]>,
    binding: Option<PlaceholderBinding>,
    attempts: u32,
}

#[derive(Debug, Default, Clone)]
struct WorkerHealth {
    score: i64,
    consecutive_failures: u32,
    retired: bool,
}

/// Sends the tasks of a job to a fixed list of workers.
#[derive(Debug, Clone)]
pub struct Dispatcher<C = TcpConnector> {
    workers: Vec<Address>,
    connector: C,
    options: DispatchOptions,
}

impl Dispatcher<TcpConnector> {
    /// A dispatcher connecting to `workers` over plain TCP.
    pub fn new(workers: Vec<Address>) -> Result<Self, ConfigError> {
        Self::with_connector(workers, TcpConnector)
    }
}

impl<C: Connector> Dispatcher<C> {
    /// A dispatcher opening its connections through `connector`.
    pub fn with_connector(workers: Vec<Address>, connector: C) -> Result<Self, ConfigError> {
        if workers.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        Ok(Self {
            workers,
            connector,
            options: DispatchOptions::default(),
        })
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// The workers in round-robin order.
    pub fn workers(&self) -> &[Address] {
        &self.workers
    }

    /// The options in use.
    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Partitions `a × b`, executes the tasks and combines the results.
    pub async fn run<T: Scalar>(
        &self,
        a: &Matrix<T>,
        b: &Matrix<T>,
        layout: Layout,
    ) -> Result<JobReport<T>, Error> {
        self.run_with_rng(a, b, layout, &mut ChaCha20Rng::from_os_rng())
            .await
    }

    /// Like [`Dispatcher::run`], drawing redaction coin flips from `rng`.
    pub async fn run_with_rng<T: Scalar, R: Rng>(
        &self,
        a: &Matrix<T>,
        b: &Matrix<T>,
        layout: Layout,
        rng: &mut R,
    ) -> Result<JobReport<T>, Error> {
        let start = Instant::now();
        let tasks = partition(a, b, layout)?;
        let execution = self.execute_with_rng(tasks, rng).await?;
        let product = combine(&execution.table, layout)?;
        let elapsed = start.elapsed();
        info!(?elapsed, shape = ?product.shape(), "job complete");
        Ok(JobReport {
            product,
            execution,
            elapsed,
        })
    }

    /// Executes `tasks` until every one of them has an accepted result.
    pub async fn execute<T: Scalar>(&self, tasks: Vec<Task<T>>) -> Result<Execution<T>, Error> {
        self.execute_with_rng(tasks, &mut ChaCha20Rng::from_os_rng())
            .await
    }

    /// Like [`Dispatcher::execute`], drawing redaction coin flips from `rng`.
    pub async fn execute_with_rng<T: Scalar, R: Rng>(
        &self,
        tasks: Vec<Task<T>>,
        rng: &mut R,
    ) -> Result<Execution<T>, Error> {
        let span = info_span!("dispatch", tasks = tasks.len(), workers = self.workers.len());
        self.drain(tasks, rng).instrument(span).await
    }

    async fn drain<T: Scalar, R: Rng>(
        &self,
        tasks: Vec<Task<T>>,
        rng: &mut R,
    ) -> Result<Execution<T>, Error> {
        let options = &self.options;
        let n = self.workers.len();
        let mut redactor =
            Redactor::with_rng(rng).with_probability(options.redaction_probability);
        let mut table = ResultTable::new();
        let mut local_tasks = vec![];
        let mut pending = HashMap::new();
        let mut queue = VecDeque::new();

        for task in tasks {
            if options.keep_local && task.index % (n + 1) == 0 {
                table.insert(task.index, task.a.multiply(&task.b)?);
                local_tasks.push(task.index);
                continue;
            }
            let expected_shape = (task.a.rows(), task.b.cols());
            let (a, binding) = if options.redact {
                let (symbolic, binding) = redactor.redact(&task.a);
                (Operand::Redacted(symbolic), Some(binding))
            } else {
                (Operand::Plain(task.a), None)
            };
            let request = wire::encode(&Request::Compute {
                index: task.index,
                a,
                b: task.b,
            })?;
            pending.insert(
                task.index,
                PendingTask {
                    expected_shape,
                    request: request.into(),
                    binding,
                    attempts: 0,
                },
            );
            queue.push_back(task.index);
        }
        debug!(
            local = local_tasks.len(),
            remote = queue.len(),
            placeholders = redactor.issued(),
            "tasks prepared"
        );

        let limit = options.max_in_flight.unwrap_or(n).max(1);
        let mut health = vec![WorkerHealth::default(); n];
        let mut attempts = BTreeMap::new();
        let mut cursor = 0;
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < limit {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                let Some(slot) = next_worker(&mut cursor, &health) else {
                    queue.push_front(index);
                    break;
                };
                let Some(task) = pending.get_mut(&index) else {
                    continue;
                };
                task.attempts += 1;
                debug!(
                    index,
                    worker = %self.workers[slot],
                    attempt = task.attempts,
                    "sending task"
                );
                in_flight.push(self.attempt::<T>(index, slot, Arc::clone(&task.request)));
            }

            let Some((index, slot, outcome)) = in_flight.next().await else {
                if queue.is_empty() {
                    break;
                }
                return Err(Error::NoWorkersReachable {
                    pending: queue.len(),
                });
            };
            let worker = &self.workers[slot];

            let failure = match outcome {
                Ok(Reply::Result { index: actual, block }) => {
                    if actual != index {
                        return Err(ProtocolError::IndexMismatch {
                            expected: index,
                            actual,
                        }
                        .into());
                    }
                    let Some(task) = pending.remove(&index) else {
                        continue;
                    };
                    let block = restore(&redactor, index, block, task.binding)?;
                    if block.shape() != task.expected_shape {
                        return Err(ProtocolError::ResultShape {
                            index,
                            expected: task.expected_shape,
                            actual: block.shape(),
                        }
                        .into());
                    }
                    table.insert(index, block);
                    attempts.insert(index, task.attempts);
                    let h = &mut health[slot];
                    h.score += 1;
                    h.consecutive_failures = 0;
                    debug!(index, %worker, "result accepted");
                    continue;
                }
                Ok(Reply::NoResult) => "worker returned no result".to_string(),
                Err(e) if e.is_transport() => e.to_string(),
                Err(e) => return Err(e),
            };

            warn!(index, %worker, "exchange failed, requeueing task: {failure}");
            let h = &mut health[slot];
            h.score -= 1;
            h.consecutive_failures += 1;
            if options.max_consecutive_failures > 0
                && h.consecutive_failures >= options.max_consecutive_failures
                && !h.retired
            {
                h.retired = true;
                warn!(%worker, failures = h.consecutive_failures, "retiring worker");
            }
            if let Some(task) = pending.get(&index)
                && options.max_attempts.is_some_and(|max| task.attempts >= max)
            {
                return Err(Error::TaskExhausted {
                    index,
                    attempts: task.attempts,
                });
            }
            queue.push_back(index);
        }

        let reliability = self
            .workers
            .iter()
            .cloned()
            .zip(health.iter().map(|h| h.score))
            .collect();
        info!(?reliability, "all tasks completed");
        Ok(Execution {
            table,
            reliability,
            attempts,
            local_tasks,
        })
    }

    /// One exchange with the worker in `slot`, bounded by the exchange timeout.
    async fn attempt<T: Scalar>(
        &self,
        index: usize,
        slot: usize,
        request: Arc<[u8]>,
    ) -> (usize, usize, Result<Reply<T>, Error>) {
        let addr = &self.workers[slot];
        let fut = exchange(&self.connector, addr, &request, self.options.max_frame_len);
        let outcome = match timeout(self.options.exchange_timeout(), fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "exchange timed out").into()),
        };
        (index, slot, outcome)
    }
}

/// Advances the round-robin cursor to the next worker still in rotation.
fn next_worker(cursor: &mut usize, health: &[WorkerHealth]) -> Option<usize> {
    for _ in 0..health.len() {
        let slot = *cursor % health.len();
        *cursor += 1;
        if !health[slot].retired {
            return Some(slot);
        }
    }
    None
}

/// Turns a returned block into numbers, substituting the task's placeholders.
fn restore<T: Scalar, R: Rng>(
    redactor: &Redactor<T, R>,
    index: usize,
    block: Operand<T>,
    binding: Option<PlaceholderBinding>,
) -> Result<Matrix<T>, Error> {
    match (block, binding) {
        (Operand::Plain(block), None) => Ok(block),
        (Operand::Plain(block), Some(binding)) if binding.is_empty() => Ok(block),
        (Operand::Plain(_), Some(_)) => Err(ProtocolError::UnexpectedPlainResult(index).into()),
        (Operand::Redacted(symbolic), Some(binding)) => Ok(redactor.resolve(binding, &symbolic)?),
        (Operand::Redacted(symbolic), None) => Ok(symbolic.try_map(|e| {
            e.as_constant().ok_or_else(|| {
                DataError::UnknownPlaceholder(e.placeholders().next().unwrap_or_default())
            })
        })?),
    }
}

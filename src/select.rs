//! Choosing the workers for a job.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use futures::future::join_all;
use rand::{Rng, seq::IndexedRandom};
use tokio::{
    net::{TcpSocket, TcpStream, lookup_host},
    time::timeout,
};
use tracing::{debug, info};

use crate::{
    error::ConfigError,
    message::Request,
    registry::{Address, Registry, WorkerRecord},
    wire::send_msg,
};

/// Decides whether a registered worker is currently listening.
pub trait LivenessProbe {
    /// Whether a listener is bound to `addr`.
    fn is_listening(&self, addr: &Address) -> impl Future<Output = bool> + Send;
}

/// Probes by trying to bind the advertised address locally.
///
/// A bind that fails because the address is in use (a worker on this host) or not available
/// (a worker on another host) counts as listening. This never touches the worker itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindProbe;

impl BindProbe {
    fn try_bind(addr: SocketAddr) -> io::Result<()> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)
    }
}

impl LivenessProbe for BindProbe {
    async fn is_listening(&self, addr: &Address) -> bool {
        let resolved = match lookup_host((addr.host(), addr.port())).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                debug!(worker = %addr, "cannot resolve worker address: {e}");
                None
            }
        };
        let Some(socket_addr) = resolved else {
            return false;
        };
        match Self::try_bind(socket_addr) {
            Ok(()) => false,
            Err(e) => matches!(
                e.kind(),
                io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable
            ),
        }
    }
}

/// Probes by connecting to the worker, sending [`Request::Probe`] and hanging up.
///
/// Workers drop such connections without a reply.
#[derive(Debug, Clone, Copy)]
pub struct ConnectProbe {
    /// How long to wait for the connection.
    pub timeout: Duration,
}

impl Default for ConnectProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

impl LivenessProbe for ConnectProbe {
    async fn is_listening(&self, addr: &Address) -> bool {
        let connect = TcpStream::connect((addr.host(), addr.port()));
        let Ok(Ok(mut stream)) = timeout(self.timeout, connect).await else {
            return false;
        };
        if let Err(e) = send_msg(&mut stream, &Request::<()>::Probe).await {
            debug!(worker = %addr, "could not send probe: {e}");
        }
        true
    }
}

/// Picks `count` of the `candidates`, which must be ordered newest announcement first.
///
/// If every candidate reports the same capability and memory the pick is a uniform random
/// sample. Otherwise candidates are ranked by memory if it differs between them, and by
/// capability if only that differs; ties keep their order.
pub fn choose<R: Rng>(
    mut candidates: Vec<WorkerRecord>,
    count: usize,
    rng: &mut R,
) -> Vec<Address> {
    let Some(first) = candidates.first() else {
        return vec![];
    };
    let same_capability = candidates.iter().all(|r| r.capability == first.capability);
    let same_memory = candidates.iter().all(|r| r.memory_gb == first.memory_gb);

    if same_capability && same_memory {
        return candidates
            .choose_multiple(rng, count)
            .map(|r| r.address.clone())
            .collect();
    }
    if same_memory {
        candidates.sort_by(|a, b| b.capability.cmp(&a.capability));
    } else {
        candidates.sort_by(|a, b| {
            b.memory_gb
                .total_cmp(&a.memory_gb)
                .then(b.capability.cmp(&a.capability))
        });
    }
    candidates
        .into_iter()
        .take(count)
        .map(|r| r.address)
        .collect()
}

/// Reads the registry, probes every worker and selects the ones to use.
///
/// Without a `desired` count a random number of workers between one and all live workers is
/// used.
pub async fn select_workers<P, R>(
    registry: &Registry,
    desired: Option<usize>,
    probe: &P,
    rng: &mut R,
) -> Result<Vec<Address>, ConfigError>
where
    P: LivenessProbe,
    R: Rng,
{
    let records = registry.latest().await?;
    let probes = join_all(records.iter().map(|r| probe.is_listening(&r.address))).await;
    let live: Vec<_> = records
        .into_iter()
        .zip(probes)
        .filter_map(|(record, listening)| {
            debug!(worker = %record.address, listening, "probed worker");
            listening.then_some(record)
        })
        .collect();
    if live.is_empty() {
        return Err(ConfigError::NoLiveWorkers);
    }
    let count = match desired {
        None => rng.random_range(1..=live.len()),
        Some(n) if (1..=live.len()).contains(&n) => n,
        Some(n) => {
            return Err(ConfigError::InvalidWorkerCount {
                requested: n,
                available: live.len(),
            });
        }
    };
    let selected = choose(live, count, rng);
    info!(
        workers = ?selected.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "selected workers"
    );
    Ok(selected)
}

//! The worker server.
//!
//! A worker accepts one request per connection, acknowledges it, multiplies the two blocks and
//! replies with the product. Connections that never send a compute request (liveness probes,
//! scanners, clients speaking another protocol) are closed without a reply.

use std::{io, marker::PhantomData, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, ToSocketAddrs},
    task::spawn_blocking,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    error::Error,
    matrix::Scalar,
    message::{Reply, Request},
    registry::Address,
    wire::{DEFAULT_MAX_FRAME_LEN, decode, recv_frame, send_ack, send_msg},
};

/// A bound worker computing with elements of type `T`.
#[derive(Debug)]
pub struct Worker<T> {
    listener: TcpListener,
    max_frame_len: usize,
    _element: PhantomData<fn() -> T>,
}

impl<T: Scalar> Worker<T> {
    /// Binds the worker to `addr`. Use port `0` to let the OS pick a free port.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            _element: PhantomData,
        })
    }

    /// Limits the size of accepted requests.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The address the worker is listening on.
    pub fn local_address(&self) -> io::Result<Address> {
        self.listener.local_addr().map(Address::from)
    }

    /// Serves connections until accepting fails.
    pub async fn run(self) -> io::Result<()> {
        info!("worker listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, "could not disable Nagle's algorithm: {e}");
            }
            let max_frame_len = self.max_frame_len;
            tokio::spawn(
                async move {
                    if let Err(e) = serve_connection::<T, _>(stream, max_frame_len).await {
                        warn!("dropping connection: {e}");
                    }
                }
                .instrument(connection_span(peer)),
            );
        }
    }
}

fn connection_span(peer: SocketAddr) -> tracing::Span {
    info_span!("connection", %peer)
}

/// Handles one connection: read a request, acknowledge it, compute and reply.
///
/// Probes and undecodable requests are logged and answered with nothing. Errors returned are
/// those of the connection itself, never of the computation: a product that cannot be
/// computed is answered with [`Reply::NoResult`].
pub async fn serve_connection<T, S>(mut stream: S, max_frame_len: usize) -> Result<(), Error>
where
    T: Scalar,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = match recv_frame(&mut stream, max_frame_len).await {
        Ok(payload) => payload,
        Err(Error::Transport(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("connection closed without a request, treating it as a probe");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let (index, a, b) = match decode::<Request<T>>(&payload) {
        Ok(Request::Compute { index, a, b }) => (index, a, b),
        Ok(Request::Probe) => {
            debug!("received probe");
            return Ok(());
        }
        Err(e) => {
            warn!("ignoring undecodable request of {} bytes: {e}", payload.len());
            return Ok(());
        }
    };
    send_ack(&mut stream).await?;
    debug!(
        index,
        a = ?a.shape(),
        b = ?b.shape(),
        redacted = a.is_redacted(),
        "computing block"
    );

    // The product has to fit in memory and in a reply frame.
    let max_len = max_frame_len / size_of::<T>().max(1);
    let reply = match spawn_blocking(move || a.multiply_within(&b, max_len)).await {
        Ok(Ok(block)) => Reply::Result { index, block },
        Ok(Err(e)) => {
            warn!(index, "cannot compute block: {e}");
            Reply::NoResult
        }
        Err(e) => {
            error!(index, "block computation panicked: {e}");
            Reply::NoResult
        }
    };
    send_msg(&mut stream, &reply).await?;
    debug!(index, "reply sent");
    Ok(())
}

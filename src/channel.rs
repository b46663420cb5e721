//! Connections from the dispatcher to workers.

use std::{future::Future, io};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::{Instrument, debug, debug_span};

use crate::{
    error::Error,
    matrix::Scalar,
    message::Reply,
    registry::Address,
    wire::{expect_ack, recv_msg, send_frame},
};

/// Opens byte streams to workers.
///
/// The dispatcher never touches sockets directly, so transport security can be layered in by
/// implementing this trait for an encrypting stream.
pub trait Connector {
    /// The stream type produced by a successful connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Opens a new stream to `addr`.
    fn connect(&self, addr: &Address) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: &Address) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((addr.host(), addr.port())).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Runs one request/acknowledgement/reply exchange on a fresh connection.
///
/// `request` is an already encoded [`crate::message::Request`]; the same bytes are resent
/// when a task is retried.
pub async fn exchange<C, T>(
    connector: &C,
    addr: &Address,
    request: &[u8],
    max_frame_len: usize,
) -> Result<Reply<T>, Error>
where
    C: Connector + ?Sized,
    T: Scalar,
{
    let span = debug_span!("exchange", worker = %addr, bytes = request.len());
    async {
        let mut stream = connector.connect(addr).await?;
        send_frame(&mut stream, request).await?;
        expect_ack(&mut stream).await?;
        debug!("request acknowledged");
        let reply = recv_msg(&mut stream, max_frame_len).await?;
        Ok(reply)
    }
    .instrument(span)
    .await
}

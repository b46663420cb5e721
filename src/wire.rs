//! Length-prefixed framing over byte streams.
//!
//! A frame is a 10-byte ASCII header holding the payload length in decimal, left-justified and
//! padded with spaces, followed by the payload itself:
//!
//! ```text
//! "3         ACK"
//! ```
//!
//! Frames are read exactly, never past their end, so several frames can follow each other on
//! the same stream.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Error, ProtocolError},
    message::ACKNOWLEDGEMENT,
};

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 10;

/// The largest payload a receiver accepts unless configured otherwise (1 GiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 30;

/// The largest length that fits into the header.
const MAX_ENCODABLE_LEN: u64 = 9_999_999_999;

/// Encodes `len` as a header.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN], ProtocolError> {
    if len as u64 > MAX_ENCODABLE_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_ENCODABLE_LEN as usize,
        });
    }
    let mut header = [b' '; HEADER_LEN];
    let digits = len.to_string();
    header[..digits.len()].copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Decodes a header, ignoring the padding.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<usize, ProtocolError> {
    let malformed = || ProtocolError::MalformedHeader(String::from_utf8_lossy(header).into_owned());
    let text = std::str::from_utf8(header).map_err(|_| malformed())?.trim_matches(' ');
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    text.parse().map_err(|_| malformed())
}

/// Writes `payload` as a single frame and flushes the stream.
pub async fn send_frame<W>(stream: &mut W, payload: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = encode_header(payload.len())?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one frame and returns its payload.
///
/// A stream that ends before the frame is complete, even before its first byte, fails with an
/// [`std::io::ErrorKind::UnexpectedEof`] transport error.
pub async fn recv_frame<R>(stream: &mut R, max_len: usize) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = parse_header(&header)?;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len }.into());
    }
    let mut payload = vec![0; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Serializes `msg` with bincode.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(msg).map_err(|e| ProtocolError::Encode(format!("{e:?}")))
}

/// Deserializes a bincode payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(bytes).map_err(|e| ProtocolError::Decode(format!("{e:?}")))
}

/// Serializes and sends a message as one frame.
pub async fn send_msg<W, T>(stream: &mut W, msg: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    send_frame(stream, &encode(msg)?).await
}

/// Receives one frame and deserializes it.
pub async fn recv_msg<R, T>(stream: &mut R, max_len: usize) -> Result<T, Error>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let payload = recv_frame(stream, max_len).await?;
    Ok(decode(&payload)?)
}

/// Sends the acknowledgement token.
pub async fn send_ack<W>(stream: &mut W) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    send_frame(stream, ACKNOWLEDGEMENT).await
}

/// Reads one frame and checks that it is the acknowledgement token.
pub async fn expect_ack<R>(stream: &mut R) -> Result<(), Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    // a reply sent without acknowledgement would be far larger than the token
    let frame = recv_frame(stream, HEADER_LEN).await.map_err(|e| match e {
        Error::Protocol(ProtocolError::FrameTooLarge { len, .. }) => {
            ProtocolError::InvalidAcknowledgement(format!("<{len} byte frame>")).into()
        }
        e => e,
    })?;
    if frame == ACKNOWLEDGEMENT {
        Ok(())
    } else {
        let token = String::from_utf8_lossy(&frame).into_owned();
        Err(ProtocolError::InvalidAcknowledgement(token).into())
    }
}

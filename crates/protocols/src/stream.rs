//! Typed send and receive over a framed [`Stream`].

use core::time::Duration;
use std::io::Error as IoError;

use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use reposwarm_network_primitives::stream::{CodecError, Stream};
use thiserror::Error;
use tokio::time::timeout;

/// Failures on an established stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The peer closed the stream.
    #[error("stream closed by peer")]
    Closed,

    /// No frame arrived in time.
    #[error("timed out waiting for peer")]
    Timeout,

    /// Framing failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A frame did not decode into the expected message.
    #[error("failed to decode message")]
    Decode(#[source] IoError),

    /// A message could not be encoded.
    #[error("failed to encode message")]
    Encode(#[source] IoError),
}

/// Sends one borsh-encoded message as a frame.
pub async fn send<T: BorshSerialize>(stream: &mut Stream, message: &T) -> Result<(), StreamError> {
    let bytes = borsh::to_vec(message).map_err(StreamError::Encode)?;

    send_raw(stream, Bytes::from(bytes)).await
}

/// Sends one raw frame.
pub async fn send_raw(stream: &mut Stream, frame: Bytes) -> Result<(), StreamError> {
    stream.send(frame).await.map_err(Into::into)
}

/// Receives one borsh-encoded message; `None` when the peer closed cleanly.
pub async fn recv<T: BorshDeserialize>(
    stream: &mut Stream,
    wait: Duration,
) -> Result<Option<T>, StreamError> {
    let Some(frame) = recv_raw(stream, wait).await? else {
        return Ok(None);
    };

    borsh::from_slice(&frame)
        .map(Some)
        .map_err(StreamError::Decode)
}

/// Receives one message, treating a closed stream as an error.
pub async fn expect<T: BorshDeserialize>(
    stream: &mut Stream,
    wait: Duration,
) -> Result<T, StreamError> {
    recv(stream, wait).await?.ok_or(StreamError::Closed)
}

/// Receives one raw frame; `None` when the peer closed cleanly.
pub async fn recv_raw(stream: &mut Stream, wait: Duration) -> Result<Option<Bytes>, StreamError> {
    let Some(frame) = timeout(wait, stream.next())
        .await
        .map_err(|_| StreamError::Timeout)?
    else {
        return Ok(None);
    };

    frame.map(Some).map_err(Into::into)
}

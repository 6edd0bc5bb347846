use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink as FuturesSink, SinkExt, Stream as FuturesStream, StreamExt};
use libp2p::{Stream as P2pStream, StreamProtocol};
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio_util::codec::Framed;
use tokio_util::compat::FuturesAsyncReadCompatExt;

mod codec;

use codec::MessageCodec;
pub use codec::CodecError;

pub const MAX_MESSAGE_SIZE: usize = 8 * 1_024 * 1_024;

/// Largest data payload a server puts in one chunk packet.
pub const CHUNK_PACKET_SIZE: usize = 256 * 1_024;

/// Largest number of ids a server puts in one manifest packet.
pub const MANIFEST_BATCH_SIZE: usize = 1_024;

pub const OBJECT_PROTOCOL: StreamProtocol = StreamProtocol::new("/reposwarm/object/1.0.0");
pub const CHUNK_PROTOCOL: StreamProtocol = StreamProtocol::new("/reposwarm/chunk/1.0.0");
pub const MANIFEST_PROTOCOL: StreamProtocol = StreamProtocol::new("/reposwarm/manifest/1.0.0");
pub const REPLICATION_PROTOCOL: StreamProtocol =
    StreamProtocol::new("/reposwarm/replication/1.0.0");

/// Any duplex byte pipe a [`Stream`] can be framed over.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A length-delimited message stream to a single peer.
pub struct Stream {
    inner: Framed<BufStream<Box<dyn RawStream>>, MessageCodec>,
}

impl Stream {
    #[must_use]
    pub fn new(stream: P2pStream) -> Self {
        Self::from_io(stream.compat())
    }

    /// Frames an arbitrary transport, e.g. an in-memory duplex pipe.
    #[must_use]
    pub fn from_io<T: RawStream>(io: T) -> Self {
        let io: Box<dyn RawStream> = Box::new(io);
        let stream = BufStream::new(io);
        let stream = Framed::new(stream, MessageCodec::new(MAX_MESSAGE_SIZE));
        Self { inner: stream }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

impl FuturesStream for Stream {
    type Item = Result<Bytes, CodecError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl FuturesSink<Bytes> for Stream {
    type Error = CodecError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready_unpin(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.inner.start_send_unpin(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_flush_unpin(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_close_unpin(cx)
    }
}

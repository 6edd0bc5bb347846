//! Chunk transfer: streamed, verified object content from the swarm.

use core::cmp::min;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result as EyreResult;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::{
    GetChunkRequest, GetChunkResponseHeader, GetChunkResponsePacket, ResponseStatus,
};
use reposwarm_network_primitives::stream::{Stream, CHUNK_PACKET_SIZE, CHUNK_PROTOCOL};
use reposwarm_primitives::hash::Hash;
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::repo::RepoId;
use reposwarm_store::StoreError;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pipeline::{dispatch, emit, Exchange, Job};
use super::{status_error, stream_error, IDLE_STREAM_TIMEOUT};
use crate::access::authorize;
use crate::error::{FetchError, ObjectFetchError};
use crate::pool::PeerConnection;
use crate::stream::{expect, recv, send};
use crate::{RepoRegistry, SwarmClient};

/// A piece of an object, or the marker that it arrived in full.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// Object the data belongs to.
    pub object_id: ObjectId,
    /// Content bytes, empty on the end marker.
    pub data: Bytes,
    /// Set exactly once per object, after its last data chunk.
    pub end: bool,
}

impl Chunk {
    fn data(object_id: ObjectId, data: Vec<u8>) -> Self {
        Self {
            object_id,
            data: Bytes::from(data),
            end: false,
        }
    }

    fn end(object_id: ObjectId) -> Self {
        Self {
            object_id,
            data: Bytes::new(),
            end: true,
        }
    }
}

/// An item of [`fetch_chunks`]: content, or the terminal failure of one
/// object.
pub type MaybeChunk = Result<Chunk, ObjectFetchError>;

/// Streams the content of every object in `object_ids`.
///
/// Data chunks are emitted as they arrive; each object ends with either an
/// end marker or an error, and the stream closes once all of them ended.
/// Every id goes to the network, even if it is present locally.
#[must_use]
pub fn fetch_chunks(
    client: &SwarmClient,
    token: &CancellationToken,
    repo_id: RepoId,
    object_ids: Vec<ObjectId>,
) -> ReceiverStream<MaybeChunk> {
    let exchange = ChunkExchange {
        client: client.clone(),
        repo_id: repo_id.clone(),
    };

    dispatch(client, token, repo_id, CHUNK_PROTOCOL, object_ids, exchange)
}

#[derive(Clone)]
struct ChunkExchange {
    client: SwarmClient,
    repo_id: RepoId,
}

#[async_trait]
impl Exchange for ChunkExchange {
    type Item = Chunk;

    async fn exchange(
        &self,
        conn: &mut PeerConnection,
        job: &mut Job,
        out: &mpsc::Sender<MaybeChunk>,
    ) -> Result<(), FetchError> {
        let peer_id = conn.peer_id;
        let object_id = job.object_id;
        let wait = self.client.config().request_timeout;

        let signature = self
            .client
            .oracle()
            .sign_hash(self.repo_id.as_bytes())
            .map_err(FetchError::Signing)?;

        let request = GetChunkRequest {
            repo_id: self.repo_id.clone(),
            chunk_id: object_id.to_vec(),
            signature,
        };

        send(&mut conn.stream, &request)
            .await
            .map_err(stream_error(peer_id))?;

        let header: GetChunkResponseHeader = expect(&mut conn.stream, wait)
            .await
            .map_err(stream_error(peer_id))?;

        if let Some(err) = status_error(header.status, peer_id) {
            return Err(err);
        }

        job.declared_size = Some(header.length);

        let mut hasher = object_id.is_chunk().then(Sha256::new);
        let mut received = 0_u64;

        loop {
            let packet: GetChunkResponsePacket = expect(&mut conn.stream, wait)
                .await
                .map_err(stream_error(peer_id))?;

            if !packet.data.is_empty() {
                received = received.saturating_add(packet.data.len() as u64);

                if received > header.length {
                    return Err(FetchError::Protocol {
                        peer_id,
                        message: format!(
                            "sent {received} bytes, announced {}",
                            header.length
                        ),
                    });
                }

                if let Some(hasher) = hasher.as_mut() {
                    hasher.update(&packet.data);
                }

                emit(out, Ok(Chunk::data(object_id, packet.data))).await?;
                job.emitted = true;
            }

            if packet.end {
                break;
            }
        }

        if received < header.length {
            return Err(FetchError::LengthMismatch {
                expected: header.length,
                received,
            });
        }

        if let Some(hasher) = hasher {
            let digest: [u8; 32] = hasher.finalize().into();
            let actual = ObjectId::from(Hash::from(digest));

            if actual != object_id {
                return Err(FetchError::DigestMismatch { actual });
            }
        }

        debug!(%peer_id, %object_id, bytes=received, "Fetched object content");

        emit(out, Ok(Chunk::end(object_id))).await?;
        job.emitted = true;

        Ok(())
    }
}

/// Serves chunk requests on one stream until the requester closes it.
pub async fn handle_chunk_stream(
    client: SwarmClient,
    registry: &dyn RepoRegistry,
    peer_id: PeerId,
    mut stream: Stream,
) -> EyreResult<()> {
    info!(%peer_id, "Serving chunk stream");

    while let Some(request) = recv::<GetChunkRequest>(&mut stream, IDLE_STREAM_TIMEOUT).await? {
        serve_chunk(&client, registry, peer_id, &mut stream, request).await?;
    }

    debug!(%peer_id, "Chunk stream closed by requester");

    Ok(())
}

async fn serve_chunk(
    client: &SwarmClient,
    registry: &dyn RepoRegistry,
    peer_id: PeerId,
    stream: &mut Stream,
    request: GetChunkRequest,
) -> EyreResult<()> {
    let repo_id = &request.repo_id;

    if let Err(status) = authorize(&**client.oracle(), peer_id, repo_id, &request.signature).await
    {
        return reject(stream, status).await;
    }

    let object_id = match ObjectId::try_from(request.chunk_id.as_slice()) {
        Ok(object_id) => object_id,
        Err(err) => {
            warn!(%peer_id, %repo_id, %err, "Rejecting chunk request");
            return reject(stream, ResponseStatus::NotFound).await;
        }
    };

    let Some(repo) = registry.repo(repo_id) else {
        debug!(%peer_id, %repo_id, "Chunk requested for unknown repository");
        return reject(stream, ResponseStatus::NotFound).await;
    };

    let mut object = match repo.open_object(&object_id).await {
        Ok(object) => object,
        Err(StoreError::NotFound(_)) => {
            debug!(%peer_id, %repo_id, %object_id, "Chunk requested for missing object");
            return reject(stream, ResponseStatus::NotFound).await;
        }
        Err(err) => {
            warn!(%peer_id, %repo_id, %object_id, %err, "Failed to open object");
            return reject(stream, ResponseStatus::NotFound).await;
        }
    };

    send(
        stream,
        &GetChunkResponseHeader {
            status: ResponseStatus::Ok,
            length: object.len,
        },
    )
    .await?;

    let mut remaining = object.len;
    let mut buffer = vec![0_u8; CHUNK_PACKET_SIZE];

    while remaining > 0 {
        let want = min(remaining, CHUNK_PACKET_SIZE as u64) as usize;
        let read = object.reader.read(&mut buffer[..want]).await?;

        if read == 0 {
            warn!(%peer_id, %repo_id, %object_id, remaining, "Object shorter than recorded");
            break;
        }

        remaining -= read as u64;

        send(
            stream,
            &GetChunkResponsePacket {
                data: buffer[..read].to_vec(),
                end: false,
            },
        )
        .await?;
    }

    send(
        stream,
        &GetChunkResponsePacket {
            data: Vec::new(),
            end: true,
        },
    )
    .await?;

    debug!(%peer_id, %repo_id, %object_id, bytes=object.len, "Served object content");

    Ok(())
}

async fn reject(stream: &mut Stream, status: ResponseStatus) -> EyreResult<()> {
    send(stream, &GetChunkResponseHeader { status, length: 0 }).await?;

    Ok(())
}

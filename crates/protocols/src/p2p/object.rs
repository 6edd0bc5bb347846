//! Whole-object transfer, used for legacy objects that carry a type.

use async_trait::async_trait;
use bytes::Bytes;
use eyre::{bail, Result as EyreResult};
use futures_util::StreamExt;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::{
    GetObjectRequestSigned, GetObjectResponse, ResponseStatus,
};
use reposwarm_network_primitives::stream::{Stream, CHUNK_PACKET_SIZE, OBJECT_PROTOCOL};
use reposwarm_primitives::object::{ObjectId, ObjectType};
use reposwarm_primitives::repo::RepoId;
use reposwarm_store::StoreError;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pipeline::{dispatch, emit, Exchange, Job, Output};
use super::{status_error, stream_error, IDLE_STREAM_TIMEOUT};
use crate::access::authorize;
use crate::error::{FetchError, ObjectFetchError};
use crate::pool::PeerConnection;
use crate::stream::{expect, recv, recv_raw, send, send_raw};
use crate::{RepoRegistry, SwarmClient};

/// A complete object as received from a provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedObject {
    /// Requested id.
    pub object_id: ObjectId,
    /// Type announced by the provider.
    pub object_type: ObjectType,
    /// Full content.
    pub data: Bytes,
}

/// Fetches several whole objects; one output per requested id.
#[must_use]
pub fn fetch_objects(
    client: &SwarmClient,
    token: &CancellationToken,
    repo_id: RepoId,
    object_ids: Vec<ObjectId>,
) -> ReceiverStream<Result<FetchedObject, ObjectFetchError>> {
    let exchange = ObjectExchange {
        client: client.clone(),
        repo_id: repo_id.clone(),
    };

    dispatch(client, token, repo_id, OBJECT_PROTOCOL, object_ids, exchange)
}

/// Fetches a single object from whichever provider has it.
pub async fn fetch_object(
    client: &SwarmClient,
    token: &CancellationToken,
    repo_id: RepoId,
    object_id: ObjectId,
) -> Result<FetchedObject, ObjectFetchError> {
    let client = client
        .clone()
        .with_config(client.config().with_max_concurrent_peers(1));

    let mut objects = fetch_objects(&client, token, repo_id, vec![object_id]);

    match objects.next().await {
        Some(result) => result,
        None => Err(ObjectFetchError {
            object_id,
            source: FetchError::Cancelled,
        }),
    }
}

#[derive(Clone)]
struct ObjectExchange {
    client: SwarmClient,
    repo_id: RepoId,
}

#[async_trait]
impl Exchange for ObjectExchange {
    type Item = FetchedObject;

    async fn exchange(
        &self,
        conn: &mut PeerConnection,
        job: &mut Job,
        out: &mpsc::Sender<Output<FetchedObject>>,
    ) -> Result<(), FetchError> {
        let peer_id = conn.peer_id;
        let object_id = job.object_id;
        let wait = self.client.config().request_timeout;

        let signature = self
            .client
            .oracle()
            .sign_hash(self.repo_id.as_bytes())
            .map_err(FetchError::Signing)?;

        let request = GetObjectRequestSigned {
            repo_id: self.repo_id.clone(),
            object_id: object_id.to_vec(),
            signature,
        };

        send(&mut conn.stream, &request)
            .await
            .map_err(stream_error(peer_id))?;

        let response: GetObjectResponse = expect(&mut conn.stream, wait)
            .await
            .map_err(stream_error(peer_id))?;

        if let Some(err) = status_error(response.status, peer_id) {
            return Err(err);
        }

        let Some(object_type) = response.object_type else {
            return Err(FetchError::Protocol {
                peer_id,
                message: "object response without a type".to_owned(),
            });
        };

        let expected = response.object_len;
        job.declared_size = Some(expected);

        let mut data = Vec::with_capacity(expected.min(CHUNK_PACKET_SIZE as u64) as usize);

        while (data.len() as u64) < expected {
            let Some(frame) = recv_raw(&mut conn.stream, wait)
                .await
                .map_err(stream_error(peer_id))?
            else {
                break;
            };

            data.extend_from_slice(&frame);
        }

        let received = data.len() as u64;

        if received < expected {
            return Err(FetchError::LengthMismatch { expected, received });
        }

        if received > expected {
            return Err(FetchError::Protocol {
                peer_id,
                message: format!("sent {received} bytes, announced {expected}"),
            });
        }

        if object_id.is_chunk() {
            let actual = ObjectId::chunk_of(&data);

            if actual != object_id {
                return Err(FetchError::DigestMismatch { actual });
            }
        }

        debug!(%peer_id, %object_id, ?object_type, bytes=received, "Fetched object");

        let object = FetchedObject {
            object_id,
            object_type,
            data: Bytes::from(data),
        };

        emit(out, Ok(object)).await?;
        job.emitted = true;

        Ok(())
    }
}

/// Serves whole-object requests on one stream until the requester closes it.
pub async fn handle_object_stream(
    client: SwarmClient,
    registry: &dyn RepoRegistry,
    peer_id: PeerId,
    mut stream: Stream,
) -> EyreResult<()> {
    info!(%peer_id, "Serving object stream");

    while let Some(request) =
        recv::<GetObjectRequestSigned>(&mut stream, IDLE_STREAM_TIMEOUT).await?
    {
        serve_object(&client, registry, peer_id, &mut stream, request).await?;
    }

    Ok(())
}

async fn serve_object(
    client: &SwarmClient,
    registry: &dyn RepoRegistry,
    peer_id: PeerId,
    stream: &mut Stream,
    request: GetObjectRequestSigned,
) -> EyreResult<()> {
    let repo_id = &request.repo_id;

    if let Err(status) = authorize(&**client.oracle(), peer_id, repo_id, &request.signature).await
    {
        return reject(stream, status).await;
    }

    let Ok(object_id) = ObjectId::try_from(request.object_id.as_slice()) else {
        warn!(%peer_id, %repo_id, len=request.object_id.len(), "Rejecting object request with bad id");
        return reject(stream, ResponseStatus::NotFound).await;
    };

    let Some(repo) = registry.repo(repo_id) else {
        return reject(stream, ResponseStatus::NotFound).await;
    };

    let mut object = match repo.open_object(&object_id).await {
        Ok(object) => object,
        Err(StoreError::NotFound(_)) => return reject(stream, ResponseStatus::NotFound).await,
        Err(err) => {
            warn!(%peer_id, %repo_id, %object_id, %err, "Failed to open object");
            return reject(stream, ResponseStatus::NotFound).await;
        }
    };

    send(
        stream,
        &GetObjectResponse {
            status: ResponseStatus::Ok,
            object_type: Some(object.object_type),
            object_len: object.len,
        },
    )
    .await?;

    let mut remaining = object.len;
    let mut buffer = vec![0_u8; CHUNK_PACKET_SIZE];

    while remaining > 0 {
        let want = remaining.min(CHUNK_PACKET_SIZE as u64) as usize;
        let read = object.reader.read(&mut buffer[..want]).await?;

        if read == 0 {
            // The requester can only notice a short object when the stream ends.
            bail!("object {object_id} is {remaining} bytes shorter than recorded");
        }

        remaining -= read as u64;

        send_raw(stream, Bytes::copy_from_slice(&buffer[..read])).await?;
    }

    debug!(%peer_id, %repo_id, %object_id, bytes=object.len, "Served object");

    Ok(())
}

async fn reject(stream: &mut Stream, status: ResponseStatus) -> EyreResult<()> {
    let response = GetObjectResponse {
        status,
        object_type: None,
        object_len: 0,
    };

    send(stream, &response).await?;

    Ok(())
}

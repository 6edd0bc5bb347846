//! Object listings: which ids a peer holds for a repository.

use eyre::Result as EyreResult;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::{
    GetManifestRequest, GetManifestResponseHeader, ManifestPacket, ResponseStatus,
};
use reposwarm_network_primitives::stream::{Stream, MANIFEST_BATCH_SIZE, MANIFEST_PROTOCOL};
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::repo::RepoId;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{status_error, stream_error};
use crate::access::authorize;
use crate::error::FetchError;
use crate::stream::{expect, recv, send};
use crate::{RepoRegistry, SwarmClient};

/// Asks `peer_id` for every object id it stores for `repo_id`.
pub async fn fetch_manifest(
    client: &SwarmClient,
    token: &CancellationToken,
    peer_id: PeerId,
    repo_id: &RepoId,
) -> Result<Vec<ObjectId>, FetchError> {
    select! {
        biased;
        () = token.cancelled() => Err(FetchError::Cancelled),
        result = request_manifest(client, peer_id, repo_id) => result,
    }
}

async fn request_manifest(
    client: &SwarmClient,
    peer_id: PeerId,
    repo_id: &RepoId,
) -> Result<Vec<ObjectId>, FetchError> {
    let wait = client.config().request_timeout;

    let mut stream = client
        .host()
        .open_stream(peer_id, MANIFEST_PROTOCOL)
        .await
        .map_err(|err| FetchError::Dial {
            peer_id,
            message: err.to_string(),
        })?;

    let signature = client
        .oracle()
        .sign_hash(repo_id.as_bytes())
        .map_err(FetchError::Signing)?;

    let request = GetManifestRequest {
        repo_id: repo_id.clone(),
        signature,
    };

    send(&mut stream, &request)
        .await
        .map_err(stream_error(peer_id))?;

    let header: GetManifestResponseHeader = expect(&mut stream, wait)
        .await
        .map_err(stream_error(peer_id))?;

    if let Some(err) = status_error(header.status, peer_id) {
        return Err(err);
    }

    let mut object_ids = Vec::new();

    loop {
        let packet: ManifestPacket = expect(&mut stream, wait)
            .await
            .map_err(stream_error(peer_id))?;

        for raw in packet.object_ids {
            let object_id = ObjectId::try_from(raw).map_err(|err| FetchError::Protocol {
                peer_id,
                message: err.to_string(),
            })?;

            object_ids.push(object_id);
        }

        if packet.end {
            break;
        }
    }

    let received = object_ids.len() as u64;

    if received != header.count {
        return Err(FetchError::LengthMismatch {
            expected: header.count,
            received,
        });
    }

    debug!(%peer_id, %repo_id, count=received, "Fetched manifest");

    Ok(object_ids)
}

/// Answers a single manifest request.
pub async fn handle_manifest_stream(
    client: SwarmClient,
    registry: &dyn RepoRegistry,
    peer_id: PeerId,
    mut stream: Stream,
) -> EyreResult<()> {
    let wait = client.config().request_timeout;

    let Some(request) = recv::<GetManifestRequest>(&mut stream, wait).await? else {
        debug!(%peer_id, "Manifest stream closed before a request");
        return Ok(());
    };

    let repo_id = &request.repo_id;

    info!(%peer_id, %repo_id, "Serving manifest");

    if let Err(status) = authorize(&**client.oracle(), peer_id, repo_id, &request.signature).await
    {
        return reject(&mut stream, status).await;
    }

    let Some(repo) = registry.repo(repo_id) else {
        return reject(&mut stream, ResponseStatus::NotFound).await;
    };

    let object_ids = match repo.object_ids().await {
        Ok(object_ids) => object_ids,
        Err(err) => {
            warn!(%peer_id, %repo_id, %err, "Failed to list objects");
            return reject(&mut stream, ResponseStatus::NotFound).await;
        }
    };

    let header = GetManifestResponseHeader {
        status: ResponseStatus::Ok,
        count: object_ids.len() as u64,
    };

    send(&mut stream, &header).await?;

    let mut batches = object_ids.chunks(MANIFEST_BATCH_SIZE).peekable();

    if batches.peek().is_none() {
        send(
            &mut stream,
            &ManifestPacket {
                object_ids: Vec::new(),
                end: true,
            },
        )
        .await?;
    }

    while let Some(batch) = batches.next() {
        let packet = ManifestPacket {
            object_ids: batch.iter().map(ObjectId::to_vec).collect(),
            end: batches.peek().is_none(),
        };

        send(&mut stream, &packet).await?;
    }

    Ok(())
}

async fn reject(stream: &mut Stream, status: ResponseStatus) -> EyreResult<()> {
    send(stream, &GetManifestResponseHeader { status, count: 0 }).await?;

    Ok(())
}

//! Pulls a repository from the peer that asked us to replicate it.

use core::fmt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::StreamExt;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::{ErrorKind, Progress};
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::repo::RepoId;
use reposwarm_store::{ObjectStore, StoreError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, ObjectFetchError};
use crate::p2p::chunk::fetch_chunks;
use crate::p2p::manifest::fetch_manifest;
use crate::p2p::object::fetch_objects;
use crate::{RepoRegistry, SwarmClient};

/// Why a replication job stopped early.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplicationError {
    /// The local checkout could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The requester's object list could not be fetched.
    #[error("failed to fetch manifest")]
    Manifest(#[source] FetchError),

    /// An object could not be fetched.
    #[error(transparent)]
    Fetch(#[from] ObjectFetchError),

    /// The job was cancelled or the requester went away.
    #[error("replication cancelled")]
    Cancelled,
}

impl ReplicationError {
    /// The error kind reported in the final progress event.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_) => ErrorKind::Storage,
            Self::Manifest(err) => err.kind(),
            Self::Fetch(err) => err.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Runs replication jobs into local checkouts.
#[derive(Clone)]
pub struct Replicator {
    client: SwarmClient,
    registry: Arc<dyn RepoRegistry>,
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl Replicator {
    /// A replicator fetching through `client` into `registry`'s checkouts.
    #[must_use]
    pub fn new(client: SwarmClient, registry: Arc<dyn RepoRegistry>) -> Self {
        Self { client, registry }
    }

    /// Copies every object `requester` has for `repo_id` that we lack.
    ///
    /// Reports `Progress{current: stored, total: missing}` after each stored
    /// object, then one terminal event: `done`, or the error that ended the
    /// job.
    pub async fn replicate(
        &self,
        token: &CancellationToken,
        requester: PeerId,
        repo_id: RepoId,
        progress: mpsc::Sender<Progress>,
    ) {
        info!(%requester, %repo_id, "Starting replication");

        let last = match self.run(token, requester, &repo_id, &progress).await {
            Ok(stored) => {
                info!(%requester, %repo_id, stored, "Replication finished");
                self.registry.replicated(&repo_id).await;
                Progress::done()
            }
            Err(err) => {
                warn!(%requester, %repo_id, %err, "Replication failed");
                Progress::failed(err.kind(), err.to_string())
            }
        };

        let _ignored = progress.send(last).await;
    }

    async fn run(
        &self,
        token: &CancellationToken,
        requester: PeerId,
        repo_id: &RepoId,
        progress: &mpsc::Sender<Progress>,
    ) -> Result<u64, ReplicationError> {
        let store = self.registry.ensure_local_checkout(repo_id).await?;

        let manifest = fetch_manifest(&self.client, token, requester, repo_id)
            .await
            .map_err(ReplicationError::Manifest)?;

        let missing = missing_objects(&*store, manifest).await?;

        let total = missing.len() as u64;
        let mut report = Reporter {
            progress,
            stored: 0,
            total,
        };

        debug!(%repo_id, missing=total, "Computed missing objects");

        report.send().await?;

        let (chunk_ids, object_ids): (Vec<_>, Vec<_>) =
            missing.into_iter().partition(ObjectId::is_chunk);

        if !chunk_ids.is_empty() {
            let mut partial: HashMap<ObjectId, Vec<u8>> = HashMap::new();
            let mut chunks = fetch_chunks(&self.client, token, repo_id.clone(), chunk_ids);

            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;

                if !chunk.end {
                    partial
                        .entry(chunk.object_id)
                        .or_default()
                        .extend_from_slice(&chunk.data);
                    continue;
                }

                let data = partial.remove(&chunk.object_id).unwrap_or_default();

                store.put_chunk(&chunk.object_id, &data).await?;
                report.stored().await?;
            }
        }

        if !object_ids.is_empty() {
            let mut objects = fetch_objects(&self.client, token, repo_id.clone(), object_ids);

            while let Some(object) = objects.next().await {
                let object = object?;

                store
                    .put_object(&object.object_id, object.object_type, &object.data)
                    .await?;
                report.stored().await?;
            }
        }

        if token.is_cancelled() || report.stored < total {
            return Err(ReplicationError::Cancelled);
        }

        Ok(report.stored)
    }
}

async fn missing_objects(
    store: &dyn ObjectStore,
    manifest: Vec<ObjectId>,
) -> Result<Vec<ObjectId>, StoreError> {
    let mut seen = HashSet::new();
    let mut missing = Vec::new();

    for object_id in manifest {
        if !seen.insert(object_id) {
            continue;
        }

        if !store.has_object(&object_id).await? {
            missing.push(object_id);
        }
    }

    Ok(missing)
}

struct Reporter<'a> {
    progress: &'a mpsc::Sender<Progress>,
    stored: u64,
    total: u64,
}

impl Reporter<'_> {
    async fn send(&self) -> Result<(), ReplicationError> {
        self.progress
            .send(Progress::new(self.stored, self.total))
            .await
            .map_err(|_| ReplicationError::Cancelled)
    }

    async fn stored(&mut self) -> Result<(), ReplicationError> {
        self.stored += 1;
        self.send().await
    }
}

//! Replication requests: ask every replicator of a repository to pull it
//! and fold their progress into a single stream.

use std::collections::HashSet;
use std::sync::Arc;

use eyre::Result as EyreResult;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::{ErrorKind, Progress, ReplicationRequest};
use reposwarm_network_primitives::stream::{Stream, REPLICATION_PROTOCOL};
use reposwarm_primitives::repo::{ContentId, RepoId};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio::{pin, select, spawn};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream_error;
use crate::error::FetchError;
use crate::replicator::Replicator;
use crate::stream::{recv, send};
use crate::{RepoRegistry, SwarmClient};

const PROGRESS_CAPACITY: usize = 16;

/// Asks the repository's replicators to replicate `repo_id`.
///
/// The returned stream reports the best progress any replicator made so far,
/// never going backwards, and ends with exactly one terminal event: `done`
/// as soon as one replicator finished, or a single error when none did.
#[must_use]
pub fn request_replication(
    client: &SwarmClient,
    token: &CancellationToken,
    repo_id: RepoId,
) -> ReceiverStream<Progress> {
    let (out, receiver) = mpsc::channel(PROGRESS_CAPACITY);

    let aggregator = Aggregator {
        client: client.clone(),
        token: token.clone(),
        repo_id,
        out,
    };

    drop(spawn(aggregator.run()));

    ReceiverStream::new(receiver)
}

enum Outcome {
    Replicated(PeerId),
    Cancelled,
    AllFailed,
}

struct Aggregator {
    client: SwarmClient,
    token: CancellationToken,
    repo_id: RepoId,
    out: mpsc::Sender<Progress>,
}

impl Aggregator {
    async fn run(self) {
        let peers = self.discover().await;

        if self.token.is_cancelled() {
            let _ignored = self.out.send(cancelled()).await;
            return;
        }

        if peers.is_empty() {
            info!(repo_id=%self.repo_id, "No replicators found");
            let _ignored = self.out.send(Progress::no_replicators()).await;
            return;
        }

        info!(repo_id=%self.repo_id, replicators=peers.len(), "Requesting replication");

        let work = self.token.child_token();
        let (events, mut received) = mpsc::channel(PROGRESS_CAPACITY);
        let mut tasks = JoinSet::new();

        for peer_id in peers {
            let request = PeerRequest {
                client: self.client.clone(),
                token: work.clone(),
                peer_id,
                repo_id: self.repo_id.clone(),
                events: events.clone(),
            };

            drop(tasks.spawn(request.run()));
        }

        drop(events);

        let mut best = 0;

        let outcome = loop {
            let event = select! {
                biased;
                () = self.token.cancelled() => break Outcome::Cancelled,
                event = received.recv() => event,
            };

            let Some((peer_id, progress)) = event else {
                break Outcome::AllFailed;
            };

            if progress.done {
                break Outcome::Replicated(peer_id);
            }

            if let Some(error) = progress.error {
                warn!(%peer_id, repo_id=%self.repo_id, kind=%error.kind, message=%error.message, "Replicator failed");
                continue;
            }

            let percent = progress.percent();

            if percent > best {
                best = percent;

                if self.out.send(Progress::new(best, 100)).await.is_err() {
                    debug!(repo_id=%self.repo_id, "Progress consumer went away");
                    break Outcome::Cancelled;
                }
            }
        };

        work.cancel();
        drop(received);

        while tasks.join_next().await.is_some() {}

        let last = match outcome {
            Outcome::Replicated(peer_id) => {
                info!(%peer_id, repo_id=%self.repo_id, "Repository replicated");
                Progress::done()
            }
            Outcome::Cancelled => cancelled(),
            Outcome::AllFailed => {
                warn!(repo_id=%self.repo_id, "Every replicator failed");
                Progress::all_replicators_failed()
            }
        };

        let _ignored = self.out.send(last).await;
    }

    /// Up to `replication_fanout` distinct replicators other than us.
    async fn discover(&self) -> Vec<PeerId> {
        let config = self.client.config();
        let host = self.client.host();
        let fanout = config.replication_fanout.max(1);
        let local_peer_id = host.local_peer_id();
        let key = ContentId::for_replicator(&self.repo_id);

        let deadline = sleep(config.discovery_timeout);
        pin!(deadline);

        let lookup = select! {
            biased;
            () = self.token.cancelled() => return Vec::new(),
            () = &mut deadline => return Vec::new(),
            lookup = host.find_providers(key, fanout) => lookup,
        };

        let mut providers = match lookup {
            Ok(providers) => providers,
            Err(err) => {
                warn!(repo_id=%self.repo_id, %err, "Failed to look up replicators");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut peers = Vec::new();

        while peers.len() < fanout {
            let next = select! {
                biased;
                () = self.token.cancelled() => break,
                () = &mut deadline => break,
                next = providers.recv() => next,
            };

            let Some(peer_id) = next else {
                break;
            };

            if peer_id != local_peer_id && seen.insert(peer_id) {
                peers.push(peer_id);
            }
        }

        peers
    }
}

fn cancelled() -> Progress {
    Progress::failed(ErrorKind::Cancelled, "replication request cancelled")
}

/// One replicator's side of the fan-out.
struct PeerRequest {
    client: SwarmClient,
    token: CancellationToken,
    peer_id: PeerId,
    repo_id: RepoId,
    events: mpsc::Sender<(PeerId, Progress)>,
}

impl PeerRequest {
    async fn run(self) {
        let result = select! {
            biased;
            () = self.token.cancelled() => return,
            result = self.stream_progress() => result,
        };

        if let Err(err) = result {
            debug!(peer_id=%self.peer_id, repo_id=%self.repo_id, %err, "Replication request failed");

            let failed = Progress::failed(err.kind(), err.to_string());
            let _ignored = self.events.send((self.peer_id, failed)).await;
        }
    }

    async fn stream_progress(&self) -> Result<(), FetchError> {
        let peer_id = self.peer_id;
        let idle = self.client.config().replication_idle_timeout;

        let mut stream = self
            .client
            .host()
            .open_stream(peer_id, REPLICATION_PROTOCOL)
            .await
            .map_err(|err| FetchError::Dial {
                peer_id,
                message: err.to_string(),
            })?;

        let request = ReplicationRequest {
            repo_id: self.repo_id.clone(),
        };

        send(&mut stream, &request)
            .await
            .map_err(stream_error(peer_id))?;

        loop {
            let Some(progress) = recv::<Progress>(&mut stream, idle)
                .await
                .map_err(stream_error(peer_id))?
            else {
                return Err(FetchError::Protocol {
                    peer_id,
                    message: "progress stream ended before completion".to_owned(),
                });
            };

            let terminal = progress.is_terminal();

            if self.events.send((peer_id, progress)).await.is_err() || terminal {
                return Ok(());
            }
        }
    }
}

/// Serves one replication request: runs a replication job against the
/// requester and streams its progress back.
pub async fn handle_replication_stream(
    client: SwarmClient,
    registry: Arc<dyn RepoRegistry>,
    token: CancellationToken,
    peer_id: PeerId,
    mut stream: Stream,
) -> EyreResult<()> {
    let wait = client.config().request_timeout;

    let Some(request) = recv::<ReplicationRequest>(&mut stream, wait).await? else {
        return Ok(());
    };

    let repo_id = request.repo_id;

    if !registry.is_replicating(&repo_id) {
        info!(%peer_id, %repo_id, "Declining replication of unreplicated repository");

        let declined = Progress::failed(
            ErrorKind::NotReplicating,
            format!("not replicating repo {repo_id}"),
        );

        send(&mut stream, &declined).await?;

        return Ok(());
    }

    info!(%peer_id, %repo_id, "Accepted replication request");

    let job = token.child_token();
    let _guard = job.clone().drop_guard();

    let (progress, mut updates) = mpsc::channel(PROGRESS_CAPACITY);
    let replicator = Replicator::new(client, registry);

    let task = spawn({
        let job = job.clone();
        let repo_id = repo_id.clone();
        async move { replicator.replicate(&job, peer_id, repo_id, progress).await }
    });

    while let Some(update) = updates.recv().await {
        if let Err(err) = send(&mut stream, &update).await {
            warn!(%peer_id, %repo_id, %err, "Requester went away, cancelling replication");
            job.cancel();
            break;
        }
    }

    drop(updates);
    task.await?;

    Ok(())
}

use core::time::Duration;
use std::collections::BTreeSet;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{bail, Result as EyreResult, WrapErr};
use libp2p::identity::Keypair;
use libp2p::PeerId;
use reposwarm_config::ConfigFile;
use reposwarm_network::client::NetworkClient;
use reposwarm_network::config::NetworkConfig;
use reposwarm_network::types::NetworkEvent;
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::progress::Progress;
use reposwarm_primitives::repo::{ContentId, RepoId};
use reposwarm_protocols::p2p::chunk::{fetch_chunks, MaybeChunk};
use reposwarm_protocols::p2p::object::{fetch_object, FetchedObject};
use reposwarm_protocols::p2p::replication::request_replication;
use reposwarm_protocols::{ObjectFetchError, SwarmClient, SwarmConfig, SwarmHost};
use reposwarm_store::{ObjectStore, Repo, RepoManager};
use tokio::select;
use tokio::signal::ctrl_c;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::announce::{announce, provider_keys, Announcer};
use crate::oracle::{encode_address, AccessPolicy, KeyOracle};
use crate::registry::NodeRegistry;

pub mod announce;
pub mod oracle;
pub mod registry;
mod server;

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;

#[derive(Debug)]
#[non_exhaustive]
pub struct NodeConfig {
    pub home: Utf8PathBuf,
    pub identity: Keypair,
    pub network: NetworkConfig,
    pub swarm: SwarmConfig,
    pub announce_interval: Duration,
    pub tracked: Vec<Utf8PathBuf>,
    pub replicate: BTreeSet<RepoId>,
    pub replication_root: Utf8PathBuf,
    pub access: AccessPolicy,
}

impl NodeConfig {
    /// Resolves a loaded config file against the node home.
    pub fn from_file(home: Utf8PathBuf, config: ConfigFile) -> EyreResult<Self> {
        let access = AccessPolicy::from_config(&config.access)?;
        let replication_root = home.join(&config.repos.replication_root);

        Ok(Self {
            network: NetworkConfig::new(
                config.identity.clone(),
                config.network.swarm,
                config.network.bootstrap,
            ),
            identity: config.identity,
            swarm: config.swarm.protocols,
            announce_interval: config.swarm.announce_interval,
            tracked: config.repos.tracked,
            replicate: config.repos.replicate,
            replication_root,
            access,
            home,
        })
    }
}

/// A running node: transport, protocol servers and the announcer.
#[derive(Debug)]
pub struct Node {
    home: Utf8PathBuf,
    network: NetworkClient,
    client: SwarmClient,
    registry: Arc<NodeRegistry>,
    config_file: Mutex<()>,
    token: CancellationToken,
    tasks: TaskTracker,
}

/// Runs a node until interrupted.
pub async fn start(config: NodeConfig) -> EyreResult<()> {
    let node = Node::start(config).await?;

    ctrl_c().await.wrap_err("failed to listen for shutdown signal")?;

    info!("Shutting down");

    node.shutdown().await;

    Ok(())
}

impl Node {
    pub async fn start(config: NodeConfig) -> EyreResult<Self> {
        let peer_id = config.identity.public().to_peer_id();

        info!(%peer_id, "Starting node");

        let oracle = KeyOracle::from_identity(&config.identity, config.access)?;

        info!(address = %encode_address(&oracle.address()), "Signing requests");

        let (network, events) = reposwarm_network::run(&config.network).await?;

        let client = SwarmClient::new(
            Arc::new(network.clone()),
            Arc::new(oracle),
            config.swarm,
        );

        let (announcements, requests) = mpsc::unbounded_channel();

        let registry = Arc::new(NodeRegistry::new(
            RepoManager::new(config.replication_root.clone()),
            config.replicate,
            announcements,
        ));

        for path in &config.tracked {
            if let Err(err) = registry.track(path).await {
                warn!(%path, %err, "Failed to track repository");
            }
        }

        let replicas = registry
            .track_replicas(&config.replication_root)
            .await
            .wrap_err("failed to scan the replication root")?;

        info!(
            tracked = registry.manager().repo_ids().len(),
            replicas, "Loaded repositories"
        );

        let token = CancellationToken::new();
        let tasks = TaskTracker::new();

        server::serve(
            &network,
            client.clone(),
            registry.clone(),
            &token,
            &tasks,
        )?;

        let announcer = Announcer::new(
            network.clone(),
            Arc::clone(&registry),
            config.announce_interval,
            requests,
            token.child_token(),
        );

        drop(tasks.spawn(announcer.run()));
        drop(tasks.spawn(log_events(events, token.child_token())));

        Ok(Self {
            home: config.home,
            network,
            client,
            registry,
            config_file: Mutex::new(()),
            token,
            tasks,
        })
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.network.local_peer_id()
    }

    #[must_use]
    pub const fn network(&self) -> &NetworkClient {
        &self.network
    }

    #[must_use]
    pub const fn client(&self) -> &SwarmClient {
        &self.client
    }

    #[must_use]
    pub fn repo(&self, repo_id: &RepoId) -> Option<Arc<Repo>> {
        self.registry.manager().get(repo_id)
    }

    /// Provides `repo_id` in the DHT right away instead of at the next
    /// periodic announcement.
    pub async fn announce_repo_content(&self, repo_id: &RepoId) -> EyreResult<()> {
        self.network
            .start_providing(ContentId::for_repo(repo_id))
            .await
            .wrap_err_with(|| format!("failed to announce {repo_id}"))
    }

    /// Refreshes every provider record this node holds.
    pub async fn announce_all(&self) {
        announce(&self.network, provider_keys(&self.registry)).await;
    }

    /// Starts or stops replicating `repo_id` and persists the choice.
    ///
    /// Returns whether the policy changed.
    pub async fn set_replication_policy(&self, repo_id: RepoId, replicate: bool) -> EyreResult<bool> {
        {
            let _guard = self.config_file.lock().await;

            let mut config = ConfigFile::load(&self.home)?;

            if config.set_replicate(repo_id.clone(), replicate) {
                config.save(&self.home)?;
            }
        }

        let changed = self.registry.set_replicating(repo_id.clone(), replicate);

        info!(%repo_id, replicate, changed, "Updated replication policy");

        if replicate {
            self.network
                .start_providing(ContentId::for_replicator(&repo_id))
                .await
                .wrap_err_with(|| format!("failed to announce replicator for {repo_id}"))?;
        }

        Ok(changed)
    }

    /// Starts serving the repository at `path` and persists it.
    pub async fn track_repo(&self, path: &Utf8Path) -> EyreResult<RepoId> {
        let repo = self
            .registry
            .track(path)
            .await
            .wrap_err_with(|| format!("failed to open repository at {path}"))?;

        let repo_id = repo.repo_id().clone();

        {
            let _guard = self.config_file.lock().await;

            let mut config = ConfigFile::load(&self.home)?;

            if config.track(path.to_owned()) {
                config.save(&self.home)?;
            }
        }

        if let Err(err) = self.announce_repo_content(&repo_id).await {
            warn!(%repo_id, ?err, "Failed to announce tracked repository");
        }

        Ok(repo_id)
    }

    #[must_use]
    pub fn fetch_chunks(&self, repo_id: RepoId, object_ids: Vec<ObjectId>) -> ReceiverStream<MaybeChunk> {
        fetch_chunks(&self.client, &self.token, repo_id, object_ids)
    }

    pub async fn fetch_object(
        &self,
        repo_id: RepoId,
        object_id: ObjectId,
    ) -> Result<FetchedObject, ObjectFetchError> {
        fetch_object(&self.client, &self.token, repo_id, object_id).await
    }

    /// Asks the swarm's replicators to copy a locally tracked repository.
    ///
    /// We announce ourselves first so replicators can find us as a provider.
    pub async fn replicate(&self, repo_id: RepoId) -> EyreResult<ReceiverStream<Progress>> {
        if self.repo(&repo_id).is_none() {
            bail!("repository {repo_id} is not tracked by this node");
        }

        self.announce_repo_content(&repo_id).await?;

        Ok(request_replication(&self.client, &self.token, repo_id))
    }

    /// Cancels every operation and waits for the background tasks.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.tasks.close();
        self.tasks.wait().await;

        debug!("Node stopped");
    }
}

#[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
async fn log_events(mut events: mpsc::Receiver<NetworkEvent>, token: CancellationToken) {
    loop {
        let event = select! {
            () = token.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            break;
        };

        match event {
            NetworkEvent::ListeningOn { address, .. } => info!(%address, "Listening"),
            NetworkEvent::Connected { peer_id } => debug!(%peer_id, "Peer connected"),
            NetworkEvent::Disconnected { peer_id } => debug!(%peer_id, "Peer disconnected"),
            _ => debug!(?event, "Unhandled network event"),
        }
    }
}

//! Mock implementations for testing protocols

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use camino::Utf8PathBuf;
use eyre::{bail, Result};
use futures_util::future::BoxFuture;
use libp2p::{PeerId, StreamProtocol};
use reposwarm_network_primitives::stream::Stream;
use reposwarm_primitives::repo::{ContentId, RepoId};
use reposwarm_protocols::access::{AccessOracle, Address, OracleError};
use reposwarm_protocols::{RepoRegistry, SwarmHost};
use reposwarm_store::{ObjectStore, RepoManager, StoreError};
use tokio::io::duplex;
use tokio::sync::mpsc;

/// Buffer size of the in-memory pipes between peers
const PIPE_CAPACITY: usize = 1024 * 1024;

/// Serves one inbound stream: `(dialer, protocol, stream)`
pub type Handler =
    Arc<dyn Fn(PeerId, StreamProtocol, Stream) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<PeerId, Handler>,
    providers: HashMap<ContentId, Vec<PeerId>>,
    unreachable: HashSet<PeerId>,
    dials: Vec<(PeerId, PeerId, StreamProtocol)>,
    lookups: usize,
}

/// An in-memory swarm: peers are handlers, streams are duplex pipes
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer that accepts streams with `handler`
    pub fn add_peer(&self, peer_id: PeerId, handler: Handler) {
        let _ = self
            .state
            .lock()
            .unwrap()
            .handlers
            .insert(peer_id, handler);
    }

    /// Register a peer that accepts streams and keeps them open
    pub fn add_idle_peer(&self, peer_id: PeerId) {
        self.add_peer(peer_id, idle_handler());
    }

    /// Make `peer_id` show up in lookups for `key`
    pub fn provide(&self, key: ContentId, peer_id: PeerId) {
        self.state
            .lock()
            .unwrap()
            .providers
            .entry(key)
            .or_default()
            .push(peer_id);
    }

    /// Make every dial to `peer_id` fail
    pub fn set_unreachable(&self, peer_id: PeerId) {
        let _ = self.state.lock().unwrap().unreachable.insert(peer_id);
    }

    /// Number of dials to `peer_id` so far
    pub fn dials_to(&self, peer_id: PeerId) -> usize {
        self.state
            .lock()
            .unwrap()
            .dials
            .iter()
            .filter(|(_, to, _)| *to == peer_id)
            .count()
    }

    /// Number of dials on any protocol so far
    pub fn total_dials(&self) -> usize {
        self.state.lock().unwrap().dials.len()
    }

    /// Number of provider lookups started so far
    pub fn lookups(&self) -> usize {
        self.state.lock().unwrap().lookups
    }

    /// The network as seen from `local_peer_id`
    pub fn host(&self, local_peer_id: PeerId) -> Arc<MockHost> {
        Arc::new(MockHost {
            local_peer_id,
            network: self.clone(),
        })
    }
}

/// A handler that holds every stream until the dialer drops it
pub fn idle_handler() -> Handler {
    Arc::new(|_, _, mut stream| {
        Box::pin(async move {
            use futures_util::StreamExt;

            while let Some(Ok(_)) = stream.next().await {}
        })
    })
}

/// Like [`idle_handler`], reporting the dialer once its stream ended
pub fn closing_handler(closed: mpsc::UnboundedSender<PeerId>) -> Handler {
    Arc::new(move |dialer, _, mut stream| {
        let closed = closed.clone();

        Box::pin(async move {
            use futures_util::StreamExt;

            while let Some(Ok(_)) = stream.next().await {}

            let _ = closed.send(dialer);
        })
    })
}

/// One node's view of a [`MockNetwork`]
pub struct MockHost {
    local_peer_id: PeerId,
    network: MockNetwork,
}

#[async_trait]
impl SwarmHost for MockHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn find_providers(&self, key: ContentId, max: usize) -> Result<mpsc::Receiver<PeerId>> {
        let providers = {
            let mut state = self.network.state.lock().unwrap();
            state.lookups += 1;
            state.providers.get(&key).cloned().unwrap_or_default()
        };

        let (tx, rx) = mpsc::channel(providers.len().max(1));

        for peer_id in providers.into_iter().take(max) {
            tx.try_send(peer_id).unwrap();
        }

        Ok(rx)
    }

    async fn open_stream(&self, peer_id: PeerId, protocol: StreamProtocol) -> Result<Stream> {
        let handler = {
            let mut state = self.network.state.lock().unwrap();

            state
                .dials
                .push((self.local_peer_id, peer_id, protocol.clone()));

            if state.unreachable.contains(&peer_id) {
                bail!("peer {peer_id} is unreachable");
            }

            match state.handlers.get(&peer_id) {
                Some(handler) => Arc::clone(handler),
                None => bail!("peer {peer_id} is unknown"),
            }
        };

        let (local, remote) = duplex(PIPE_CAPACITY);

        drop(tokio::spawn((*handler)(
            self.local_peer_id,
            protocol,
            Stream::from_io(remote),
        )));

        Ok(Stream::from_io(local))
    }
}

/// Access oracle whose signature is just the signer's name
#[derive(Clone)]
pub struct MockOracle {
    name: Vec<u8>,
    deny_all: bool,
}

impl MockOracle {
    /// Signs as `name` and lets everybody pull
    pub fn new(name: &str) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            deny_all: false,
        }
    }

    /// Signs as `name` and refuses everybody
    pub fn denying(name: &str) -> Self {
        Self {
            deny_all: true,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl AccessOracle for MockOracle {
    fn sign_hash(&self, _data: &[u8]) -> Result<Vec<u8>, OracleError> {
        Ok(self.name.clone())
    }

    fn addr_from_signed_hash(&self, _data: &[u8], signature: &[u8]) -> Result<Address, OracleError> {
        if signature.is_empty() {
            return Err(OracleError::MalformedSignature);
        }

        Ok(Address::from(signature.to_vec()))
    }

    async fn address_has_pull_access(
        &self,
        _address: &Address,
        _repo_id: &RepoId,
    ) -> Result<bool, OracleError> {
        Ok(!self.deny_all)
    }
}

/// Registry over a [`RepoManager`] with an in-memory replication policy
pub struct MockRegistry {
    manager: RepoManager,
    replicating: Mutex<HashSet<RepoId>>,
    replicated: Mutex<Vec<RepoId>>,
}

impl MockRegistry {
    pub fn new(replication_root: Utf8PathBuf) -> Self {
        Self {
            manager: RepoManager::new(replication_root),
            replicating: Mutex::default(),
            replicated: Mutex::default(),
        }
    }

    pub fn manager(&self) -> &RepoManager {
        &self.manager
    }

    /// Accept replication requests for `repo_id`
    pub fn replicate(&self, repo_id: RepoId) {
        let _ = self.replicating.lock().unwrap().insert(repo_id);
    }

    /// Repositories whose replication finished
    pub fn replicated_repos(&self) -> Vec<RepoId> {
        self.replicated.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoRegistry for MockRegistry {
    fn repo(&self, repo_id: &RepoId) -> Option<Arc<dyn ObjectStore>> {
        self.manager
            .get(repo_id)
            .map(|repo| repo as Arc<dyn ObjectStore>)
    }

    fn is_replicating(&self, repo_id: &RepoId) -> bool {
        self.replicating.lock().unwrap().contains(repo_id)
    }

    async fn ensure_local_checkout(
        &self,
        repo_id: &RepoId,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let repo = self.manager.ensure_local_checkout_exists(repo_id).await?;

        Ok(repo)
    }

    async fn replicated(&self, repo_id: &RepoId) {
        self.replicated.lock().unwrap().push(repo_id.clone());
    }
}

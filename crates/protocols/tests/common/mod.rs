//! Common test utilities for protocol testing
//!
//! This module provides mocks and a small in-memory swarm of nodes.

#![allow(dead_code, reason = "Not every test file uses every helper")]

pub mod mocks;

use core::time::Duration;
use std::sync::Arc;

use camino::Utf8PathBuf;
use futures_util::StreamExt;
use libp2p::PeerId;
use mocks::{Handler, MockNetwork, MockOracle, MockRegistry};
use reposwarm_network_primitives::stream::{
    Stream, CHUNK_PROTOCOL, MANIFEST_PROTOCOL, OBJECT_PROTOCOL, REPLICATION_PROTOCOL,
};
use reposwarm_primitives::repo::{ContentId, RepoId};
use reposwarm_protocols::access::AccessOracle;
use reposwarm_protocols::p2p::chunk::handle_chunk_stream;
use reposwarm_protocols::p2p::manifest::handle_manifest_stream;
use reposwarm_protocols::p2p::object::handle_object_stream;
use reposwarm_protocols::p2p::replication::handle_replication_stream;
use reposwarm_protocols::{RepoRegistry, SwarmClient, SwarmConfig};
use reposwarm_store::Repo;
use tempfile::{tempdir, TempDir};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast backoffs so retry paths finish quickly
pub fn test_config() -> SwarmConfig {
    SwarmConfig::default()
        .with_dial_backoff(Duration::from_millis(10))
        .with_discovery_timeout(Duration::from_millis(500))
}

pub fn test_repo_id() -> RepoId {
    "org/project".parse().unwrap()
}

/// A temporary directory with a UTF-8 path
pub fn utf8_tempdir() -> (TempDir, Utf8PathBuf) {
    let dir = tempdir().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    (dir, path)
}

/// A node attached to a [`MockNetwork`]
pub struct TestNode {
    pub peer_id: PeerId,
    pub client: SwarmClient,
    pub registry: Arc<MockRegistry>,
    pub token: CancellationToken,
    root: Utf8PathBuf,
    _dir: TempDir,
}

impl TestNode {
    pub fn new(network: &MockNetwork, name: &str) -> Self {
        Self::with_oracle(network, MockOracle::new(name), test_config())
    }

    pub fn with_config(network: &MockNetwork, name: &str, config: SwarmConfig) -> Self {
        Self::with_oracle(network, MockOracle::new(name), config)
    }

    pub fn with_oracle(network: &MockNetwork, oracle: MockOracle, config: SwarmConfig) -> Self {
        let (dir, root) = utf8_tempdir();
        let peer_id = PeerId::random();
        let oracle: Arc<dyn AccessOracle> = Arc::new(oracle);
        let client = SwarmClient::new(network.host(peer_id), oracle, config);
        let registry = Arc::new(MockRegistry::new(root.join("replicas")));

        Self {
            peer_id,
            client,
            registry,
            token: CancellationToken::new(),
            root,
            _dir: dir,
        }
    }

    /// Accept inbound streams on every protocol
    pub fn serve(&self, network: &MockNetwork) {
        network.add_peer(
            self.peer_id,
            server_handler(
                self.client.clone(),
                Arc::clone(&self.registry),
                self.token.clone(),
            ),
        );
    }

    /// Create and track a repository owned by this node
    pub async fn create_repo(&self, repo_id: &RepoId) -> Arc<Repo> {
        let path = self.root.join("repos").join(ContentId::for_repo(repo_id).to_hex());

        let _ = Repo::init(&path, repo_id.clone()).await.unwrap();

        self.registry.manager().track(&path).await.unwrap()
    }

    /// Announce this node as a provider of `repo_id`'s objects
    pub fn provide_repo(&self, network: &MockNetwork, repo_id: &RepoId) {
        network.provide(ContentId::for_repo(repo_id), self.peer_id);
    }

    /// Announce this node as a replicator of `repo_id`
    pub fn provide_replication(&self, network: &MockNetwork, repo_id: &RepoId) {
        self.registry.replicate(repo_id.clone());
        network.provide(ContentId::for_replicator(repo_id), self.peer_id);
    }
}

/// Route inbound streams to the protocol servers
pub fn server_handler(
    client: SwarmClient,
    registry: Arc<MockRegistry>,
    token: CancellationToken,
) -> Handler {
    Arc::new(move |peer_id, protocol, stream: Stream| {
        let client = client.clone();
        let registry: Arc<dyn RepoRegistry> = Arc::clone(&registry) as Arc<dyn RepoRegistry>;
        let token = token.clone();

        Box::pin(async move {
            let _ignored = if protocol == CHUNK_PROTOCOL {
                handle_chunk_stream(client, &*registry, peer_id, stream).await
            } else if protocol == OBJECT_PROTOCOL {
                handle_object_stream(client, &*registry, peer_id, stream).await
            } else if protocol == MANIFEST_PROTOCOL {
                handle_manifest_stream(client, &*registry, peer_id, stream).await
            } else if protocol == REPLICATION_PROTOCOL {
                handle_replication_stream(client, registry, token, peer_id, stream).await
            } else {
                Ok(())
            };
        })
    })
}

/// Drain a stream, failing the test if it does not end in time
pub async fn collect<S>(stream: S) -> Vec<S::Item>
where
    S: futures_util::Stream + Unpin,
{
    timeout(TEST_TIMEOUT, stream.collect::<Vec<_>>())
        .await
        .expect("stream did not finish in time")
}

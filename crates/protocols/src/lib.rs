//! Object transfer and replication protocols for reposwarm nodes.
//!
//! Everything a protocol needs is injected: the transport through
//! [`SwarmHost`], request signing and access checks through
//! [`AccessOracle`], and local repositories through [`RepoRegistry`].
//! This keeps the protocols testable against in-memory peers.
//!
//! # Modules
//!
//! - [`pool`]: bounded, self-replenishing supply of peer connections
//! - [`p2p`]: chunk, object, manifest and replication exchanges, both sides
//! - [`replicator`]: the serving side of a replication request
//!
//! # Example
//!
//! ```rust,ignore
//! use reposwarm_protocols::p2p::chunk::fetch_chunks;
//!
//! let mut chunks = fetch_chunks(&client, &token, repo_id, object_ids);
//! while let Some(chunk) = chunks.next().await {
//!     // ...
//! }
//! ```

#![warn(missing_docs)]

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result as EyreResult;
use libp2p::{PeerId, StreamProtocol};
use reposwarm_network_primitives::stream::Stream;
use reposwarm_primitives::repo::{ContentId, RepoId};
use reposwarm_store::{ObjectStore, StoreError};
use tokio::sync::mpsc;

pub mod access;
pub mod config;
pub mod error;
pub mod p2p;
pub mod pool;
pub mod replicator;
pub mod stream;

pub use access::{AccessOracle, Address};
pub use config::SwarmConfig;
pub use error::{FetchError, ObjectFetchError};
pub use pool::{PeerConnection, PeerPool, PoolHandle};

/// Provider discovery and stream transport.
#[async_trait]
pub trait SwarmHost: Send + Sync + 'static {
    /// Identity of this node; never handed out as a provider.
    fn local_peer_id(&self) -> PeerId;

    /// Starts a provider lookup for `key`.
    ///
    /// Providers arrive lazily and the channel closes when the lookup ends
    /// or `max` providers were yielded.
    async fn find_providers(&self, key: ContentId, max: usize) -> EyreResult<mpsc::Receiver<PeerId>>;

    /// Opens a new stream to `peer_id` speaking `protocol`.
    async fn open_stream(&self, peer_id: PeerId, protocol: StreamProtocol) -> EyreResult<Stream>;
}

/// Local repositories a node serves and replicates.
#[async_trait]
pub trait RepoRegistry: Send + Sync + 'static {
    /// A repository this node can serve objects from.
    fn repo(&self, repo_id: &RepoId) -> Option<Arc<dyn ObjectStore>>;

    /// Whether this node accepts replication requests for `repo_id`.
    fn is_replicating(&self, repo_id: &RepoId) -> bool;

    /// The repository to replicate into, created on first use.
    async fn ensure_local_checkout(
        &self,
        repo_id: &RepoId,
    ) -> Result<Arc<dyn ObjectStore>, StoreError>;

    /// Called once a replication job stored every missing object.
    async fn replicated(&self, _repo_id: &RepoId) {}
}

/// Shared context for every outbound protocol.
#[derive(Clone)]
pub struct SwarmClient {
    host: Arc<dyn SwarmHost>,
    oracle: Arc<dyn AccessOracle>,
    config: SwarmConfig,
}

impl SwarmClient {
    /// Bundles the transport, the oracle and the tunables.
    #[must_use]
    pub fn new(host: Arc<dyn SwarmHost>, oracle: Arc<dyn AccessOracle>, config: SwarmConfig) -> Self {
        Self {
            host,
            oracle,
            config,
        }
    }

    /// The same context with different tunables.
    #[must_use]
    pub const fn with_config(mut self, config: SwarmConfig) -> Self {
        self.config = config;
        self
    }

    /// The transport.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn SwarmHost> {
        &self.host
    }

    /// The signing and access oracle.
    #[must_use]
    pub fn oracle(&self) -> &Arc<dyn AccessOracle> {
        &self.oracle
    }

    /// Tunables.
    #[must_use]
    pub const fn config(&self) -> &SwarmConfig {
        &self.config
    }
}

impl fmt::Debug for SwarmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmClient")
            .field("local_peer_id", &self.host.local_peer_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! A bounded, self-replenishing set of connections to a repository's
//! providers.
//!
//! The pool starts with one replenish token per slot. A single background
//! task turns tokens into connections: it walks the provider stream, skips
//! this node, opens a stream and parks the connection in the ready channel.
//! Consumers take connections with [`PeerPool::get_conn`] and hand them back
//! through [`PoolHandle::return_conn`]; a strike drops the connection and
//! issues a fresh token, so the number of ready, lent and pending
//! connections always adds up to the pool size.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use libp2p::{PeerId, StreamProtocol};
use reposwarm_network_primitives::stream::Stream;
use reposwarm_primitives::repo::{ContentId, RepoId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::SwarmHost;

/// Upper bound passed to a single provider lookup.
pub const PROVIDER_QUERY_LIMIT: usize = 999;

/// A stream to one peer for one repository and protocol.
///
/// Owned by exactly one holder at a time; dropping it closes the stream.
#[derive(Debug)]
pub struct PeerConnection {
    /// Remote peer.
    pub peer_id: PeerId,
    /// Repository the connection was opened for.
    pub repo_id: RepoId,
    /// Protocol spoken on the stream.
    pub protocol: StreamProtocol,
    /// The stream itself.
    pub stream: Stream,
}

/// Where connections go back to; cheap to clone into worker tasks.
#[derive(Clone, Debug)]
pub struct PoolHandle {
    ready: mpsc::Sender<PeerConnection>,
    replenish: mpsc::UnboundedSender<()>,
    token: CancellationToken,
}

impl PoolHandle {
    /// Gives a connection back.
    ///
    /// With `strike` the connection is dropped and a replacement is
    /// requested, otherwise it becomes available again.
    pub fn return_conn(&self, conn: PeerConnection, strike: bool) {
        if self.token.is_cancelled() {
            return;
        }

        if !strike {
            match self.ready.try_send(conn) {
                Ok(()) => return,
                Err(TrySendError::Full(conn) | TrySendError::Closed(conn)) => {
                    warn!(peer_id=%conn.peer_id, "Ready set unavailable, replacing connection");
                }
            }
        } else {
            debug!(peer_id=%conn.peer_id, repo_id=%conn.repo_id, "Dropping struck connection");
            drop(conn);
        }

        let _ignored = self.replenish.send(());
    }

    /// Whether the pool was closed or its parent cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// See the module docs.
pub struct PeerPool {
    ready: mpsc::Receiver<PeerConnection>,
    handle: PoolHandle,
}

impl PeerPool {
    /// Starts a pool of `concurrency` connections to providers of
    /// `content_id`.
    ///
    /// The pool lives until [`PeerPool::close`], until it is dropped, or
    /// until `token` is cancelled. Construction cannot fail: providers are
    /// looked up lazily by the background task.
    #[must_use]
    pub fn new(
        host: Arc<dyn SwarmHost>,
        token: &CancellationToken,
        repo_id: RepoId,
        concurrency: usize,
        protocol: StreamProtocol,
        content_id: ContentId,
        dial_backoff: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let token = token.child_token();

        let (ready_sender, ready_receiver) = mpsc::channel(concurrency);
        let (replenish_sender, replenish_receiver) = mpsc::unbounded_channel();

        for _ in 0..concurrency {
            let _ignored = replenish_sender.send(());
        }

        let replenisher = Replenisher {
            host,
            token: token.clone(),
            repo_id,
            protocol,
            content_id,
            dial_backoff,
            ready: ready_sender.clone(),
            providers: None,
        };

        drop(spawn(replenisher.run(replenish_receiver)));

        Self {
            ready: ready_receiver,
            handle: PoolHandle {
                ready: ready_sender,
                replenish: replenish_sender,
                token,
            },
        }
    }

    /// Waits for a ready connection.
    ///
    /// Returns `None` once the pool is closed or cancelled; parked
    /// connections are released at that point.
    pub async fn get_conn(&mut self) -> Option<PeerConnection> {
        let conn = if self.handle.token.is_cancelled() {
            None
        } else {
            select! {
                biased;
                () = self.handle.token.cancelled() => None,
                conn = self.ready.recv() => conn,
            }
        };

        if conn.is_none() {
            self.close();
        }

        conn
    }

    /// See [`PoolHandle::return_conn`].
    pub fn return_conn(&self, conn: PeerConnection, strike: bool) {
        self.handle.return_conn(conn, strike);
    }

    /// A handle for returning connections from other tasks.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Stops replenishment and releases every parked connection.
    pub fn close(&mut self) {
        self.handle.token.cancel();
        self.ready.close();

        while let Ok(conn) = self.ready.try_recv() {
            drop(conn);
        }
    }
}

impl Drop for PeerPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerPool")
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

struct Replenisher {
    host: Arc<dyn SwarmHost>,
    token: CancellationToken,
    repo_id: RepoId,
    protocol: StreamProtocol,
    content_id: ContentId,
    dial_backoff: Duration,
    ready: mpsc::Sender<PeerConnection>,
    providers: Option<mpsc::Receiver<PeerId>>,
}

impl Replenisher {
    async fn run(mut self, mut demand: mpsc::UnboundedReceiver<()>) {
        loop {
            let wanted = select! {
                biased;
                () = self.token.cancelled() => None,
                wanted = demand.recv() => wanted,
            };

            if wanted.is_none() {
                break;
            }

            let Some(conn) = self.connect().await else {
                break;
            };

            let sent = select! {
                biased;
                () = self.token.cancelled() => false,
                sent = self.ready.send(conn) => sent.is_ok(),
            };

            if !sent {
                break;
            }
        }

        debug!(repo_id=%self.repo_id, protocol=%self.protocol, "Peer pool replenisher stopped");
    }

    /// Dials providers until one accepts; `None` only on cancellation.
    async fn connect(&mut self) -> Option<PeerConnection> {
        let local_peer_id = self.host.local_peer_id();

        loop {
            let peer_id = self.next_provider().await?;

            if peer_id == local_peer_id {
                continue;
            }

            debug!(%peer_id, repo_id=%self.repo_id, protocol=%self.protocol, "Dialing provider");

            let opened = select! {
                biased;
                () = self.token.cancelled() => return None,
                opened = self.host.open_stream(peer_id, self.protocol.clone()) => opened,
            };

            match opened {
                Ok(stream) => {
                    return Some(PeerConnection {
                        peer_id,
                        repo_id: self.repo_id.clone(),
                        protocol: self.protocol.clone(),
                        stream,
                    });
                }
                Err(err) => {
                    warn!(%peer_id, repo_id=%self.repo_id, %err, "Failed to open stream to provider");
                    self.backoff().await?;
                }
            }
        }
    }

    /// Next candidate, restarting discovery whenever a lookup runs dry.
    async fn next_provider(&mut self) -> Option<PeerId> {
        loop {
            if self.token.is_cancelled() {
                return None;
            }

            if let Some(providers) = self.providers.as_mut() {
                let next = select! {
                    biased;
                    () = self.token.cancelled() => return None,
                    next = providers.recv() => next,
                };

                if let Some(peer_id) = next {
                    return Some(peer_id);
                }

                debug!(repo_id=%self.repo_id, content_id=%self.content_id, "Provider lookup exhausted");

                self.providers = None;
                self.backoff().await?;
            }

            let lookup = select! {
                biased;
                () = self.token.cancelled() => return None,
                lookup = self.host.find_providers(self.content_id, PROVIDER_QUERY_LIMIT) => lookup,
            };

            match lookup {
                Ok(providers) => self.providers = Some(providers),
                Err(err) => {
                    warn!(repo_id=%self.repo_id, %err, "Failed to start provider lookup");
                    self.backoff().await?;
                }
            }
        }
    }

    async fn backoff(&self) -> Option<()> {
        select! {
            biased;
            () = self.token.cancelled() => None,
            () = sleep(self.dial_backoff) => Some(()),
        }
    }
}

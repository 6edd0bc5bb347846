//! Accepts inbound protocol streams and hands each one to its handler.

use std::sync::Arc;

use eyre::Result as EyreResult;
use futures_util::StreamExt;
use libp2p::{PeerId, StreamProtocol};
use libp2p_stream::IncomingStreams;
use reposwarm_network::client::NetworkClient;
use reposwarm_network_primitives::stream::{
    Stream, CHUNK_PROTOCOL, MANIFEST_PROTOCOL, OBJECT_PROTOCOL, REPLICATION_PROTOCOL,
};
use reposwarm_protocols::p2p::chunk::handle_chunk_stream;
use reposwarm_protocols::p2p::manifest::handle_manifest_stream;
use reposwarm_protocols::p2p::object::handle_object_stream;
use reposwarm_protocols::p2p::replication::handle_replication_stream;
use reposwarm_protocols::{RepoRegistry, SwarmClient};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const PROTOCOLS: [StreamProtocol; 4] = [
    CHUNK_PROTOCOL,
    OBJECT_PROTOCOL,
    MANIFEST_PROTOCOL,
    REPLICATION_PROTOCOL,
];

#[derive(Clone)]
struct Server {
    client: SwarmClient,
    registry: Arc<dyn RepoRegistry>,
    token: CancellationToken,
    tasks: TaskTracker,
}

/// Registers every protocol and serves inbound streams until `token` fires.
pub fn serve(
    network: &NetworkClient,
    client: SwarmClient,
    registry: Arc<dyn RepoRegistry>,
    token: &CancellationToken,
    tasks: &TaskTracker,
) -> EyreResult<()> {
    let server = Server {
        client,
        registry,
        token: token.clone(),
        tasks: tasks.clone(),
    };

    for protocol in PROTOCOLS {
        let incoming = network.accept(protocol.clone())?;

        drop(tasks.spawn(server.clone().accept(protocol, incoming)));
    }

    Ok(())
}

impl Server {
    #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
    async fn accept(self, protocol: StreamProtocol, mut incoming: IncomingStreams) {
        loop {
            let next = select! {
                () = self.token.cancelled() => break,
                next = incoming.next() => next,
            };

            let Some((peer_id, stream)) = next else {
                break;
            };

            debug!(%peer_id, %protocol, "Accepted stream");

            drop(
                self.tasks
                    .spawn(self.clone().handle(protocol.clone(), peer_id, Stream::new(stream))),
            );
        }

        debug!(%protocol, "Stopped accepting streams");
    }

    #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
    async fn handle(self, protocol: StreamProtocol, peer_id: PeerId, stream: Stream) {
        let registry = &*self.registry;

        let served = async {
            if protocol == CHUNK_PROTOCOL {
                handle_chunk_stream(self.client.clone(), registry, peer_id, stream).await
            } else if protocol == OBJECT_PROTOCOL {
                handle_object_stream(self.client.clone(), registry, peer_id, stream).await
            } else if protocol == MANIFEST_PROTOCOL {
                handle_manifest_stream(self.client.clone(), registry, peer_id, stream).await
            } else {
                handle_replication_stream(
                    self.client.clone(),
                    Arc::clone(&self.registry),
                    self.token.child_token(),
                    peer_id,
                    stream,
                )
                .await
            }
        };

        let result = select! {
            () = self.token.cancelled() => return,
            result = served => result,
        };

        if let Err(err) = result {
            warn!(%peer_id, %protocol, ?err, "Failed to serve stream");
        }
    }
}

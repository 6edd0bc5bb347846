use libp2p::core::transport::ListenerId;
use libp2p::{Multiaddr, PeerId};

/// Swarm happenings the node may want to react to.
#[derive(Debug)]
#[non_exhaustive]
pub enum NetworkEvent {
    ListeningOn {
        listener_id: ListenerId,
        address: Multiaddr,
    },
    Connected {
        peer_id: PeerId,
    },
    Disconnected {
        peer_id: PeerId,
    },
}

use libp2p::identify::Event;
use tracing::debug;

use super::{EventHandler, EventLoop};
use crate::REPOSWARM_KAD_PROTO_NAME;

impl EventHandler<Event> for EventLoop {
    async fn handle(&mut self, event: Event) {
        debug!(?event, "identify");

        let Event::Received { peer_id, info, .. } = event else {
            return;
        };

        // Only peers speaking our DHT dialect belong in the routing table.
        if !info.protocols.contains(&REPOSWARM_KAD_PROTO_NAME) {
            return;
        }

        for addr in info.listen_addrs {
            let _ = self.swarm.behaviour_mut().kad.add_address(&peer_id, addr);
        }
    }
}

use libp2p::ping::Event;
use tracing::trace;

use super::{EventHandler, EventLoop};

impl EventHandler<Event> for EventLoop {
    async fn handle(&mut self, event: Event) {
        trace!(peer_id = %event.peer, result = ?event.result, "ping");
    }
}

use libp2p::kad::{Event, GetProvidersOk, QueryResult};
use tracing::{debug, warn};

use super::{EventHandler, EventLoop};

impl EventHandler<Event> for EventLoop {
    async fn handle(&mut self, event: Event) {
        let Event::OutboundQueryProgressed { id, result, .. } = event else {
            debug!(?event, "kad");
            return;
        };

        match result {
            QueryResult::Bootstrap(result) => {
                if let Some(sender) = self.pending_bootstrap.remove(&id) {
                    let _ = sender.send(result.map(|_| None).map_err(Into::into));
                }
            }
            QueryResult::StartProviding(result) => {
                if let Some(sender) = self.pending_start_providing.remove(&id) {
                    let _ = sender.send(result.map(|_| ()).map_err(Into::into));
                }
            }
            QueryResult::GetProviders(Ok(GetProvidersOk::FoundProviders { providers, .. })) => {
                let Some(pending) = self.pending_get_providers.get_mut(&id) else {
                    return;
                };

                if pending.offer(providers) {
                    return;
                }

                let _ = self.pending_get_providers.remove(&id);

                if let Some(mut query) = self.swarm.behaviour_mut().kad.query_mut(&id) {
                    query.finish();
                }
            }
            QueryResult::GetProviders(Ok(GetProvidersOk::FinishedWithNoAdditionalRecord {
                ..
            })) => {
                // Dropping the sender ends the consumer's stream.
                let _ = self.pending_get_providers.remove(&id);
            }
            QueryResult::GetProviders(Err(err)) => {
                warn!(%err, "Provider lookup failed");
                let _ = self.pending_get_providers.remove(&id);
            }
            result => debug!(?result, "Unhandled kad query result"),
        }
    }
}

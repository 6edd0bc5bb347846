//! Keeps this node's provider records fresh in the DHT.

use core::time::Duration;
use std::sync::Arc;

use futures_util::future::join_all;
use reposwarm_network::client::NetworkClient;
use reposwarm_primitives::repo::{ContentId, RepoId};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::NodeRegistry;

#[cfg(test)]
#[path = "tests/announce.rs"]
mod tests;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Every provider key this node should advertise right now.
#[must_use]
pub fn provider_keys(registry: &NodeRegistry) -> Vec<ContentId> {
    let tracked = registry
        .manager()
        .repo_ids()
        .into_iter()
        .map(|repo_id| ContentId::for_repo(&repo_id));

    let replicating = registry
        .replicating()
        .into_iter()
        .map(|repo_id| ContentId::for_replicator(&repo_id));

    tracked.chain(replicating).collect()
}

pub async fn announce(network: &NetworkClient, keys: impl IntoIterator<Item = ContentId>) {
    let announcements = keys.into_iter().map(|key| async move {
        if let Err(err) = network.start_providing(key).await {
            warn!(%key, ?err, "Failed to announce provider record");
        }
    });

    let _ = join_all(announcements).await;
}

#[derive(Debug)]
pub struct Announcer {
    network: NetworkClient,
    registry: Arc<NodeRegistry>,
    period: Duration,
    requests: mpsc::UnboundedReceiver<RepoId>,
    token: CancellationToken,
}

impl Announcer {
    /// `requests` carries repositories that need announcing ahead of the
    /// next periodic round.
    #[must_use]
    pub const fn new(
        network: NetworkClient,
        registry: Arc<NodeRegistry>,
        period: Duration,
        requests: mpsc::UnboundedReceiver<RepoId>,
        token: CancellationToken,
    ) -> Self {
        Self {
            network,
            registry,
            period,
            requests,
            token,
        }
    }

    #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
    pub async fn run(mut self) {
        let mut ticks = interval(self.period.max(MIN_PERIOD));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;
                () = self.token.cancelled() => break,
                Some(repo_id) = self.requests.recv() => {
                    debug!(%repo_id, "Announcing repository");

                    announce(&self.network, [ContentId::for_repo(&repo_id)]).await;
                }
                _ = ticks.tick() => {
                    let keys = provider_keys(&self.registry);

                    debug!(count = keys.len(), "Refreshing provider records");

                    announce(&self.network, keys).await;
                }
            }
        }

        debug!("Announcer stopped");
    }
}

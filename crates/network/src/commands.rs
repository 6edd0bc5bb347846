use std::collections::HashSet;

use eyre::Result as EyreResult;
use libp2p::{Multiaddr, PeerId};
use reposwarm_primitives::repo::ContentId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[cfg(test)]
#[path = "tests/commands.rs"]
mod tests;

/// Upper bound on providers buffered for one lookup.
pub(crate) const PROVIDER_BUFFER: usize = 1_024;

#[derive(Debug)]
pub(crate) enum Command {
    ListenOn {
        addr: Multiaddr,
        sender: oneshot::Sender<EyreResult<()>>,
    },
    Dial {
        peer_addr: Multiaddr,
        sender: oneshot::Sender<EyreResult<Option<()>>>,
    },
    Bootstrap {
        sender: oneshot::Sender<EyreResult<Option<()>>>,
    },
    StartProviding {
        key: ContentId,
        sender: oneshot::Sender<EyreResult<()>>,
    },
    GetProviders {
        key: ContentId,
        max: usize,
        sender: mpsc::Sender<PeerId>,
    },
    PeerCount {
        sender: oneshot::Sender<usize>,
    },
}

/// A provider lookup still feeding its consumer.
#[derive(Debug)]
pub(crate) struct PendingProviders {
    sender: mpsc::Sender<PeerId>,
    remaining: usize,
    seen: HashSet<PeerId>,
}

impl PendingProviders {
    pub(crate) fn new(sender: mpsc::Sender<PeerId>, max: usize) -> Self {
        Self {
            sender,
            remaining: max,
            seen: HashSet::new(),
        }
    }

    /// Forwards providers not seen before.
    ///
    /// Returns `false` once the lookup should stop: the limit is reached or
    /// the consumer went away.
    pub(crate) fn offer(&mut self, providers: impl IntoIterator<Item = PeerId>) -> bool {
        for peer_id in providers {
            if self.remaining == 0 {
                break;
            }

            if !self.seen.insert(peer_id) {
                continue;
            }

            match self.sender.try_send(peer_id) {
                Ok(()) => self.remaining = self.remaining.saturating_sub(1),
                Err(TrySendError::Full(_)) => {
                    debug!(%peer_id, "Provider buffer full, dropping provider");
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        self.remaining > 0 && !self.sender.is_closed()
    }
}

use core::fmt;

use async_trait::async_trait;
use eyre::{eyre, Result as EyreResult, WrapErr};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use libp2p_stream::{Control, IncomingStreams};
use reposwarm_network_primitives::stream::Stream;
use reposwarm_primitives::repo::ContentId;
use reposwarm_protocols::SwarmHost;
use tokio::sync::{mpsc, oneshot};

use crate::commands::{Command, PROVIDER_BUFFER};

/// Handle to the network event loop.
#[derive(Clone)]
pub struct NetworkClient {
    local_peer_id: PeerId,
    sender: mpsc::Sender<Command>,
    control: Control,
}

impl NetworkClient {
    pub(crate) const fn new(
        local_peer_id: PeerId,
        sender: mpsc::Sender<Command>,
        control: Control,
    ) -> Self {
        Self {
            local_peer_id,
            sender,
            control,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> EyreResult<T> {
        let (sender, receiver) = oneshot::channel();

        self.sender
            .send(command(sender))
            .await
            .map_err(|_| eyre!("network event loop has stopped"))?;

        receiver
            .await
            .wrap_err("network event loop dropped the request")
    }

    pub async fn listen_on(&self, addr: Multiaddr) -> EyreResult<()> {
        self.request(|sender| Command::ListenOn { addr, sender })
            .await?
    }

    /// Dials `peer_addr`, which must end in `/p2p/<peer id>`.
    ///
    /// Resolves to `None` when a dial to that peer is already in flight.
    pub async fn dial(&self, peer_addr: Multiaddr) -> EyreResult<Option<()>> {
        self.request(|sender| Command::Dial { peer_addr, sender })
            .await?
    }

    pub async fn bootstrap(&self) -> EyreResult<()> {
        let _result = self.request(|sender| Command::Bootstrap { sender }).await??;

        Ok(())
    }

    /// Announces this node as a provider of `key` in the DHT.
    pub async fn start_providing(&self, key: ContentId) -> EyreResult<()> {
        self.request(|sender| Command::StartProviding { key, sender })
            .await?
    }

    pub async fn peer_count(&self) -> EyreResult<usize> {
        self.request(|sender| Command::PeerCount { sender }).await
    }

    /// Registers `protocol` and returns the inbound streams speaking it.
    pub fn accept(&self, protocol: StreamProtocol) -> EyreResult<IncomingStreams> {
        let mut control = self.control.clone();

        control
            .accept(protocol.clone())
            .map_err(|err| eyre!("failed to accept {protocol}: {err}"))
    }
}

#[async_trait]
impl SwarmHost for NetworkClient {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn find_providers(&self, key: ContentId, max: usize) -> EyreResult<mpsc::Receiver<PeerId>> {
        let (sender, receiver) = mpsc::channel(max.clamp(1, PROVIDER_BUFFER));

        if max == 0 {
            return Ok(receiver);
        }

        self.sender
            .send(Command::GetProviders { key, max, sender })
            .await
            .map_err(|_| eyre!("network event loop has stopped"))?;

        Ok(receiver)
    }

    async fn open_stream(&self, peer_id: PeerId, protocol: StreamProtocol) -> EyreResult<Stream> {
        let mut control = self.control.clone();

        let stream = control
            .open_stream(peer_id, protocol.clone())
            .await
            .wrap_err_with(|| format!("failed to open {protocol} stream to {peer_id}"))?;

        Ok(Stream::new(stream))
    }
}

impl fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkClient")
            .field("local_peer_id", &self.local_peer_id)
            .finish_non_exhaustive()
    }
}

//! libp2p transport for reposwarm nodes.
//!
//! A single [`EventLoop`] task owns the swarm. Everything else talks to it
//! through a [`NetworkClient`], which queues commands and opens streams
//! directly through the `libp2p-stream` control.

use core::time::Duration;
use std::collections::hash_map::{self, HashMap};

use eyre::{bail, eyre, Result as EyreResult};
use futures_util::StreamExt;
use libp2p::identify::{Behaviour as IdentifyBehaviour, Config as IdentifyConfig};
use libp2p::kad::store::MemoryStore;
use libp2p::kad::{Behaviour as KadBehaviour, Config as KadConfig, Mode, QueryId, RecordKey};
use libp2p::noise::Config as NoiseConfig;
use libp2p::ping::Behaviour as PingBehaviour;
use libp2p::swarm::{NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::tcp::Config as TcpConfig;
use libp2p::tls::Config as TlsConfig;
use libp2p::yamux::Config as YamuxConfig;
use libp2p::{PeerId, StreamProtocol, SwarmBuilder};
use libp2p_stream::Behaviour as StreamBehaviour;
use multiaddr::Protocol;
use tokio::sync::{mpsc, oneshot};
use tokio::{select, spawn};
use tracing::{debug, info, warn};

use crate::client::NetworkClient;
use crate::commands::{Command, PendingProviders};
use crate::config::NetworkConfig;
use crate::events::EventHandler;
use crate::types::NetworkEvent;

pub mod client;
mod commands;
pub mod config;
mod events;
pub mod types;

const PROTOCOL_VERSION: &str = concat!("/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const REPOSWARM_KAD_PROTO_NAME: StreamProtocol = StreamProtocol::new("/reposwarm/kad/1.0.0");
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(NetworkBehaviour)]
struct Behaviour {
    identify: IdentifyBehaviour,
    kad: KadBehaviour<MemoryStore>,
    ping: PingBehaviour,
    stream: StreamBehaviour,
}

/// Starts the swarm, listens on the configured addresses and bootstraps.
pub async fn run(
    config: &NetworkConfig,
) -> EyreResult<(NetworkClient, mpsc::Receiver<NetworkEvent>)> {
    let peer_id = config.identity.public().to_peer_id();

    let (client, event_receiver, event_loop) = init(peer_id, config)?;

    drop(spawn(event_loop.run()));

    for addr in &config.swarm.listen {
        client.listen_on(addr.clone()).await?;
    }

    for addr in &config.bootstrap.nodes.list {
        if let Err(err) = client.dial(addr.clone()).await {
            warn!(%err, %addr, "Failed to dial bootstrap node");
        }
    }

    if let Err(err) = client.bootstrap().await {
        warn!(%err, "Failed to bootstrap with Kademlia");
    }

    Ok((client, event_receiver))
}

fn init(
    peer_id: PeerId,
    config: &NetworkConfig,
) -> EyreResult<(NetworkClient, mpsc::Receiver<NetworkEvent>, EventLoop)> {
    let bootstrap_peers = {
        let mut peers = vec![];

        for mut addr in config.bootstrap.nodes.list.iter().cloned() {
            let Some(Protocol::P2p(peer_id)) = addr.pop() else {
                bail!("Failed to parse peer id from addr {:?}", addr);
            };

            peers.push((peer_id, addr));
        }

        peers
    };

    let swarm = SwarmBuilder::with_existing_identity(config.identity.clone())
        .with_tokio()
        .with_tcp(
            TcpConfig::default(),
            (TlsConfig::new, NoiseConfig::new),
            YamuxConfig::default,
        )?
        .with_quic()
        .with_behaviour(|key| Behaviour {
            identify: IdentifyBehaviour::new(
                IdentifyConfig::new(PROTOCOL_VERSION.to_owned(), key.public())
                    .with_push_listen_addr_updates(true),
            ),
            kad: {
                let kad_config = KadConfig::new(REPOSWARM_KAD_PROTO_NAME);

                let mut kad =
                    KadBehaviour::with_config(peer_id, MemoryStore::new(peer_id), kad_config);

                kad.set_mode(Some(Mode::Server));

                for (peer_id, addr) in bootstrap_peers {
                    let _ = kad.add_address(&peer_id, addr);
                }

                kad
            },
            ping: PingBehaviour::default(),
            stream: StreamBehaviour::new(),
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    let control = swarm.behaviour().stream.new_control();

    let (command_sender, command_receiver) = mpsc::channel(32);
    let (event_sender, event_receiver) = mpsc::channel(32);

    let client = NetworkClient::new(peer_id, command_sender, control);

    let event_loop = EventLoop::new(swarm, command_receiver, event_sender);

    Ok((client, event_receiver, event_loop))
}

pub(crate) struct EventLoop {
    swarm: Box<Swarm<Behaviour>>,
    command_receiver: mpsc::Receiver<Command>,
    event_sender: mpsc::Sender<NetworkEvent>,
    pending_dial: HashMap<PeerId, oneshot::Sender<EyreResult<Option<()>>>>,
    pending_bootstrap: HashMap<QueryId, oneshot::Sender<EyreResult<Option<()>>>>,
    pending_start_providing: HashMap<QueryId, oneshot::Sender<EyreResult<()>>>,
    pending_get_providers: HashMap<QueryId, PendingProviders>,
}

impl EventLoop {
    fn new(
        swarm: Swarm<Behaviour>,
        command_receiver: mpsc::Receiver<Command>,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            swarm: Box::new(swarm),
            command_receiver,
            event_sender,
            pending_dial: HashMap::default(),
            pending_bootstrap: HashMap::default(),
            pending_start_providing: HashMap::default(),
            pending_get_providers: HashMap::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
        loop {
            select! {
                event = self.swarm.next() => {
                    let Some(event) = event else { break };
                    self.handle_swarm_event(event).await;
                }
                command = self.command_receiver.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
            }
        }

        info!("Network event loop stopped");
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => match event {
                BehaviourEvent::Identify(event) => EventHandler::handle(self, event).await,
                BehaviourEvent::Kad(event) => EventHandler::handle(self, event).await,
                BehaviourEvent::Ping(event) => EventHandler::handle(self, event).await,
                BehaviourEvent::Stream(()) => {}
            },
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                let local_peer_id = *self.swarm.local_peer_id();
                let address = address.with(Protocol::P2p(local_peer_id));

                info!(%address, "Listening on");

                self.emit(NetworkEvent::ListeningOn {
                    listener_id,
                    address,
                })
                .await;
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                endpoint,
                num_established,
                ..
            } => {
                if endpoint.is_dialer() {
                    if let Some(sender) = self.pending_dial.remove(&peer_id) {
                        let _ = sender.send(Ok(Some(())));
                    }
                }

                if num_established.get() == 1 {
                    self.emit(NetworkEvent::Connected { peer_id }).await;
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    self.emit(NetworkEvent::Disconnected { peer_id }).await;
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if let Some(sender) = self.pending_dial.remove(&peer_id) {
                    let _ = sender.send(Err(eyre!(error)));
                }
            }
            event => debug!(?event, "Unhandled swarm event"),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::ListenOn { addr, sender } => {
                let _ = match self.swarm.listen_on(addr) {
                    Ok(_) => sender.send(Ok(())),
                    Err(err) => sender.send(Err(eyre!(err))),
                };
            }
            Command::Dial {
                mut peer_addr,
                sender,
            } => {
                let Some(Protocol::P2p(peer_id)) = peer_addr.pop() else {
                    let _ = sender.send(Err(eyre!("No peer ID in address: {}", peer_addr)));
                    return;
                };

                match self.pending_dial.entry(peer_id) {
                    hash_map::Entry::Occupied(_) => {
                        let _ = sender.send(Ok(None));
                    }
                    hash_map::Entry::Vacant(entry) => {
                        let _ = self
                            .swarm
                            .behaviour_mut()
                            .kad
                            .add_address(&peer_id, peer_addr.clone());

                        match self.swarm.dial(peer_addr.with(Protocol::P2p(peer_id))) {
                            Ok(()) => {
                                let _ = entry.insert(sender);
                            }
                            Err(err) => {
                                let _ = sender.send(Err(eyre!(err)));
                            }
                        }
                    }
                }
            }
            Command::Bootstrap { sender } => match self.swarm.behaviour_mut().kad.bootstrap() {
                Ok(query_id) => {
                    let _ = self.pending_bootstrap.insert(query_id, sender);
                }
                Err(err) => {
                    let _ = sender.send(Err(eyre!(err)));
                }
            },
            Command::StartProviding { key, sender } => {
                match self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .start_providing(RecordKey::new(&key.to_vec()))
                {
                    Ok(query_id) => {
                        let _ = self.pending_start_providing.insert(query_id, sender);
                    }
                    Err(err) => {
                        let _ = sender.send(Err(eyre!(err)));
                    }
                }
            }
            Command::GetProviders { key, max, sender } => {
                let query_id = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .get_providers(RecordKey::new(&key.to_vec()));

                debug!(%key, ?query_id, "Looking up providers");

                let _ = self
                    .pending_get_providers
                    .insert(query_id, PendingProviders::new(sender, max));
            }
            Command::PeerCount { sender } => {
                let _ = sender.send(self.swarm.connected_peers().count());
            }
        }
    }

    async fn emit(&mut self, event: NetworkEvent) {
        if self.event_sender.send(event).await.is_err() {
            debug!("Network event receiver dropped");
        }
    }
}

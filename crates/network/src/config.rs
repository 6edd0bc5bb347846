use core::fmt;

use libp2p::identity::Keypair;
use multiaddr::{Multiaddr, Protocol};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;

pub const DEFAULT_PORT: u16 = 2_428;

#[derive(Debug)]
#[non_exhaustive]
pub struct NetworkConfig {
    pub identity: Keypair,

    pub swarm: ListenConfig,
    pub bootstrap: BootstrapConfig,
}

impl NetworkConfig {
    #[must_use]
    pub const fn new(identity: Keypair, swarm: ListenConfig, bootstrap: BootstrapConfig) -> Self {
        Self {
            identity,
            swarm,
            bootstrap,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ListenConfig {
    pub listen: Vec<Multiaddr>,
}

impl ListenConfig {
    #[must_use]
    pub const fn new(listen: Vec<Multiaddr>) -> Self {
        Self { listen }
    }

    /// TCP and QUIC on every IPv4 and IPv6 interface.
    #[must_use]
    pub fn on_port(port: u16) -> Self {
        let mut listen = Vec::new();

        for host in [Protocol::Ip4([0, 0, 0, 0].into()), Protocol::Ip6([0; 16].into())] {
            listen.push(Multiaddr::empty().with(host.clone()).with(Protocol::Tcp(port)));
            listen.push(
                Multiaddr::empty()
                    .with(host)
                    .with(Protocol::Udp(port))
                    .with(Protocol::QuicV1),
            );
        }

        Self { listen }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self::on_port(DEFAULT_PORT)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[non_exhaustive]
pub struct BootstrapConfig {
    #[serde(default)]
    pub nodes: BootstrapNodes,
}

impl BootstrapConfig {
    #[must_use]
    pub const fn new(nodes: BootstrapNodes) -> Self {
        Self { nodes }
    }
}

/// Addresses of well-known peers; each must end in `/p2p/<peer id>`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
#[non_exhaustive]
pub struct BootstrapNodes {
    #[serde(deserialize_with = "deserialize_bootstrap")]
    pub list: Vec<Multiaddr>,
}

impl BootstrapNodes {
    #[must_use]
    pub const fn new(list: Vec<Multiaddr>) -> Self {
        Self { list }
    }
}

fn deserialize_bootstrap<'de, D>(deserializer: D) -> Result<Vec<Multiaddr>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BootstrapVisitor;

    impl<'de> Visitor<'de> for BootstrapVisitor {
        type Value = Vec<Multiaddr>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a list of multiaddresses ending in a peer ID")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut addrs = Vec::new();

            while let Some(addr) = seq.next_element::<Multiaddr>()? {
                let Some(Protocol::P2p(_)) = addr.iter().last() else {
                    return Err(de::Error::custom(format!(
                        "bootstrap address {addr} does not end with a peer ID"
                    )));
                };

                addrs.push(addr);
            }

            Ok(addrs)
        }
    }

    deserializer.deserialize_seq(BootstrapVisitor)
}

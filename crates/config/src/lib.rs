use core::time::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{read_to_string, write};

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result as EyreResult, WrapErr};
use libp2p_identity::Keypair;
use reposwarm_network::config::{BootstrapConfig, ListenConfig};
use reposwarm_primitives::repo::RepoId;
use reposwarm_protocols::SwarmConfig;
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;

pub const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_REPLICATION_ROOT: &str = "replicas";

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ConfigFile {
    #[serde(
        with = "serde_identity",
        default = "libp2p_identity::Keypair::generate_ed25519"
    )]
    pub identity: Keypair,

    pub network: NetworkConfig,

    #[serde(default)]
    pub swarm: TransferConfig,

    pub repos: ReposConfig,

    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct NetworkConfig {
    pub swarm: ListenConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl NetworkConfig {
    #[must_use]
    pub const fn new(swarm: ListenConfig, bootstrap: BootstrapConfig) -> Self {
        Self { swarm, bootstrap }
    }
}

/// Transfer tunables plus how often provider records are refreshed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TransferConfig {
    #[serde(flatten)]
    pub protocols: SwarmConfig,

    #[serde(rename = "announce_interval_ms", with = "serde_duration")]
    pub announce_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            protocols: SwarmConfig::default(),
            announce_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ReposConfig {
    /// Local repositories served to the swarm.
    #[serde(default)]
    pub tracked: Vec<Utf8PathBuf>,

    /// Repositories this node replicates on request.
    #[serde(default)]
    pub replicate: BTreeSet<RepoId>,

    /// Where replicas are checked out, relative to the node home.
    pub replication_root: Utf8PathBuf,
}

impl ReposConfig {
    #[must_use]
    pub const fn new(
        tracked: Vec<Utf8PathBuf>,
        replicate: BTreeSet<RepoId>,
        replication_root: Utf8PathBuf,
    ) -> Self {
        Self {
            tracked,
            replicate,
            replication_root,
        }
    }
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self::new(
            Vec::new(),
            BTreeSet::new(),
            DEFAULT_REPLICATION_ROOT.into(),
        )
    }
}

/// Who may pull what.
///
/// Addresses are base58 ed25519 public keys.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[non_exhaustive]
pub struct AccessConfig {
    /// Repositories anyone may pull.
    #[serde(default)]
    pub public: BTreeSet<RepoId>,

    /// Per-repository allow lists.
    #[serde(default)]
    pub pull: BTreeMap<RepoId, Vec<String>>,
}

impl ConfigFile {
    #[must_use]
    pub const fn new(
        identity: Keypair,
        network: NetworkConfig,
        swarm: TransferConfig,
        repos: ReposConfig,
        access: AccessConfig,
    ) -> Self {
        Self {
            identity,
            network,
            swarm,
            repos,
            access,
        }
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse configuration at {path:?}"))
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }

    /// Adds or removes `repo_id` from the replication policy.
    ///
    /// Returns whether anything changed.
    pub fn set_replicate(&mut self, repo_id: RepoId, replicate: bool) -> bool {
        if replicate {
            self.repos.replicate.insert(repo_id)
        } else {
            self.repos.replicate.remove(&repo_id)
        }
    }

    /// Adds `path` to the tracked repositories unless already present.
    pub fn track(&mut self, path: Utf8PathBuf) -> bool {
        if self.repos.tracked.contains(&path) {
            return false;
        }

        self.repos.tracked.push(path);
        true
    }
}

mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub mod serde_identity {
    use core::fmt::{self, Formatter};

    use libp2p_identity::Keypair;
    use serde::de::{self, MapAccess};
    use serde::ser::{self, SerializeMap};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut keypair = serializer.serialize_map(Some(2))?;
        keypair.serialize_entry("peer_id", &key.public().to_peer_id().to_base58())?;
        keypair.serialize_entry(
            "keypair",
            &bs58::encode(&key.to_protobuf_encoding().map_err(ser::Error::custom)?).into_string(),
        )?;
        keypair.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdentityVisitor;

        impl<'de> de::Visitor<'de> for IdentityVisitor {
            type Value = Keypair;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("an identity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut peer_id = None::<String>;
                let mut priv_key = None::<String>;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "peer_id" => peer_id = Some(map.next_value()?),
                        "keypair" => priv_key = Some(map.next_value()?),
                        _ => {
                            let _ignored: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                let peer_id = peer_id.ok_or_else(|| de::Error::missing_field("peer_id"))?;
                let priv_key = priv_key.ok_or_else(|| de::Error::missing_field("keypair"))?;

                let decoded_priv_key = bs58::decode(&priv_key)
                    .into_vec()
                    .map_err(de::Error::custom)?;

                let keypair =
                    Keypair::from_protobuf_encoding(&decoded_priv_key).map_err(de::Error::custom)?;

                if keypair.public().to_peer_id().to_base58() != peer_id {
                    return Err(de::Error::custom("peer ID does not match the keypair"));
                }

                Ok(keypair)
            }
        }

        deserializer.deserialize_map(IdentityVisitor)
    }
}

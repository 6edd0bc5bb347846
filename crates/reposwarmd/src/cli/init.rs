use std::collections::BTreeSet;
use std::fs::{create_dir, create_dir_all};

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::{bail, Result as EyreResult, WrapErr};
use libp2p_identity::Keypair;
use multiaddr::{Multiaddr, Protocol};
use reposwarm_config::{
    AccessConfig, ConfigFile, NetworkConfig, ReposConfig, TransferConfig, DEFAULT_REPLICATION_ROOT,
};
use reposwarm_network::config::{BootstrapConfig, BootstrapNodes, ListenConfig, DEFAULT_PORT};
use tracing::{info, warn};

use crate::cli::RootArgs;
use crate::defaults;

/// Initialize node configuration
#[derive(Debug, Parser)]
pub struct InitCommand {
    /// List of bootstrap nodes, each ending in /p2p/<peer id>
    #[arg(long, value_name = "ADDR")]
    pub boot_nodes: Vec<Multiaddr>,

    /// Port to listen on, for both TCP and QUIC
    #[arg(long, value_name = "PORT")]
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Where replicas are checked out, relative to the home directory
    #[arg(long, value_name = "PATH")]
    #[arg(default_value = DEFAULT_REPLICATION_ROOT)]
    pub replication_root: Utf8PathBuf,

    /// Force initialization even if the directory already exists
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let home = &root_args.home;

        if !home.exists() {
            if *home == defaults::default_node_dir() {
                create_dir_all(home)
            } else {
                create_dir(home)
            }
            .wrap_err_with(|| format!("failed to create directory {home:?}"))?;
        }

        if ConfigFile::exists(home) {
            if let Err(err) = ConfigFile::load(home) {
                if self.force {
                    warn!(%err, "Failed to load existing configuration, overwriting");
                } else {
                    bail!("failed to load existing configuration: {err}");
                }
            }

            if !self.force {
                bail!("node is already initialized in {home:?}");
            }
        }

        for addr in &self.boot_nodes {
            if !matches!(addr.iter().last(), Some(Protocol::P2p(_))) {
                bail!("bootstrap address {addr} does not end with a peer ID");
            }
        }

        let identity = Keypair::generate_ed25519();

        info!(peer_id = %identity.public().to_peer_id(), "Generated identity");

        let config = ConfigFile::new(
            identity,
            NetworkConfig::new(
                ListenConfig::on_port(self.port),
                BootstrapConfig::new(BootstrapNodes::new(self.boot_nodes)),
            ),
            TransferConfig::default(),
            ReposConfig::new(Vec::new(), BTreeSet::new(), self.replication_root),
            AccessConfig::default(),
        );

        config.save(home)?;

        info!("Initialized a node in {home:?}");

        Ok(())
    }
}

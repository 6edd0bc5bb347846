use clap::Parser;
use eyre::{bail, Result as EyreResult};
use reposwarm_config::ConfigFile;
use reposwarm_node::{start, NodeConfig};

use crate::cli::RootArgs;

/// Run a node
#[derive(Debug, Parser)]
pub struct RunCommand;

impl RunCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let home = &root_args.home;

        if !ConfigFile::exists(home) {
            bail!("Node is not initialized in {home:?}");
        }

        let config = ConfigFile::load(home)?;

        start(NodeConfig::from_file(home.clone(), config)?).await
    }
}

use clap::{ArgAction, Parser};
use eyre::{bail, Result as EyreResult};
use reposwarm_config::ConfigFile;
use reposwarm_primitives::repo::RepoId;
use tracing::info;

use crate::cli::RootArgs;

/// Choose whether this node replicates a repository on request
#[derive(Debug, Parser)]
pub struct SetReplicationPolicyCommand {
    #[arg(value_name = "REPO_ID")]
    pub repo_id: RepoId,

    #[arg(value_name = "REPLICATE", action = ArgAction::Set)]
    pub replicate: bool,
}

impl SetReplicationPolicyCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let home = &root_args.home;

        if !ConfigFile::exists(home) {
            bail!("Node is not initialized in {home:?}");
        }

        let mut config = ConfigFile::load(home)?;

        if config.set_replicate(self.repo_id.clone(), self.replicate) {
            config.save(home)?;
        }

        info!(
            repo_id = %self.repo_id,
            replicate = self.replicate,
            "Replication policy saved; takes effect on the next run"
        );

        Ok(())
    }
}

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::{bail, Result as EyreResult, WrapErr};
use reposwarm_config::ConfigFile;
use reposwarm_primitives::repo::RepoId;
use reposwarm_store::{ObjectStore, Repo};
use tokio::fs::canonicalize;
use tracing::info;

use crate::cli::RootArgs;

/// Serve a local repository to the swarm
#[derive(Debug, Parser)]
pub struct TrackCommand {
    /// Path of the repository checkout
    #[arg(value_name = "PATH")]
    pub path: Utf8PathBuf,

    /// Initialize the repository with this id if it is not one yet
    #[arg(long, value_name = "REPO_ID")]
    pub repo_id: Option<RepoId>,
}

impl TrackCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let home = &root_args.home;

        if !ConfigFile::exists(home) {
            bail!("Node is not initialized in {home:?}");
        }

        let path = canonicalize(&self.path)
            .await
            .wrap_err_with(|| format!("failed to resolve {:?}", self.path))?;
        let path = Utf8PathBuf::try_from(path)?;

        let repo = match self.repo_id {
            Some(repo_id) => Repo::open_or_init(&path, repo_id).await,
            None => Repo::open(&path).await,
        }
        .wrap_err_with(|| format!("failed to open repository at {path:?}"))?;

        let mut config = ConfigFile::load(home)?;

        if config.track(path.clone()) {
            config.save(home)?;
            info!(repo_id = %repo.repo_id(), %path, "Tracking repository");
        } else {
            info!(repo_id = %repo.repo_id(), %path, "Repository is already tracked");
        }

        Ok(())
    }
}

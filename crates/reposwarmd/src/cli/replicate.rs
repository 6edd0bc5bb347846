use clap::Parser;
use eyre::{bail, Result as EyreResult};
use futures_util::StreamExt;
use reposwarm_node::Node;
use reposwarm_primitives::repo::RepoId;
use tracing::info;

use crate::cli::{start_transient_node, RootArgs};

/// Ask the swarm's replicators to copy a tracked repository
#[derive(Debug, Parser)]
pub struct ReplicateCommand {
    #[arg(value_name = "REPO_ID")]
    pub repo_id: RepoId,
}

impl ReplicateCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let node = start_transient_node(root_args).await?;

        let result = replicate(&node, &self.repo_id).await;

        node.shutdown().await;

        result
    }
}

async fn replicate(node: &Node, repo_id: &RepoId) -> EyreResult<()> {
    let mut progress = node.replicate(repo_id.clone()).await?;

    while let Some(update) = progress.next().await {
        if let Some(error) = update.error {
            bail!("replication of {repo_id} failed: {}", error.message);
        }

        if update.done {
            info!(%repo_id, "Replicated");
            return Ok(());
        }

        info!(
            %repo_id,
            percent = update.percent(),
            current = update.current,
            total = update.total,
            "Replicating"
        );
    }

    bail!("replication of {repo_id} ended without a result")
}

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::{Result as EyreResult, WrapErr};
use futures_util::StreamExt;
use reposwarm_node::Node;
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::repo::RepoId;
use tokio::fs::File;
use tokio::io::{stdout, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::cli::{start_transient_node, RootArgs};

/// Download one object from the swarm
#[derive(Debug, Parser)]
pub struct FetchCommand {
    #[arg(value_name = "REPO_ID")]
    pub repo_id: RepoId,

    /// Hex object id: 40 digits for a legacy object, 64 for a chunk
    #[arg(value_name = "OBJECT_ID")]
    pub object_id: ObjectId,

    /// Write the content here instead of standard output
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<Utf8PathBuf>,
}

impl FetchCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let node = start_transient_node(root_args).await?;

        let result = match &self.output {
            Some(path) => {
                let mut file = File::create(path)
                    .await
                    .wrap_err_with(|| format!("failed to create {path:?}"))?;

                self.fetch_into(&node, &mut file).await
            }
            None => self.fetch_into(&node, &mut stdout()).await,
        };

        node.shutdown().await;

        result
    }

    async fn fetch_into<W>(&self, node: &Node, out: &mut W) -> EyreResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0_u64;

        if self.object_id.is_chunk() {
            let mut chunks = node.fetch_chunks(self.repo_id.clone(), vec![self.object_id]);

            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;

                if chunk.end {
                    break;
                }

                out.write_all(&chunk.data).await?;
                written = written.saturating_add(chunk.data.len() as u64);
            }
        } else {
            let object = node
                .fetch_object(self.repo_id.clone(), self.object_id)
                .await?;

            info!(object_type = ?object.object_type, "Fetched legacy object");

            out.write_all(&object.data).await?;
            written = object.data.len() as u64;
        }

        out.flush().await?;

        info!(object_id = %self.object_id, bytes = written, "Fetched object");

        Ok(())
    }
}

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use reposwarm_primitives::repo::RepoId;
use reposwarm_protocols::RepoRegistry;
use reposwarm_store::{ObjectStore, Repo, RepoManager, StoreError, METADATA_DIR};
use tokio::fs::read_dir;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "tests/registry.rs"]
mod tests;

/// Local repositories plus the set this node replicates on request.
#[derive(Debug)]
pub struct NodeRegistry {
    manager: RepoManager,
    replicate: RwLock<BTreeSet<RepoId>>,
    announcements: mpsc::UnboundedSender<RepoId>,
}

impl NodeRegistry {
    /// Finished replicas are queued on `announcements`.
    #[must_use]
    pub fn new(
        manager: RepoManager,
        replicate: BTreeSet<RepoId>,
        announcements: mpsc::UnboundedSender<RepoId>,
    ) -> Self {
        Self {
            manager,
            replicate: RwLock::new(replicate),
            announcements,
        }
    }

    #[must_use]
    pub const fn manager(&self) -> &RepoManager {
        &self.manager
    }

    pub async fn track(&self, path: &Utf8Path) -> Result<Arc<Repo>, StoreError> {
        self.manager.track(path).await
    }

    /// Tracks every checkout left under the replication root by earlier runs.
    pub async fn track_replicas(&self, replication_root: &Utf8Path) -> Result<usize, StoreError> {
        let mut entries = match read_dir(replication_root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut count = 0_usize;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(path) = Utf8PathBuf::try_from(entry.path()) else {
                debug!(path = ?entry.path(), "Skipping non UTF-8 path");
                continue;
            };

            if !path.join(METADATA_DIR).is_dir() {
                continue;
            }

            match self.manager.track(&path).await {
                Ok(_) => count = count.saturating_add(1),
                Err(err) => warn!(%path, %err, "Failed to track replica"),
            }
        }

        Ok(count)
    }

    /// Returns whether the policy changed.
    pub fn set_replicating(&self, repo_id: RepoId, replicate: bool) -> bool {
        let mut policy = self.replicate.write().unwrap_or_else(PoisonError::into_inner);

        if replicate {
            policy.insert(repo_id)
        } else {
            policy.remove(&repo_id)
        }
    }

    #[must_use]
    pub fn replicating(&self) -> Vec<RepoId> {
        self.replicate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RepoRegistry for NodeRegistry {
    fn repo(&self, repo_id: &RepoId) -> Option<Arc<dyn ObjectStore>> {
        let repo: Arc<dyn ObjectStore> = self.manager.get(repo_id)?;

        Some(repo)
    }

    fn is_replicating(&self, repo_id: &RepoId) -> bool {
        self.replicate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(repo_id)
    }

    async fn ensure_local_checkout(
        &self,
        repo_id: &RepoId,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let repo = self.manager.ensure_local_checkout_exists(repo_id).await?;

        Ok(repo)
    }

    async fn replicated(&self, repo_id: &RepoId) {
        if self.announcements.send(repo_id.clone()).is_err() {
            debug!(%repo_id, "Announcer stopped, not announcing replica");
        }
    }
}

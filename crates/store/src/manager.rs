use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use reposwarm_primitives::repo::{ContentId, RepoId};
use tracing::info;

use crate::{ObjectStore, Repo, StoreError};

#[cfg(test)]
#[path = "tests/manager.rs"]
mod tests;

/// Repositories known to this node, by id.
#[derive(Debug)]
pub struct RepoManager {
    repos: DashMap<RepoId, Arc<Repo>>,
    replication_root: Utf8PathBuf,
}

impl RepoManager {
    #[must_use]
    pub fn new(replication_root: Utf8PathBuf) -> Self {
        Self {
            repos: DashMap::new(),
            replication_root,
        }
    }

    /// Opens the repository at `path` and starts tracking it.
    pub async fn track(&self, path: &Utf8Path) -> Result<Arc<Repo>, StoreError> {
        let repo = Arc::new(Repo::open(path).await?);

        info!(repo_id=%repo.repo_id(), %path, "Tracking repository");

        drop(self.repos.insert(repo.repo_id().clone(), Arc::clone(&repo)));

        Ok(repo)
    }

    #[must_use]
    pub fn get(&self, repo_id: &RepoId) -> Option<Arc<Repo>> {
        self.repos.get(repo_id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn repo_ids(&self) -> Vec<RepoId> {
        self.repos.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the tracked repository for `repo_id`, creating a checkout under
    /// the replication root when there is none yet.
    pub async fn ensure_local_checkout_exists(
        &self,
        repo_id: &RepoId,
    ) -> Result<Arc<Repo>, StoreError> {
        if let Some(repo) = self.get(repo_id) {
            return Ok(repo);
        }

        let path = self.checkout_path(repo_id);
        let repo = Arc::new(Repo::open_or_init(&path, repo_id.clone()).await?);

        info!(%repo_id, %path, "Created local checkout");

        Ok(Arc::clone(
            self.repos
                .entry(repo_id.clone())
                .or_insert(repo)
                .value(),
        ))
    }

    /// Directory name is the id with path separators flattened plus a hash
    /// suffix so distinct ids never share a checkout.
    fn checkout_path(&self, repo_id: &RepoId) -> Utf8PathBuf {
        let readable: String = repo_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        let hex = ContentId::for_repo(repo_id).to_hex();
        let suffix = hex.get(..8).unwrap_or(&hex);

        self.replication_root.join(format!("{readable}-{suffix}"))
    }
}

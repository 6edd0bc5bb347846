use std::io::ErrorKind;

use camino::Utf8Path;
use reposwarm_primitives::repo::RepoId;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::StoreError;

pub const REPO_CONFIG_FILE: &str = "config.toml";

/// Per-repository settings kept in the metadata directory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct RepoConfig {
    pub repo_id: RepoId,
}

impl RepoConfig {
    #[must_use]
    pub const fn new(repo_id: RepoId) -> Self {
        Self { repo_id }
    }

    pub async fn load(metadata_dir: &Utf8Path) -> Result<Self, StoreError> {
        let path = metadata_dir.join(REPO_CONFIG_FILE);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotARepository(metadata_dir.to_owned()));
            }
            Err(err) => return Err(err.into()),
        };

        toml::from_str(&content).map_err(|source| StoreError::Config { path, source })
    }

    pub async fn save(&self, metadata_dir: &Utf8Path) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(self)?;

        fs::write(metadata_dir.join(REPO_CONFIG_FILE), content).await?;

        Ok(())
    }
}

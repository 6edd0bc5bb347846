#[cfg(test)]
#[path = "tests/repo.rs"]
mod tests;

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash;

const REPLICATOR_KEY_PREFIX: &[u8] = b"replicate:";

/// Identifier of a repository, e.g. `org/project`.
#[derive(
    BorshDeserialize,
    BorshSerialize,
    Clone,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId(String);

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("repository id must not be empty")]
pub struct InvalidRepoId;

impl RepoId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for RepoId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for RepoId {
    type Error = InvalidRepoId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(InvalidRepoId);
        }

        Ok(Self(value))
    }
}

impl FromStr for RepoId {
    type Err = InvalidRepoId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl From<RepoId> for String {
    fn from(id: RepoId) -> Self {
        id.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// DHT key under which peers advertise a repository.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ContentId(Hash);

impl ContentId {
    /// Key advertised by every peer holding `repo_id`.
    #[must_use]
    pub fn for_repo(repo_id: &RepoId) -> Self {
        Self(Hash::new(repo_id.as_bytes()))
    }

    /// Key advertised by peers willing to replicate `repo_id`.
    #[must_use]
    pub fn for_replicator(repo_id: &RepoId) -> Self {
        Self(Hash::of_parts(&[REPLICATOR_KEY_PREFIX, repo_id.as_bytes()]))
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Deref for ContentId {
    type Target = Hash;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

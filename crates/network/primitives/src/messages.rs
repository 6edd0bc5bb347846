//! Borsh-encoded request and response bodies, one per frame.

#[cfg(test)]
#[path = "tests/messages.rs"]
mod tests;

use borsh::{BorshDeserialize, BorshSerialize};
pub use reposwarm_primitives::progress::{ErrorKind, Progress, ProgressError};
use reposwarm_primitives::object::ObjectType;
use reposwarm_primitives::repo::RepoId;

/// Outcome of a lookup on the serving side.
#[derive(BorshDeserialize, BorshSerialize, Clone, Copy, Debug, Eq, PartialEq)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum ResponseStatus {
    Ok = 0,
    NotFound = 1,
    Unauthorized = 2,
}

impl ResponseStatus {
    /// The error kind a non-`Ok` status maps to.
    #[must_use]
    pub const fn error_kind(self) -> Option<ErrorKind> {
        match self {
            Self::Ok => None,
            Self::NotFound => Some(ErrorKind::NotFound),
            Self::Unauthorized => Some(ErrorKind::Unauthorized),
        }
    }
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct GetChunkRequest {
    pub repo_id: RepoId,
    pub chunk_id: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct GetChunkResponseHeader {
    pub status: ResponseStatus,
    pub length: u64,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct GetChunkResponsePacket {
    pub data: Vec<u8>,
    pub end: bool,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct GetObjectRequestSigned {
    pub repo_id: RepoId,
    pub object_id: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Header for a legacy object; `object_len` bytes of raw frames follow when
/// the status is `Ok`.
#[derive(BorshDeserialize, BorshSerialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct GetObjectResponse {
    pub status: ResponseStatus,
    pub object_type: Option<ObjectType>,
    pub object_len: u64,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct GetManifestRequest {
    pub repo_id: RepoId,
    pub signature: Vec<u8>,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct GetManifestResponseHeader {
    pub status: ResponseStatus,
    pub count: u64,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct ManifestPacket {
    pub object_ids: Vec<Vec<u8>>,
    pub end: bool,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct ReplicationRequest {
    pub repo_id: RepoId,
}

//! Filesystem object store for tracked and replicated repositories.
//!
//! Every repository keeps its swarm metadata under [`METADATA_DIR`]:
//!
//! ```text
//! .reposwarm/
//!   config.toml         repository id
//!   data/<hex>          one file per content chunk (32-byte ids)
//!   objects/<hex>       one file per legacy object (20-byte ids),
//!                       first byte is the object type tag
//! ```

use std::io::Error as IoError;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use reposwarm_primitives::object::{InvalidObjectId, ObjectId, ObjectType, UnknownObjectType};
use reposwarm_primitives::repo::RepoId;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod config;
pub mod manager;
pub mod repo;

pub use manager::RepoManager;
pub use repo::Repo;

pub const METADATA_DIR: &str = ".reposwarm";
pub const DATA_SUBDIR: &str = "data";
pub const OBJECTS_SUBDIR: &str = "objects";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error(transparent)]
    InvalidObjectId(#[from] InvalidObjectId),

    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("chunk digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("object {id} is corrupt")]
    Corrupt {
        id: ObjectId,
        #[source]
        source: UnknownObjectType,
    },

    #[error("{0} is not a repository")]
    NotARepository(Utf8PathBuf),

    #[error("invalid repository config at {path}")]
    Config {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to encode repository config")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// An open object: its type, byte length and a reader over its content.
pub struct ObjectReader {
    pub object_type: ObjectType,
    pub len: u64,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl core::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("object_type", &self.object_type)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Object storage of a single repository, routed by id namespace.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn repo_id(&self) -> &RepoId;

    async fn has_object(&self, id: &ObjectId) -> Result<bool, StoreError>;

    async fn open_object(&self, id: &ObjectId) -> Result<ObjectReader, StoreError>;

    /// Visits every stored id; malformed entries are skipped.
    async fn for_each_object_id(
        &self,
        visit: &mut (dyn FnMut(ObjectId) + Send),
    ) -> Result<(), StoreError>;

    /// Stores a content chunk after checking its digest against `id`.
    async fn put_chunk(&self, id: &ObjectId, data: &[u8]) -> Result<(), StoreError>;

    async fn put_object(
        &self,
        id: &ObjectId,
        object_type: ObjectType,
        data: &[u8],
    ) -> Result<(), StoreError>;

    async fn object_ids(&self) -> Result<Vec<ObjectId>, StoreError> {
        let mut ids = Vec::new();

        self.for_each_object_id(&mut |id| ids.push(id)).await?;

        Ok(ids)
    }
}

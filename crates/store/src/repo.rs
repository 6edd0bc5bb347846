use std::io::ErrorKind;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use reposwarm_primitives::object::{
    Namespace, ObjectId, ObjectType, CHUNK_ID_LEN, LEGACY_OBJECT_ID_LEN,
};
use reposwarm_primitives::repo::RepoId;
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::config::RepoConfig;
use crate::{ObjectReader, ObjectStore, StoreError, DATA_SUBDIR, METADATA_DIR, OBJECTS_SUBDIR};

#[cfg(test)]
#[path = "tests/repo.rs"]
mod tests;

/// A repository checkout with swarm metadata.
#[derive(Clone, Debug)]
pub struct Repo {
    repo_id: RepoId,
    path: Utf8PathBuf,
    metadata_dir: Utf8PathBuf,
}

impl Repo {
    /// Creates the metadata layout in `path` for `repo_id`.
    ///
    /// Initialising an already initialised repository with the same id is a
    /// no-op.
    pub async fn init(path: &Utf8Path, repo_id: RepoId) -> Result<Self, StoreError> {
        let metadata_dir = path.join(METADATA_DIR);

        fs::create_dir_all(metadata_dir.join(DATA_SUBDIR)).await?;
        fs::create_dir_all(metadata_dir.join(OBJECTS_SUBDIR)).await?;

        RepoConfig::new(repo_id.clone()).save(&metadata_dir).await?;

        debug!(%repo_id, %path, "Initialised repository");

        Ok(Self {
            repo_id,
            path: path.to_owned(),
            metadata_dir,
        })
    }

    pub async fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        let metadata_dir = path.join(METADATA_DIR);
        let config = RepoConfig::load(&metadata_dir).await?;

        fs::create_dir_all(metadata_dir.join(DATA_SUBDIR)).await?;
        fs::create_dir_all(metadata_dir.join(OBJECTS_SUBDIR)).await?;

        Ok(Self {
            repo_id: config.repo_id,
            path: path.to_owned(),
            metadata_dir,
        })
    }

    /// Opens `path` if it is a repository, initialising it for `repo_id`
    /// otherwise.
    pub async fn open_or_init(path: &Utf8Path, repo_id: RepoId) -> Result<Self, StoreError> {
        match Self::open(path).await {
            Ok(repo) => Ok(repo),
            Err(StoreError::NotARepository(_)) => Self::init(path, repo_id).await,
            Err(err) => Err(err),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn object_path(&self, id: &ObjectId) -> Utf8PathBuf {
        let subdir = match id.namespace() {
            Namespace::Legacy => OBJECTS_SUBDIR,
            Namespace::Chunk => DATA_SUBDIR,
        };

        self.metadata_dir.join(subdir).join(id.to_hex())
    }

    async fn write_atomically(&self, id: &ObjectId, parts: &[&[u8]]) -> Result<(), StoreError> {
        let path = self.object_path(id);
        let partial = path.with_extension("partial");

        let mut content = Vec::with_capacity(parts.iter().map(|part| part.len()).sum());
        for part in parts {
            content.extend_from_slice(part);
        }

        fs::write(&partial, content).await?;
        fs::rename(&partial, &path).await?;

        Ok(())
    }

    async fn visit_dir(
        dir: Utf8PathBuf,
        expected_len: usize,
        visit: &mut (dyn FnMut(ObjectId) + Send),
    ) -> Result<(), StoreError> {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();

            let Some(name) = name.to_str() else {
                warn!(%dir, ?name, "Skipping non UTF-8 object file name");
                continue;
            };

            let id = match name.parse::<ObjectId>() {
                Ok(id) if id.as_bytes().len() == expected_len => id,
                Ok(_) | Err(_) => {
                    warn!(%dir, name, "Skipping malformed object file name");
                    continue;
                }
            };

            visit(id);
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for Repo {
    fn repo_id(&self) -> &RepoId {
        &self.repo_id
    }

    async fn has_object(&self, id: &ObjectId) -> Result<bool, StoreError> {
        fs::try_exists(self.object_path(id))
            .await
            .map_err(Into::into)
    }

    async fn open_object(&self, id: &ObjectId) -> Result<ObjectReader, StoreError> {
        let mut file = match File::open(self.object_path(id)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        };

        let size = file.metadata().await?.len();

        let (object_type, len) = match id.namespace() {
            Namespace::Chunk => (ObjectType::Blob, size),
            Namespace::Legacy => {
                let tag = file.read_u8().await?;
                let object_type = ObjectType::try_from(tag)
                    .map_err(|source| StoreError::Corrupt { id: *id, source })?;

                (object_type, size.saturating_sub(1))
            }
        };

        Ok(ObjectReader {
            object_type,
            len,
            reader: Box::new(file),
        })
    }

    async fn for_each_object_id(
        &self,
        visit: &mut (dyn FnMut(ObjectId) + Send),
    ) -> Result<(), StoreError> {
        Self::visit_dir(
            self.metadata_dir.join(OBJECTS_SUBDIR),
            LEGACY_OBJECT_ID_LEN,
            visit,
        )
        .await?;

        Self::visit_dir(
            self.metadata_dir.join(DATA_SUBDIR),
            CHUNK_ID_LEN,
            visit,
        )
        .await
    }

    async fn put_chunk(&self, id: &ObjectId, data: &[u8]) -> Result<(), StoreError> {
        let actual = ObjectId::chunk_of(data);

        if !id.is_chunk() || actual != *id {
            return Err(StoreError::DigestMismatch {
                expected: *id,
                actual,
            });
        }

        self.write_atomically(id, &[data]).await?;

        debug!(repo_id=%self.repo_id, chunk_id=%id, size=data.len(), "Stored chunk");

        Ok(())
    }

    async fn put_object(
        &self,
        id: &ObjectId,
        object_type: ObjectType,
        data: &[u8],
    ) -> Result<(), StoreError> {
        if id.is_chunk() {
            return self.put_chunk(id, data).await;
        }

        self.write_atomically(id, &[&[object_type.tag()], data])
            .await?;

        debug!(repo_id=%self.repo_id, object_id=%id, ?object_type, size=data.len(), "Stored object");

        Ok(())
    }
}

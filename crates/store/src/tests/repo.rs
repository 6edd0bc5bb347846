use camino::Utf8PathBuf;
use claims::{assert_matches, assert_ok};
use tempfile::{tempdir, TempDir};
use tokio::io::AsyncReadExt;

use super::*;

async fn new_repo() -> (TempDir, Repo) {
    let dir = tempdir().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    let repo = Repo::init(&path, "org/project".parse().unwrap())
        .await
        .unwrap();

    (dir, repo)
}

#[tokio::test]
async fn open_reads_repo_id() {
    let (_dir, repo) = new_repo().await;

    let reopened = Repo::open(repo.path()).await.unwrap();

    assert_eq!(reopened.repo_id(), repo.repo_id(), "id persists on disk");
}

#[tokio::test]
async fn open_rejects_plain_directory() {
    let dir = tempdir().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    assert_matches!(Repo::open(&path).await, Err(StoreError::NotARepository(_)));
}

#[tokio::test]
async fn chunk_roundtrip() {
    let (_dir, repo) = new_repo().await;
    let data = b"some chunk bytes";
    let id = ObjectId::chunk_of(data);

    assert!(!repo.has_object(&id).await.unwrap(), "absent before put");

    repo.put_chunk(&id, data).await.unwrap();

    assert!(repo.has_object(&id).await.unwrap(), "present after put");

    let mut object = repo.open_object(&id).await.unwrap();
    let mut content = Vec::new();
    let _ = object.reader.read_to_end(&mut content).await.unwrap();

    assert_eq!(object.object_type, ObjectType::Blob, "type stored");
    assert_eq!(object.len, data.len() as u64, "length stored");
    assert_eq!(content, data, "content stored");
}

#[tokio::test]
async fn put_chunk_rejects_wrong_digest() {
    let (_dir, repo) = new_repo().await;
    let id = ObjectId::chunk_of(b"expected");

    assert_matches!(
        repo.put_chunk(&id, b"something else").await,
        Err(StoreError::DigestMismatch { .. })
    );
    assert!(!repo.has_object(&id).await.unwrap(), "nothing was written");
}

#[tokio::test]
async fn legacy_object_keeps_type() {
    let (_dir, repo) = new_repo().await;
    let id = ObjectId::try_from(&[0x11_u8; 20][..]).unwrap();

    repo.put_object(&id, ObjectType::Tree, b"tree body")
        .await
        .unwrap();

    let mut object = repo.open_object(&id).await.unwrap();
    let mut content = Vec::new();
    let _ = object.reader.read_to_end(&mut content).await.unwrap();

    assert_eq!(object.object_type, ObjectType::Tree, "type stored");
    assert_eq!(object.len, 9, "type tag is not part of the length");
    assert_eq!(content, b"tree body", "content stored");
}

#[tokio::test]
async fn namespaces_are_separate() {
    let (_dir, repo) = new_repo().await;
    let chunk = ObjectId::chunk_of(b"chunk");
    let legacy = ObjectId::try_from(&chunk.as_bytes()[..20]).unwrap();

    repo.put_chunk(&chunk, b"chunk").await.unwrap();

    assert!(
        !repo.has_object(&legacy).await.unwrap(),
        "a 20-byte prefix must not resolve into the chunk namespace"
    );
    assert_matches!(
        repo.open_object(&legacy).await,
        Err(StoreError::NotFound(_))
    );
}

#[tokio::test]
async fn for_each_skips_malformed_entries() {
    let (_dir, repo) = new_repo().await;
    let chunk = ObjectId::chunk_of(b"chunk");
    let legacy = ObjectId::try_from(&[0x22_u8; 20][..]).unwrap();

    repo.put_chunk(&chunk, b"chunk").await.unwrap();
    repo.put_object(&legacy, ObjectType::Commit, b"commit")
        .await
        .unwrap();

    let data_dir = repo.path().join(METADATA_DIR).join(DATA_SUBDIR);
    fs::write(data_dir.join("not-hex"), b"junk").await.unwrap();
    fs::write(data_dir.join("abcd"), b"short").await.unwrap();
    fs::write(data_dir.join(legacy.to_hex()), b"wrong dir")
        .await
        .unwrap();

    let mut ids = assert_ok!(repo.object_ids().await);
    ids.sort();

    let mut expected = vec![chunk, legacy];
    expected.sort();

    assert_eq!(ids, expected, "only well-formed ids are visited");
}

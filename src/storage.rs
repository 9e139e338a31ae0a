//! Activity file attachments on disk.
//!
//! Layout: `<root>/<activity_id>/<file_id>` blobs next to a
//! `<root>/<activity_id>/manifest.json` listing them.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

const MANIFEST: &str = "manifest.json";
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Corrupt file manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("File not found")]
    NotFound,

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    pub uploaded_at: NaiveDateTime,
    #[serde(default)]
    pub uploaded_by: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    files: Vec<StoredFile>,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    /// One lock per activity folder; held across manifest read and rewrite.
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

fn check_segment(segment: &str) -> Result<(), StorageError> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(segment.to_string()))
    }
}

fn check_display_name(name: &str) -> Result<(), StorageError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.len() > MAX_NAME_LEN
        || trimmed.chars().any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl FileStorage {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: Arc::default(),
        })
    }

    fn activity_lock(&self, activity_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(activity_id.to_string()).or_default().clone()
    }

    fn activity_dir(&self, activity_id: &str) -> Result<PathBuf, StorageError> {
        check_segment(activity_id)?;
        Ok(self.root.join(activity_id))
    }

    async fn read_manifest(dir: &Path) -> Result<Manifest, StorageError> {
        match fs::read(dir.join(MANIFEST)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), StorageError> {
        let tmp = dir.join(format!("{MANIFEST}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(manifest)?).await?;
        fs::rename(tmp, dir.join(MANIFEST)).await?;
        Ok(())
    }

    pub async fn list(&self, activity_id: &str) -> Result<Vec<StoredFile>, StorageError> {
        let dir = self.activity_dir(activity_id)?;
        Ok(Self::read_manifest(&dir).await?.files)
    }

    pub async fn save(
        &self,
        activity_id: &str,
        name: &str,
        content_type: &str,
        bytes: &[u8],
        uploaded_by: Option<String>,
    ) -> Result<StoredFile, StorageError> {
        check_display_name(name)?;
        let dir = self.activity_dir(activity_id)?;
        fs::create_dir_all(&dir).await?;

        let file = StoredFile {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
            uploaded_at: Utc::now().naive_utc(),
            uploaded_by,
        };

        // Blob first: a manifest entry never points at a missing blob.
        fs::write(dir.join(&file.id), bytes).await?;
        let lock = self.activity_lock(activity_id);
        let _guard = lock.lock().await;
        let mut manifest = Self::read_manifest(&dir).await?;
        manifest.files.push(file.clone());
        Self::write_manifest(&dir, &manifest).await?;

        debug!("Stored file {} ({} bytes) for activity {}", file.id, file.size, activity_id);
        Ok(file)
    }

    pub async fn read(
        &self,
        activity_id: &str,
        file_id: &str,
    ) -> Result<(StoredFile, Vec<u8>), StorageError> {
        check_segment(file_id)?;
        let dir = self.activity_dir(activity_id)?;
        let manifest = Self::read_manifest(&dir).await?;
        let file = manifest
            .files
            .into_iter()
            .find(|f| f.id == file_id)
            .ok_or(StorageError::NotFound)?;

        match fs::read(dir.join(file_id)).await {
            Ok(bytes) => Ok((file, bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, activity_id: &str, file_id: &str) -> Result<StoredFile, StorageError> {
        check_segment(file_id)?;
        let dir = self.activity_dir(activity_id)?;
        let lock = self.activity_lock(activity_id);
        let _guard = lock.lock().await;
        let mut manifest = Self::read_manifest(&dir).await?;
        let index = manifest
            .files
            .iter()
            .position(|f| f.id == file_id)
            .ok_or(StorageError::NotFound)?;
        let file = manifest.files.remove(index);
        Self::write_manifest(&dir, &manifest).await?;

        match fs::remove_file(dir.join(file_id)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(file),
        }
    }

    /// Removes every file of the activity. Returns how many the manifest
    /// listed; a missing folder counts as zero. Ids that cannot name a folder
    /// never had files stored under them, so they count as zero too.
    pub async fn remove_activity(&self, activity_id: &str) -> Result<usize, StorageError> {
        let dir = match self.activity_dir(activity_id) {
            Ok(dir) => dir,
            Err(StorageError::InvalidName(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let lock = self.activity_lock(activity_id);
        let _guard = lock.lock().await;
        let count = match Self::read_manifest(&dir).await {
            Ok(manifest) => manifest.files.len(),
            // A broken manifest must not keep the blobs alive.
            Err(StorageError::Manifest(_)) => 0,
            Err(e) => return Err(e),
        };

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_save_list_read_delete() {
        let root = temp_dir("ansattportal-files");
        let storage = FileStorage::open(&root).await.unwrap();

        let saved = storage
            .save("act-1", "agenda.pdf", "application/pdf", b"%PDF-1.4", Some("u1".into()))
            .await
            .unwrap();
        assert_eq!(saved.size, 8);
        assert_eq!(saved.sha256.len(), 64);

        let listed = storage.list("act-1").await.unwrap();
        assert_eq!(listed, vec![saved.clone()]);

        let (meta, bytes) = storage.read("act-1", &saved.id).await.unwrap();
        assert_eq!(meta.name, "agenda.pdf");
        assert_eq!(bytes, b"%PDF-1.4");

        storage.delete("act-1", &saved.id).await.unwrap();
        assert!(storage.list("act-1").await.unwrap().is_empty());
        assert!(matches!(
            storage.read("act-1", &saved.id).await,
            Err(StorageError::NotFound)
        ));

        fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn test_rejects_path_tricks() {
        let root = temp_dir("ansattportal-files");
        let storage = FileStorage::open(&root).await.unwrap();

        assert!(matches!(
            storage.list("../etc").await,
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            storage.save("act-1", "a/b.txt", "text/plain", b"x", None).await,
            Err(StorageError::InvalidName(_))
        ));

        fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn test_remove_activity_is_idempotent() {
        let root = temp_dir("ansattportal-files");
        let storage = FileStorage::open(&root).await.unwrap();
        storage
            .save("act-2", "a.txt", "text/plain", b"a", None)
            .await
            .unwrap();
        storage
            .save("act-2", "b.txt", "text/plain", b"b", None)
            .await
            .unwrap();

        assert_eq!(storage.remove_activity("act-2").await.unwrap(), 2);
        assert_eq!(storage.remove_activity("act-2").await.unwrap(), 0);

        fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn test_remove_activity_with_unstorable_id_removes_nothing() {
        let root = temp_dir("ansattportal-files");
        let storage = FileStorage::open(&root).await.unwrap();

        assert_eq!(storage.remove_activity("legacy.42").await.unwrap(), 0);
        assert_eq!(storage.remove_activity("../etc").await.unwrap(), 0);

        fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_uploads_keep_every_manifest_entry() {
        let root = temp_dir("ansattportal-files");
        let storage = FileStorage::open(&root).await.unwrap();

        let mut uploads = tokio::task::JoinSet::new();
        for i in 0..16 {
            let storage = storage.clone();
            uploads.spawn(async move {
                storage
                    .save("act-3", &format!("fil-{i}.txt"), "text/plain", b"data", None)
                    .await
                    .unwrap()
            });
        }
        let mut saved = Vec::new();
        while let Some(file) = uploads.join_next().await {
            saved.push(file.unwrap().id);
        }

        let mut listed: Vec<String> = storage
            .list("act-3")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        listed.sort();
        saved.sort();
        assert_eq!(listed, saved);

        fs::remove_dir_all(root).await.ok();
    }
}

//! Full-snapshot persistence of a [`VectorStore`].
//!
//! A snapshot is a bincode-encoded envelope around the encoded store plus a
//! sha256 checksum of that payload. Saving writes a sibling temp file and
//! renames it over the destination, so a reader only ever sees a previous
//! complete snapshot or the new one.

use crate::error::StoreError;
use crate::models::RetrievalOptions;
use crate::store::VectorStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, store: &VectorStore) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing has been persisted yet.
    async fn load(&self) -> Result<Option<VectorStore>, StoreError>;

    /// Like [`SnapshotStore::load`], but a corrupt snapshot also counts as absent.
    async fn load_or_absent(&self) -> Option<VectorStore> {
        match self.load().await {
            Ok(store) => store,
            Err(error) => {
                warn!(%error, "persisted store unreadable, treating as absent");
                None
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    format_version: u32,
    saved_at: DateTime<Utc>,
    checksum: String,
    payload: Vec<u8>,
}

/// Snapshot file addressed by a single name under an application data root.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
    file_name: String,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Result<Self, StoreError> {
        let file_name = file_name.into();
        let is_plain_name = !file_name.trim().is_empty()
            && Path::new(&file_name).file_name().and_then(|name| name.to_str())
                == Some(file_name.as_str());

        if !is_plain_name {
            return Err(StoreError::InvalidName(file_name));
        }

        Ok(Self {
            root: root.into(),
            file_name,
        })
    }

    pub fn with_options(root: &Path, options: &RetrievalOptions) -> Result<Self, StoreError> {
        Self::new(root, options.store_file.clone())
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.file_name)
    }

    fn staging_path(&self) -> PathBuf {
        self.root.join(format!("{}.tmp", self.file_name))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, store: &VectorStore) -> Result<(), StoreError> {
        if !store.is_complete() {
            return Err(StoreError::Inconsistent(
                "refusing to persist a store with unembedded fragments".to_string(),
            ));
        }

        let bytes = encode_snapshot(store)?;
        let destination = self.path();
        let staging = self.staging_path();

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&staging, &bytes).await?;
        if tokio::fs::try_exists(&destination).await? {
            tokio::fs::remove_file(&destination).await?;
        }
        tokio::fs::rename(&staging, &destination).await?;

        info!(
            path = %destination.display(),
            fragments = store.len(),
            bytes = bytes.len(),
            "vector store saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<VectorStore>, StoreError> {
        let path = self.path();
        if !tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "no persisted vector store");
            return Ok(None);
        }

        let bytes = tokio::fs::read(&path).await?;
        let store = decode_snapshot(&bytes)?;
        info!(path = %path.display(), fragments = store.len(), "vector store loaded");
        Ok(Some(store))
    }
}

fn checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

pub fn encode_snapshot(store: &VectorStore) -> Result<Vec<u8>, StoreError> {
    let payload = bincode::serialize(store)?;
    let snapshot = StoreSnapshot {
        format_version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        checksum: checksum(&payload),
        payload,
    };
    Ok(bincode::serialize(&snapshot)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<VectorStore, StoreError> {
    let snapshot: StoreSnapshot = bincode::deserialize(bytes)?;
    if snapshot.format_version != SNAPSHOT_VERSION {
        return Err(StoreError::UnsupportedVersion(snapshot.format_version));
    }

    let found = checksum(&snapshot.payload);
    if found != snapshot.checksum {
        return Err(StoreError::ChecksumMismatch {
            expected: snapshot.checksum,
            found,
        });
    }

    let decoded: VectorStore = bincode::deserialize(&snapshot.payload)?;
    // Re-inserting re-checks every vector length against the dimensionality.
    let (dimensions, fragments) = decoded.into_parts();
    let store = VectorStore::from_fragments(dimensions, fragments)?;
    if !store.is_complete() {
        return Err(StoreError::Inconsistent(
            "snapshot contains unembedded fragments".to_string(),
        ));
    }

    debug!(saved_at = %snapshot.saved_at, "snapshot decoded");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fragment;
    use tempfile::tempdir;

    fn ready_store() -> VectorStore {
        let fragments = (0..4u64)
            .map(|position| {
                let mut fragment =
                    Fragment::new(position, position as u32 / 2 + 1, format!("line {position}"));
                fragment.vector = Some(vec![position as f32 * 0.25, 0.5, -0.125]);
                fragment
            })
            .collect();
        VectorStore::from_fragments(3, fragments).unwrap()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let snapshots = FileSnapshotStore::new(dir.path(), "vectors.vec")?;
        let store = ready_store();

        snapshots.save(&store).await?;
        let loaded = snapshots.load().await?.expect("store should be persisted");

        assert_eq!(loaded, store);
        assert!(!snapshots.staging_path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_absent_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let snapshots = FileSnapshotStore::new(dir.path().join("never-created"), "vectors.vec")?;
        assert!(snapshots.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let snapshots = FileSnapshotStore::new(dir.path(), "vectors.vec")?;

        snapshots.save(&ready_store()).await?;
        let smaller = VectorStore::from_fragments(3, ready_store().fragments()[..1].to_vec())?;
        snapshots.save(&smaller).await?;

        let loaded = snapshots.load().await?.expect("store should be persisted");
        assert_eq!(loaded.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_absent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let snapshots = FileSnapshotStore::new(dir.path(), "vectors.vec")?;
        snapshots.save(&ready_store()).await?;

        let mut bytes = std::fs::read(snapshots.path())?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(snapshots.path(), &bytes)?;

        assert!(snapshots.load().await.is_err());
        assert!(snapshots.load_or_absent().await.is_none());

        std::fs::write(snapshots.path(), b"not a snapshot")?;
        assert!(snapshots.load_or_absent().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn incomplete_store_is_not_persisted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let snapshots = FileSnapshotStore::new(dir.path(), "vectors.vec")?;
        let store = VectorStore::from_fragments(3, vec![Fragment::new(0, 1, "pending")])?;

        let result = snapshots.save(&store).await;
        assert!(matches!(result, Err(StoreError::Inconsistent(_))));
        assert!(!snapshots.path().exists());
        Ok(())
    }

    #[test]
    fn options_name_the_snapshot_file() -> Result<(), Box<dyn std::error::Error>> {
        let options = RetrievalOptions::default();
        let snapshots = FileSnapshotStore::with_options(Path::new("/data"), &options)?;
        assert_eq!(snapshots.path(), PathBuf::from("/data/vectors.vec"));
        Ok(())
    }

    #[test]
    fn file_name_must_be_a_single_component() {
        assert!(FileSnapshotStore::new("/tmp", "vectors.vec").is_ok());
        assert!(FileSnapshotStore::new("/tmp", "../vectors.vec").is_err());
        assert!(FileSnapshotStore::new("/tmp", "nested/vectors.vec").is_err());
        assert!(FileSnapshotStore::new("/tmp", " ").is_err());
    }
}

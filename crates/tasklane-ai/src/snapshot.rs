//! Durable storage for model snapshots.
//!
//! Snapshots are opaque bytes produced by a provider's codec. The store only
//! moves them to and from disk; validation belongs to the provider.

use std::path::{Path, PathBuf};
use tasklane_core::{ModelRole, Result, TaskLaneError};
use tracing::debug;

/// Where model snapshots are persisted between processes.
pub trait SnapshotStore: Send + Sync {
    /// Read the snapshot for `role`, or `None` if there is none.
    fn read(&self, role: ModelRole) -> Result<Option<Vec<u8>>>;

    /// Replace the snapshot for `role`.
    fn write(&self, role: ModelRole, bytes: &[u8]) -> Result<()>;

    /// Remove the snapshot for `role`. Removing an absent snapshot is not an error.
    fn remove(&self, role: ModelRole) -> Result<()>;
}

/// One JSON file per role under a cache directory.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the platform cache directory (`~/.cache/tasklane/models`
    /// on Linux), falling back to a relative `.tasklane/models`.
    pub fn default_location() -> Self {
        let dir = dirs::cache_dir()
            .map(|d| d.join("tasklane").join("models"))
            .unwrap_or_else(|| PathBuf::from(".tasklane").join("models"));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot path for a role.
    pub fn path_for(&self, role: ModelRole) -> PathBuf {
        self.dir.join(role.snapshot_name())
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn read(&self, role: ModelRole) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(role);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(role = %role, path = %path.display(), bytes = bytes.len(), "Read snapshot");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, role: ModelRole, bytes: &[u8]) -> Result<()> {
        let write_failed = |e: std::io::Error| TaskLaneError::SnapshotWriteFailed {
            role,
            reason: e.to_string(),
        };

        std::fs::create_dir_all(&self.dir).map_err(write_failed)?;

        // Write-then-rename so readers never see a half-written snapshot.
        let path = self.path_for(role);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, bytes).map_err(write_failed)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_failed(e));
        }

        debug!(role = %role, path = %path.display(), bytes = bytes.len(), "Wrote snapshot");
        Ok(())
    }

    fn remove(&self, role: ModelRole) -> Result<()> {
        match std::fs::remove_file(self.path_for(role)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A store that never persists anything, for `--no-model-cache` runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSnapshotStore;

impl SnapshotStore for NullSnapshotStore {
    fn read(&self, _role: ModelRole) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn write(&self, _role: ModelRole, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _role: ModelRole) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_absent_is_none() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let store = FsSnapshotStore::new(tmp.path().join("models"));
        assert!(store.read(ModelRole::Vision).unwrap().is_none());
    }

    #[test]
    fn test_write_read_remove() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let store = FsSnapshotStore::new(tmp.path().join("models"));

        store.write(ModelRole::Vision, b"{\"v\":1}").unwrap();
        assert_eq!(
            store.read(ModelRole::Vision).unwrap().as_deref(),
            Some(&b"{\"v\":1}"[..])
        );
        // Other roles are untouched.
        assert!(store.read(ModelRole::Transcription).unwrap().is_none());

        store.remove(ModelRole::Vision).unwrap();
        assert!(store.read(ModelRole::Vision).unwrap().is_none());
        // Second remove is a no-op.
        store.remove(ModelRole::Vision).unwrap();
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let store = FsSnapshotStore::new(tmp.path());
        store.write(ModelRole::Transcription, b"a").unwrap();
        store.write(ModelRole::Transcription, b"b").unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["transcription.snapshot.json".to_string()]);
    }

    #[test]
    fn test_write_into_unwritable_location_fails_as_snapshot_error() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        // A regular file where the directory should be.
        let blocker = tmp.path().join("models");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let store = FsSnapshotStore::new(&blocker);
        let err = store.write(ModelRole::Vision, b"x").unwrap_err();
        assert!(matches!(err, TaskLaneError::SnapshotWriteFailed { .. }));
        assert!(!err.is_fatal());
    }
}

#![forbid(unsafe_code)]

//! Lookup and removal of finished downloads by identifier.

use std::path::PathBuf;

use crate::store::{DownloadStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Name advertised in `Content-Disposition`.
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed(String),
    RemovedAll,
}

impl CleanupOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Removed(id) => format!("Cleaned up download {id}"),
            Self::RemovedAll => "Cleaned up all downloads".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalService {
    store: DownloadStore,
}

impl RetrievalService {
    pub fn new(store: DownloadStore) -> Self {
        Self { store }
    }

    pub fn open(&self, id: &str, filename: &str) -> Result<StoredFile, StoreError> {
        let path = self.store.resolve(id, filename)?;
        Ok(StoredFile {
            path,
            filename: filename.to_string(),
        })
    }

    /// Removes one download, or every download when no id is given.
    pub fn cleanup(&self, id: Option<&str>) -> Result<CleanupOutcome, StoreError> {
        match id {
            Some(id) => {
                self.store.remove(id)?;
                tracing::info!(download_id = id, "download removed");
                Ok(CleanupOutcome::Removed(id.to_string()))
            }
            None => {
                self.store.remove_all()?;
                tracing::warn!(root = %self.store.root().display(), "all downloads removed");
                Ok(CleanupOutcome::RemovedAll)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn service_with_file() -> (TempDir, RetrievalService, String) {
        let temp = TempDir::new().unwrap();
        let store = DownloadStore::open(temp.path()).unwrap();
        let slot = store.begin_download().unwrap();
        fs::write(slot.dir.join("clip.mp4"), b"data").unwrap();
        (temp, RetrievalService::new(store), slot.id.to_string())
    }

    #[test]
    fn open_returns_path_and_name() {
        let (_temp, service, id) = service_with_file();
        let file = service.open(&id, "clip.mp4").unwrap();
        assert_eq!(file.filename, "clip.mp4");
        assert_eq!(fs::read(&file.path).unwrap(), b"data");
    }

    #[test]
    fn removed_download_is_no_longer_served() {
        let (_temp, service, id) = service_with_file();
        assert_eq!(
            service.cleanup(Some(&id)).unwrap(),
            CleanupOutcome::Removed(id.clone())
        );
        assert!(matches!(
            service.open(&id, "clip.mp4"),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            service.cleanup(Some(&id)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn cleanup_without_id_removes_everything() {
        let (_temp, service, id) = service_with_file();
        assert_eq!(service.cleanup(None).unwrap(), CleanupOutcome::RemovedAll);
        assert!(service.open(&id, "clip.mp4").is_err());
        assert_eq!(
            CleanupOutcome::RemovedAll.message(),
            "Cleaned up all downloads"
        );
    }
}

#![forbid(unsafe_code)]

//! On-disk layout of finished downloads.
//!
//! Every download owns exactly one directory `<root>/<id>/`; the directory's
//! existence is what "this download is available" means. Nothing else is
//! tracked, so removing the directory is the whole cleanup.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;

use crate::extractor::ExtractionResult;
use crate::identifier::DownloadId;
use crate::sanitize::{FALLBACK_EXTENSION, compose_filename, sanitize_extension};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The extractor reported success but left no usable file behind.
    #[error("downloaded file not found at {}", .0.display())]
    FileMissing(PathBuf),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Freshly created, still empty storage for one download.
#[derive(Debug, Clone)]
pub struct DownloadSlot {
    pub id: DownloadId,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub directory: PathBuf,
    /// Name the extractor wrote the file under.
    pub raw_filename: String,
    pub filename: String,
    pub file_size: u64,
    pub extension: String,
}

#[derive(Debug, Clone)]
pub struct DownloadStore {
    root: PathBuf,
}

impl DownloadStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn begin_download(&self) -> io::Result<DownloadSlot> {
        let id = DownloadId::generate();
        let dir = self.root.join(id.to_string());
        fs::create_dir_all(&dir)?;
        Ok(DownloadSlot { id, dir })
    }

    /// Locates the file the extractor wrote into the slot, renames it to its
    /// sanitized name and measures it.
    pub fn finalize(
        &self,
        slot: &DownloadSlot,
        result: &ExtractionResult,
    ) -> Result<DownloadRecord, StoreError> {
        let title = result.title.clone().unwrap_or_default();
        let reported_ext = result
            .ext
            .clone()
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());

        let expected = slot.dir.join(format!("{title}.{reported_ext}"));
        let source = candidate_files(slot, result)
            .into_iter()
            .find(|path| is_non_empty_file(path))
            .ok_or(StoreError::FileMissing(expected))?;

        let raw_filename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source
            .extension()
            .map(|ext| sanitize_extension(&ext.to_string_lossy()))
            .unwrap_or_else(|| sanitize_extension(&reported_ext));

        let filename = compose_filename(&slot.id, &title, &extension);
        let target = slot.dir.join(&filename);
        fs::rename(&source, &target)?;
        let file_size = fs::metadata(&target)?.len();

        Ok(DownloadRecord {
            id: slot.id,
            directory: slot.dir.clone(),
            raw_filename,
            filename,
            file_size,
            extension,
        })
    }

    pub fn resolve(&self, id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        let dir = self.download_dir(id)?;
        if !is_safe_segment(filename) {
            return Err(StoreError::NotFound);
        }
        let path = dir.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreError::NotFound)
        }
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let dir = self.download_dir(id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Drops every stored download and leaves an empty root behind.
    pub fn remove_all(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn download_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_segment(id) || DownloadId::parse(id).is_none() {
            return Err(StoreError::NotFound);
        }
        let dir = self.root.join(id);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(StoreError::NotFound)
        }
    }
}

/// True when `value` is exactly one normal path component with no separator
/// of either platform and no parent reference.
pub fn is_safe_segment(value: &str) -> bool {
    !value.contains("..") && is_single_component(value)
}

/// Extractor-written names may legitimately contain `..` (titles ending in an
/// ellipsis), so only separators and non-normal components are refused here.
fn is_single_component(value: &str) -> bool {
    if value.is_empty() || value.contains('/') || value.contains('\\') || value.contains('\0') {
        return false;
    }
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn candidate_files(slot: &DownloadSlot, result: &ExtractionResult) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(name) = result.reported_file_name()
        && is_single_component(&name)
    {
        candidates.push(slot.dir.join(name));
    }
    if let Some(title) = &result.title {
        let ext = result.ext.as_deref().unwrap_or(FALLBACK_EXTENSION);
        let name = format!("{title}.{ext}");
        if is_single_component(&name) {
            candidates.push(slot.dir.join(name));
        }
    }
    candidates
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

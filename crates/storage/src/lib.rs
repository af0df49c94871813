//! Durable storage for the document shelf.
//!
//! Everything lives under one application-private data directory:
//!
//! - `pdf_cache.json`: the index of every imported document, keyed by id
//! - `pdfs/<id>.pdf`: the imported source bytes
//! - `thumbnails/`: preview images, owned by the preview cache

mod index;
mod store;

pub use index::DocumentIndex;
pub use store::{PersistentStore, RecordMap};

use directories::ProjectDirs;
use doc_model::{AnnotationId, DocumentId};
use std::fs;
use std::path::{Path, PathBuf};

const CACHE_FILE: &str = "pdf_cache.json";
const PDF_DIR: &str = "pdfs";
const THUMBNAIL_DIR: &str = "thumbnails";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),
    #[error("annotation {annotation_id} not found in document {document_id}")]
    AnnotationNotFound { document_id: DocumentId, annotation_id: AnnotationId },
    #[error("page {page} out of range (page_count={page_count})")]
    InvalidPageNumber { page: u32, page_count: u32 },
    #[error("document index used before it was loaded")]
    NotLoaded,
}

/// Resolved locations inside the data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("dev", "Shelf", "Shelf").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join(PDF_DIR)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.root.join(THUMBNAIL_DIR)
    }

    pub fn source_path(&self, id: &DocumentId) -> PathBuf {
        self.pdf_dir().join(format!("{id}.pdf"))
    }

    pub fn ensure_directories(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.pdf_dir())?;
        fs::create_dir_all(self.thumbnail_dir())?;
        Ok(())
    }

    /// Writes imported bytes to `pdfs/<id>.pdf` and returns the path.
    pub fn write_source(&self, id: &DocumentId, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(self.pdf_dir())?;
        let path = self.source_path(id);
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Removes a file, treating an already-missing file as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

//! Caller-facing error taxonomy.

use doc_model::{AnnotationId, DocumentId};
use pdf_engine::PdfEngineError;
use shelf_cache::{CacheError, ConfigError};
use std::fmt;
use storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundKind {
    Document(DocumentId),
    Annotation { document_id: DocumentId, annotation_id: AnnotationId },
    Preview { document_id: DocumentId, page: u32 },
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document(id) => write!(f, "document {id}"),
            Self::Annotation { document_id, annotation_id } => {
                write!(f, "annotation {annotation_id} in document {document_id}")
            }
            Self::Preview { document_id, page } => {
                write!(f, "preview of page {page} in document {document_id}")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShelfError {
    #[error("{0} not found")]
    NotFound(NotFoundKind),
    #[error("page {page} out of range (page_count={page_count})")]
    OutOfRange { page: u32, page_count: u32 },
    #[error("failed to decode document: {0}")]
    Decode(String),
    #[error("failed to render page: {0}")]
    Render(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("engine used before initialization completed")]
    NotInitialized,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type ShelfResult<T> = Result<T, ShelfError>;

impl ShelfError {
    pub fn document_not_found(id: &DocumentId) -> Self {
        Self::NotFound(NotFoundKind::Document(id.clone()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StorageError> for ShelfError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DocumentNotFound(id) => Self::NotFound(NotFoundKind::Document(id)),
            StorageError::AnnotationNotFound { document_id, annotation_id } => {
                Self::NotFound(NotFoundKind::Annotation { document_id, annotation_id })
            }
            StorageError::InvalidPageNumber { page, page_count } => {
                Self::OutOfRange { page, page_count }
            }
            StorageError::Io(err) => Self::Io(err),
            StorageError::Serde(err) => Self::Serialization(err),
            StorageError::NotLoaded => Self::NotInitialized,
            StorageError::NoDataDirectory => Self::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "unable to resolve local data directory",
            )),
        }
    }
}

impl From<PdfEngineError> for ShelfError {
    fn from(err: PdfEngineError) -> Self {
        match err {
            PdfEngineError::PageOutOfRange { page, page_count } => {
                Self::OutOfRange { page: page + 1, page_count }
            }
            PdfEngineError::Io(err) => Self::Io(err),
            err if err.is_decode() => Self::Decode(err.to_string()),
            err => Self::Render(err.to_string()),
        }
    }
}

impl From<CacheError> for ShelfError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(key) => Self::NotFound(NotFoundKind::Preview {
                document_id: key.document_id().clone(),
                page: key.page(),
            }),
            CacheError::Io(err) => Self::Io(err),
        }
    }
}

impl From<image::ImageError> for ShelfError {
    fn from(err: image::ImageError) -> Self {
        Self::Render(format!("image encoding failed: {err}"))
    }
}

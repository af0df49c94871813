//! Disk tier of the preview cache.
//!
//! One file per key under the thumbnails directory. The tier is unbounded:
//! files are only removed through [`DiskTier::remove_document`].

use crate::config::PreviewFormat;
use crate::key::{belongs_to, sanitize_id, PreviewKey};
use doc_model::DocumentId;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
    format: PreviewFormat,
}

impl DiskTier {
    /// Creates the tier, creating `dir` if it does not exist.
    pub fn new<P: AsRef<Path>>(dir: P, format: PreviewFormat) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, format })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> PreviewFormat {
        self.format
    }

    /// Path new entries are written to.
    pub fn path_for(&self, key: &PreviewKey) -> PathBuf {
        self.path_with(key, self.format)
    }

    fn path_with(&self, key: &PreviewKey, format: PreviewFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", key.file_stem(), format.extension()))
    }

    /// Existing file for `key` in any known format, preferring the
    /// configured one.
    fn existing_path(&self, key: &PreviewKey) -> Option<PathBuf> {
        std::iter::once(self.format)
            .chain(PreviewFormat::ALL.into_iter().filter(|format| *format != self.format))
            .map(|format| self.path_with(key, format))
            .find(|path| path.is_file())
    }

    pub fn contains(&self, key: &PreviewKey) -> bool {
        self.existing_path(key).is_some()
    }

    /// Stores the bytes for `key` and returns the file path.
    ///
    /// An entry already on disk is immutable and is kept as is. New bytes go
    /// to a synced temp file that is renamed onto the final path, so readers
    /// never see a partial file.
    pub fn write(&self, key: &PreviewKey, bytes: &[u8]) -> io::Result<PathBuf> {
        if let Some(existing) = self.existing_path(key) {
            log::debug!("preview {key} already on disk, keeping {}", existing.display());
            return Ok(existing);
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!(".{}-{}.tmp", key.file_stem(), Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, bytes) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        Ok(path)
    }

    /// Reads the bytes for `key`, `Ok(None)` if no file exists.
    pub fn read(&self, key: &PreviewKey) -> io::Result<Option<Vec<u8>>> {
        let Some(path) = self.existing_path(key) else {
            return Ok(None);
        };

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Removes every preview file of one document. Returns how many files
    /// were deleted.
    pub fn remove_document(&self, document_id: &DocumentId) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let sanitized = sanitize_id(document_id.as_str());
        let extensions: Vec<&str> =
            PreviewFormat::ALL.iter().map(|format| format.extension()).collect();
        let mut removed = 0;

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if !belongs_to(name, &sanitized, &extensions) {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        Ok(removed)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

use crate::StorageError;
use doc_model::{CacheRecord, DocumentId};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub type RecordMap = BTreeMap<DocumentId, CacheRecord>;

/// The `pdf_cache.json` file.
///
/// The whole mapping is rewritten on every save. Writes go to a sibling
/// temp file which is then renamed over the real one, so a crash mid-write
/// leaves the previous index intact.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    path: PathBuf,
}

impl PersistentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RecordMap, StorageError> {
        if !self.path.exists() {
            log::info!("no index at {}, starting empty", self.path.display());
            return Ok(RecordMap::new());
        }

        let bytes = fs::read(&self.path)?;
        let mut records: RecordMap = serde_json::from_slice(&bytes)?;
        for record in records.values_mut() {
            record.relink_annotations();
        }

        log::info!("loaded {} documents from {}", records.len(), self.path.display());
        Ok(records)
    }

    pub fn save_all(&self, records: &RecordMap) -> Result<(), StorageError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp_path = dir.join(format!(".pdf_cache-{}.tmp", uuid::Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, &bytes) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        log::debug!("saved index: {} bytes, {} documents", bytes.len(), records.len());
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

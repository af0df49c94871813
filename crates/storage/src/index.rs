use crate::store::{PersistentStore, RecordMap};
use crate::StorageError;
use chrono::Utc;
use doc_model::{
    Annotation, AnnotationId, AnnotationPatch, CacheRecord, DocumentId, DocumentRecord,
    NewAnnotation, ProgressUpdate, ReadingProgress,
};

/// In-memory mirror of [`PersistentStore`].
///
/// Every mutating call is applied to a copy of the affected record, the whole
/// mapping is saved, and only then is the copy committed. A failed save
/// leaves the in-memory state exactly as it was and returns the error.
#[derive(Debug)]
pub struct DocumentIndex {
    store: PersistentStore,
    records: RecordMap,
    loaded: bool,
}

impl DocumentIndex {
    pub fn load(store: PersistentStore) -> Result<Self, StorageError> {
        let records = store.load()?;
        Ok(Self { store, records, loaded: true })
    }

    /// An index whose backing file has not been read yet. Every operation
    /// fails with [`StorageError::NotLoaded`] until [`DocumentIndex::reload`].
    pub fn unloaded(store: PersistentStore) -> Self {
        Self { store, records: RecordMap::new(), loaded: false }
    }

    pub fn reload(&mut self) -> Result<(), StorageError> {
        self.records = self.store.load()?;
        self.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.records.contains_key(id)
    }

    /// All documents, most recently accessed first.
    pub fn documents(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        self.ensure_loaded()?;

        let mut records: Vec<&CacheRecord> = self.records.values().collect();
        records.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

        Ok(records.into_iter().map(|record| record.metadata.clone()).collect())
    }

    pub fn document(&mut self, id: &DocumentId) -> Result<DocumentRecord, StorageError> {
        let record = self.record_mut(id)?;
        record.touch(Utc::now());
        Ok(record.metadata.clone())
    }

    /// Inserts a new document or replaces the metadata of an existing one,
    /// keeping its annotations and progress.
    pub fn upsert_document(&mut self, metadata: DocumentRecord) -> Result<(), StorageError> {
        self.ensure_loaded()?;
        let now = Utc::now();
        let id = metadata.id.clone();

        let next = match self.records.get(&id) {
            Some(existing) => {
                let mut next = existing.clone();
                next.metadata = metadata;
                next.touch(now);
                next
            }
            None => CacheRecord::new(metadata, now),
        };

        let previous = self.records.insert(id.clone(), next);
        if let Err(err) = self.store.save_all(&self.records) {
            match previous {
                Some(previous) => self.records.insert(id, previous),
                None => self.records.remove(&id),
            };
            return Err(err);
        }

        Ok(())
    }

    /// Stores the page count reported by the renderer. Returns `false` when
    /// the stored count already matched and nothing was written.
    pub fn record_page_count(
        &mut self,
        id: &DocumentId,
        page_count: u32,
    ) -> Result<bool, StorageError> {
        if self.record_mut(id)?.metadata.page_count == page_count {
            return Ok(false);
        }

        self.mutate(id, |record| {
            record.metadata.page_count = page_count;
            Ok(())
        })?;
        Ok(true)
    }

    pub fn set_cover_preview(
        &mut self,
        id: &DocumentId,
        cover: Option<String>,
    ) -> Result<(), StorageError> {
        self.mutate(id, |record| {
            record.metadata.cover_preview = cover;
            Ok(())
        })
    }

    /// Removes the document and its source file.
    ///
    /// The returned record lets the caller reclaim artifacts stored
    /// elsewhere, such as cached previews.
    pub fn delete_document(&mut self, id: &DocumentId) -> Result<CacheRecord, StorageError> {
        self.ensure_loaded()?;
        let removed =
            self.records.remove(id).ok_or_else(|| StorageError::DocumentNotFound(id.clone()))?;

        if let Err(err) = self.store.save_all(&self.records) {
            self.records.insert(id.clone(), removed);
            return Err(err);
        }

        match crate::remove_if_exists(&removed.metadata.source_path) {
            Ok(true) => log::debug!("removed source file for {id}"),
            Ok(false) => {}
            Err(err) => log::warn!(
                "failed to remove source file {}: {err}",
                removed.metadata.source_path.display()
            ),
        }

        Ok(removed)
    }

    pub fn add_annotation(
        &mut self,
        id: &DocumentId,
        annotation: NewAnnotation,
    ) -> Result<Annotation, StorageError> {
        self.mutate(id, |record| {
            validate_page(annotation.page_number, record.metadata.page_count)?;
            let created = annotation.into_annotation(record.metadata.id.clone(), Utc::now());
            record.annotations.push(created.clone());
            Ok(created)
        })
    }

    pub fn annotations(&mut self, id: &DocumentId) -> Result<Vec<Annotation>, StorageError> {
        let record = self.record_mut(id)?;
        record.touch(Utc::now());
        Ok(record.annotations.clone())
    }

    pub fn update_annotation(
        &mut self,
        id: &DocumentId,
        annotation_id: &AnnotationId,
        patch: AnnotationPatch,
    ) -> Result<Annotation, StorageError> {
        self.mutate(id, |record| {
            if let Some(page) = patch.page_number {
                validate_page(page, record.metadata.page_count)?;
            }

            let document_id = record.metadata.id.clone();
            let annotation = record.annotation_mut(annotation_id).ok_or_else(|| {
                StorageError::AnnotationNotFound {
                    document_id,
                    annotation_id: annotation_id.clone(),
                }
            })?;

            patch.apply(annotation, Utc::now());
            Ok(annotation.clone())
        })
    }

    pub fn delete_annotation(
        &mut self,
        id: &DocumentId,
        annotation_id: &AnnotationId,
    ) -> Result<(), StorageError> {
        self.mutate(id, |record| {
            let before = record.annotations.len();
            record.annotations.retain(|annotation| &annotation.id != annotation_id);

            if record.annotations.len() == before {
                return Err(StorageError::AnnotationNotFound {
                    document_id: record.metadata.id.clone(),
                    annotation_id: annotation_id.clone(),
                });
            }
            Ok(())
        })
    }

    pub fn save_progress(
        &mut self,
        id: &DocumentId,
        progress: ProgressUpdate,
    ) -> Result<ReadingProgress, StorageError> {
        self.mutate(id, |record| {
            let stamped = progress.stamped(Utc::now());
            record.reading_progress = Some(stamped.clone());
            Ok(stamped)
        })
    }

    pub fn progress(&mut self, id: &DocumentId) -> Result<Option<ReadingProgress>, StorageError> {
        let record = self.record_mut(id)?;
        record.touch(Utc::now());
        Ok(record.reading_progress.clone())
    }

    fn ensure_loaded(&self) -> Result<(), StorageError> {
        if self.loaded {
            Ok(())
        } else {
            Err(StorageError::NotLoaded)
        }
    }

    fn record_mut(&mut self, id: &DocumentId) -> Result<&mut CacheRecord, StorageError> {
        self.ensure_loaded()?;
        self.records.get_mut(id).ok_or_else(|| StorageError::DocumentNotFound(id.clone()))
    }

    fn mutate<T>(
        &mut self,
        id: &DocumentId,
        apply: impl FnOnce(&mut CacheRecord) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut next = self.record_mut(id)?.clone();
        let output = apply(&mut next)?;
        next.touch(Utc::now());

        let previous = self.records.insert(id.clone(), next);
        if let Err(err) = self.store.save_all(&self.records) {
            if let Some(previous) = previous {
                self.records.insert(id.clone(), previous);
            }
            return Err(err);
        }

        Ok(output)
    }
}

fn validate_page(page: u32, page_count: u32) -> Result<(), StorageError> {
    // A page count of 0 means the renderer has not reported yet.
    if page == 0 || (page_count > 0 && page > page_count) {
        return Err(StorageError::InvalidPageNumber { page, page_count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{AnnotationKind, Position};
    use std::path::{Path, PathBuf};

    fn metadata(id: &str, source: PathBuf) -> DocumentRecord {
        DocumentRecord {
            id: DocumentId::from(id),
            name: format!("{id}.pdf"),
            source_path: source,
            size_bytes: 4,
            last_modified: Utc::now(),
            page_count: 10,
            cover_preview: None,
        }
    }

    fn index_in(dir: &Path) -> DocumentIndex {
        DocumentIndex::load(PersistentStore::new(dir.join("pdf_cache.json")))
            .expect("index should load")
    }

    fn note(page_number: u32, content: &str) -> NewAnnotation {
        NewAnnotation {
            page_number,
            kind: AnnotationKind::Note,
            content: content.to_owned(),
            position: Position::at(0.0, 0.0),
        }
    }

    #[test]
    fn annotation_update_is_visible_after_reload() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let id = DocumentId::from("d");

        let mut index = index_in(temp.path());
        index.upsert_document(metadata("d", temp.path().join("d.pdf"))).unwrap();
        let created = index.add_annotation(&id, note(2, "x")).expect("add should succeed");
        index
            .update_annotation(&id, &created.id, AnnotationPatch::content("y"))
            .expect("update should succeed");

        let mut reloaded = index_in(temp.path());
        let annotations = reloaded.annotations(&id).expect("document should exist");

        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].content, "y");
        assert_eq!(annotations[0].document_id, id);
        assert!(annotations[0].updated_at >= annotations[0].created_at);
    }

    #[test]
    fn unknown_document_and_annotation_are_not_found() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut index = index_in(temp.path());
        let missing = DocumentId::from("missing");

        assert!(matches!(
            index.add_annotation(&missing, note(1, "x")),
            Err(StorageError::DocumentNotFound(_))
        ));

        index.upsert_document(metadata("d", temp.path().join("d.pdf"))).unwrap();
        let id = DocumentId::from("d");
        let unknown = AnnotationId::from("nope");

        assert!(matches!(
            index.update_annotation(&id, &unknown, AnnotationPatch::content("y")),
            Err(StorageError::AnnotationNotFound { .. })
        ));
        assert!(matches!(
            index.delete_annotation(&id, &unknown),
            Err(StorageError::AnnotationNotFound { .. })
        ));
    }

    #[test]
    fn annotation_page_must_be_within_document() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut index = index_in(temp.path());
        index.upsert_document(metadata("d", temp.path().join("d.pdf"))).unwrap();
        let id = DocumentId::from("d");

        assert!(matches!(
            index.add_annotation(&id, note(0, "x")),
            Err(StorageError::InvalidPageNumber { page: 0, .. })
        ));
        assert!(matches!(
            index.add_annotation(&id, note(11, "x")),
            Err(StorageError::InvalidPageNumber { page: 11, page_count: 10 })
        ));
    }

    #[test]
    fn delete_document_cascades_and_removes_source_file() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let source = temp.path().join("d.pdf");
        std::fs::write(&source, b"%PDF").unwrap();
        let id = DocumentId::from("d");

        let mut index = index_in(temp.path());
        index.upsert_document(metadata("d", source.clone())).unwrap();
        index.add_annotation(&id, note(1, "x")).unwrap();
        index
            .save_progress(
                &id,
                ProgressUpdate { scroll_offset: 10.0, zoom_level: 1.0, current_page: 2 },
            )
            .unwrap();

        let removed = index.delete_document(&id).expect("delete should succeed");
        assert_eq!(removed.annotations.len(), 1);
        assert!(!source.exists());

        let mut reloaded = index_in(temp.path());
        assert!(matches!(reloaded.document(&id), Err(StorageError::DocumentNotFound(_))));
        assert!(matches!(reloaded.annotations(&id), Err(StorageError::DocumentNotFound(_))));
        assert!(matches!(reloaded.progress(&id), Err(StorageError::DocumentNotFound(_))));
    }

    #[test]
    fn progress_is_overwritten_wholesale() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut index = index_in(temp.path());
        index.upsert_document(metadata("d", temp.path().join("d.pdf"))).unwrap();
        let id = DocumentId::from("d");

        assert_eq!(index.progress(&id).unwrap(), None);

        index
            .save_progress(&id, ProgressUpdate { scroll_offset: 1.0, zoom_level: 1.0, current_page: 1 })
            .unwrap();
        index
            .save_progress(&id, ProgressUpdate { scroll_offset: 5.0, zoom_level: 2.0, current_page: 4 })
            .unwrap();

        let progress = index_in(temp.path()).progress(&id).unwrap().expect("progress saved");
        assert_eq!(progress.scroll_offset, 5.0);
        assert_eq!(progress.zoom_level, 2.0);
        assert_eq!(progress.current_page, 4);
    }

    #[test]
    fn page_count_is_written_only_when_it_changes() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut index = index_in(temp.path());
        let mut fresh = metadata("d", temp.path().join("d.pdf"));
        fresh.page_count = 0;
        index.upsert_document(fresh).unwrap();
        let id = DocumentId::from("d");

        assert!(index.record_page_count(&id, 7).unwrap());
        assert!(!index.record_page_count(&id, 7).unwrap());
        assert_eq!(index_in(temp.path()).document(&id).unwrap().page_count, 7);
    }

    #[test]
    fn failed_save_rolls_back_the_mutation() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let index_dir = temp.path().join("index");
        let mut index = DocumentIndex::load(PersistentStore::new(index_dir.join("pdf_cache.json")))
            .expect("index should load");
        index.upsert_document(metadata("d", temp.path().join("d.pdf"))).unwrap();
        let id = DocumentId::from("d");

        // A directory where the temp file should go makes every save fail.
        std::fs::remove_dir_all(&index_dir).unwrap();
        std::fs::write(&index_dir, b"not a directory").unwrap();

        let err = index.add_annotation(&id, note(1, "x")).expect_err("save should fail");
        assert!(matches!(err, StorageError::Io(_)));
        assert!(index.annotations(&id).unwrap().is_empty());
    }

    #[test]
    fn unloaded_index_refuses_operations() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut index =
            DocumentIndex::unloaded(PersistentStore::new(temp.path().join("pdf_cache.json")));

        assert!(matches!(index.documents(), Err(StorageError::NotLoaded)));
        index.reload().expect("reload should succeed");
        assert!(index.documents().unwrap().is_empty());
    }

    #[test]
    fn documents_are_listed_most_recent_first() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut index = index_in(temp.path());
        index.upsert_document(metadata("old", temp.path().join("old.pdf"))).unwrap();
        index.upsert_document(metadata("new", temp.path().join("new.pdf"))).unwrap();

        index
            .save_progress(
                &DocumentId::from("old"),
                ProgressUpdate { scroll_offset: 0.0, zoom_level: 1.0, current_page: 1 },
            )
            .unwrap();

        let names: Vec<String> =
            index.documents().unwrap().into_iter().map(|record| record.name).collect();
        assert_eq!(names, vec!["old.pdf".to_owned(), "new.pdf".to_owned()]);
    }
}

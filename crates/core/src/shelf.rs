//! The engine facade consumed by the UI shell.

use crate::config::{CoverMode, ShelfConfig};
use crate::error::{ShelfError, ShelfResult};
use crate::imaging;
use crate::session::{RenderSession, RenderedPage, SessionManager};
use crate::window::{ViewportRequest, ViewportWindowManager, WindowReport};
use doc_model::{
    Annotation, AnnotationId, AnnotationPatch, ByteSource, DocumentId, DocumentRecord,
    NewAnnotation, ProgressUpdate, ReadingProgress,
};
use pdf_engine::{OpenSource, PageSize, PdfDocument, PdfEngine, RenderRequest, RgbaImage};
use shelf_cache::{PreviewCache, PreviewFormat, PreviewStats};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use storage::{DataDir, DocumentIndex, PersistentStore};
use viewer_core::{PageRange, PageSlot};

/// Point-in-time copy of a session's layout, for mounting surfaces and
/// placeholders.
#[derive(Debug, Clone)]
pub struct LayoutSnapshot {
    pub scale: f32,
    pub slots: Vec<PageSlot>,
    pub total_height: f32,
    pub scroll_offset: f32,
    pub viewport_height: f32,
    /// Rendered surfaces in ascending page order.
    pub surfaces: Vec<RenderedPage>,
}

/// Document library, preview cache and open sessions.
///
/// Construct with [`Shelf::init`]; every public method can be called from
/// multiple threads. Index mutations are serialized behind one lock and each
/// one is persisted before it returns.
pub struct Shelf {
    config: ShelfConfig,
    data: DataDir,
    engine: Arc<dyn PdfEngine>,
    index: Mutex<DocumentIndex>,
    previews: PreviewCache,
    sessions: SessionManager,
    windows: ViewportWindowManager,
}

impl Shelf {
    /// Creates the data directories, loads the index and opens the preview
    /// cache.
    pub fn init(config: ShelfConfig, engine: Arc<dyn PdfEngine>) -> ShelfResult<Self> {
        let data = config.resolve_data_dir()?;
        data.ensure_directories()?;

        let index = DocumentIndex::load(PersistentStore::new(data.cache_file()))?;
        let previews = PreviewCache::new(&config.resolved_cache(&data))?;
        log::info!(
            "shelf initialized at {} with {} documents",
            data.root().display(),
            index.len()
        );

        Ok(Self {
            windows: ViewportWindowManager::new(config.render_workers),
            config,
            data,
            engine,
            index: Mutex::new(index),
            previews,
            sessions: SessionManager::new(),
        })
    }

    pub fn with_default_engine(config: ShelfConfig) -> ShelfResult<Self> {
        Self::init(config, Arc::new(pdf_engine::default_engine()))
    }

    /// Closes every open session.
    pub fn shutdown(self) {
        let closed = self.sessions.close_all();
        log::info!("shelf shut down ({closed} sessions closed)");
    }

    pub fn config(&self) -> &ShelfConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data
    }

    fn index(&self) -> MutexGuard<'_, DocumentIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Library

    /// Stores the bytes under `pdfs/` and records the document.
    ///
    /// The page count starts at zero and is corrected once the renderer
    /// reports it. A failed cover render is logged and does not fail the
    /// import.
    pub fn import_document(&self, source: ByteSource) -> ShelfResult<DocumentRecord> {
        let id = DocumentId::new_v4();
        let source_path = self.data.write_source(&id, &source.bytes)?;

        let record = DocumentRecord {
            id: id.clone(),
            name: source.name,
            source_path,
            size_bytes: source.size,
            last_modified: source.last_modified,
            page_count: 0,
            cover_preview: None,
        };
        if let Err(err) = self.index().upsert_document(record.clone()) {
            if let Err(remove_err) = storage::remove_if_exists(&record.source_path) {
                log::warn!("failed to remove orphaned source for {id}: {remove_err}");
            }
            return Err(err.into());
        }
        log::info!("imported {} as {id} ({} bytes)", record.name, record.size_bytes);

        if self.config.cover_mode == CoverMode::Blocking {
            if let Err(err) = self.generate_cover_on_import(&record) {
                log::warn!("cover generation failed for {id}: {err}");
            }
        }

        Ok(self.index().document(&id)?)
    }

    fn generate_cover_on_import(&self, record: &DocumentRecord) -> ShelfResult<()> {
        let document = self.engine.open(OpenSource::Path(record.source_path.clone()))?;
        let outcome = self.store_cover(&record.id, document.as_ref());
        document.destroy();
        outcome
    }

    fn store_cover(&self, id: &DocumentId, document: &dyn PdfDocument) -> ShelfResult<()> {
        self.index().record_page_count(id, document.page_count())?;

        let cover = document
            .render_page(RenderRequest { page_index: 0, scale: self.config.cover_scale })?;
        let png = imaging::encode(&cover, PreviewFormat::Png)?;
        self.index().set_cover_preview(id, Some(imaging::png_data_url(&png)))?;

        log::debug!("stored {} byte cover for {id}", png.len());
        Ok(())
    }

    /// Documents, most recently accessed first.
    pub fn list_documents(&self) -> ShelfResult<Vec<DocumentRecord>> {
        Ok(self.index().documents()?)
    }

    pub fn get_document(&self, id: &DocumentId) -> ShelfResult<DocumentRecord> {
        Ok(self.index().document(id)?)
    }

    /// Removes the document with its annotations, progress, source file and
    /// cached previews. Any open session is closed first.
    pub fn delete_document(&self, id: &DocumentId) -> ShelfResult<()> {
        self.sessions.close(id);
        let removed = self.index().delete_document(id)?;

        match self.previews.clear_for_document(id) {
            Ok(count) => log::debug!("removed {count} cached previews for {id}"),
            Err(err) => log::warn!("failed to clear cached previews for {id}: {err}"),
        }

        log::info!("deleted {id} with {} annotations", removed.annotations.len());
        Ok(())
    }

    // Annotations

    pub fn add_annotation(
        &self,
        id: &DocumentId,
        annotation: NewAnnotation,
    ) -> ShelfResult<Annotation> {
        Ok(self.index().add_annotation(id, annotation)?)
    }

    pub fn update_annotation(
        &self,
        id: &DocumentId,
        annotation_id: &AnnotationId,
        patch: AnnotationPatch,
    ) -> ShelfResult<Annotation> {
        Ok(self.index().update_annotation(id, annotation_id, patch)?)
    }

    pub fn delete_annotation(
        &self,
        id: &DocumentId,
        annotation_id: &AnnotationId,
    ) -> ShelfResult<()> {
        Ok(self.index().delete_annotation(id, annotation_id)?)
    }

    pub fn get_annotations(&self, id: &DocumentId) -> ShelfResult<Vec<Annotation>> {
        Ok(self.index().annotations(id)?)
    }

    // Reading progress

    pub fn save_progress(
        &self,
        id: &DocumentId,
        progress: ProgressUpdate,
    ) -> ShelfResult<ReadingProgress> {
        Ok(self.index().save_progress(id, progress)?)
    }

    /// `Ok(None)` when the document exists but has no saved progress.
    pub fn get_progress(&self, id: &DocumentId) -> ShelfResult<Option<ReadingProgress>> {
        Ok(self.index().progress(id)?)
    }

    // Viewing

    /// Opens a render session for the document and returns its page count.
    pub fn open_for_viewing(&self, id: &DocumentId) -> ShelfResult<u32> {
        Ok(self.ensure_open(id)?.page_count())
    }

    /// Closes the document's session. Returns `false` if it was not open.
    pub fn close_viewing(&self, id: &DocumentId) -> bool {
        self.sessions.close(id)
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.sessions.is_open(id)
    }

    fn ensure_open(&self, id: &DocumentId) -> ShelfResult<Arc<RenderSession>> {
        if let Some(session) = self.sessions.get(id) {
            return Ok(session);
        }

        let record = self.index().document(id)?;
        let document = self.engine.open(OpenSource::Path(record.source_path.clone()))?;

        if self.index().record_page_count(id, document.page_count())? {
            log::debug!("page count of {id} is {}", document.page_count());
        }

        let session = self.sessions.insert(
            id.clone(),
            document,
            self.config.page_spacing,
            self.config.viewport_height,
        );

        if self.config.cover_mode == CoverMode::Deferred && record.cover_preview.is_none() {
            if let Err(err) = self.generate_deferred_cover(&session) {
                log::warn!("cover generation failed for {id}: {err}");
            }
        }

        Ok(session)
    }

    fn generate_deferred_cover(&self, session: &RenderSession) -> ShelfResult<()> {
        let cover = self.windows.render_shared(session, 1, self.config.cover_scale)?;
        let png = imaging::encode(&cover, PreviewFormat::Png)?;
        self.index().set_cover_preview(session.id(), Some(imaging::png_data_url(&png)))?;
        Ok(())
    }

    /// Runs one render pass for `request`, opening the document first if
    /// needed.
    pub fn update_viewport(
        &self,
        id: &DocumentId,
        request: ViewportRequest,
    ) -> ShelfResult<WindowReport> {
        let session = self.ensure_open(id)?;
        let buffer = request.buffer.unwrap_or(self.config.default_buffer);
        self.windows.update(&session, &request, buffer)
    }

    pub fn page_count(&self, id: &DocumentId) -> ShelfResult<u32> {
        Ok(self.ensure_open(id)?.page_count())
    }

    pub fn page_viewport(&self, id: &DocumentId, page: u32, scale: f32) -> ShelfResult<PageSize> {
        self.ensure_open(id)?.viewport(page, scale)
    }

    /// Full-resolution render of one page, outside any window pass.
    pub fn render_page(
        &self,
        id: &DocumentId,
        page: u32,
        scale: f32,
    ) -> ShelfResult<Arc<RgbaImage>> {
        let session = self.ensure_open(id)?;
        self.windows.render_shared(&session, page, scale)
    }

    pub fn layout(&self, id: &DocumentId) -> ShelfResult<LayoutSnapshot> {
        let session = self.ensure_open(id)?;
        let view = session.view();

        Ok(LayoutSnapshot {
            scale: view.layout.scale(),
            slots: view.layout.slots().to_vec(),
            total_height: view.layout.total_height(),
            scroll_offset: view.layout.scroll_offset(),
            viewport_height: view.layout.viewport_height(),
            surfaces: view.surfaces.values().cloned().collect(),
        })
    }

    /// Records the UI's scroll position and returns it clamped to the
    /// layout.
    pub fn set_scroll_offset(&self, id: &DocumentId, offset: f32) -> ShelfResult<f32> {
        let session = self.ensure_open(id)?;
        let mut view = session.view();
        view.layout.set_scroll_offset(offset);
        Ok(view.layout.scroll_offset())
    }

    pub fn set_viewport_height(&self, id: &DocumentId, height: f32) -> ShelfResult<()> {
        let session = self.ensure_open(id)?;
        let mut view = session.view();
        view.layout.set_viewport_height(height);
        let offset = view.layout.scroll_offset();
        view.layout.set_scroll_offset(offset);
        Ok(())
    }

    /// Pages visible at `scroll_offset` with the session's viewport height.
    /// `None` until a pass has built the layout.
    pub fn visible_range_at(
        &self,
        id: &DocumentId,
        scroll_offset: f32,
    ) -> ShelfResult<Option<PageRange>> {
        let session = self.ensure_open(id)?;
        let view = session.view();
        Ok(view.layout.visible_range_at(scroll_offset, view.layout.viewport_height()))
    }

    // Thumbnails

    /// Encoded preview of one page.
    ///
    /// Served from the preview cache when present; otherwise rendered at a
    /// reduced scale, encoded and written back. A failed write-back is
    /// logged and the rendered bytes are still returned. Nothing is written
    /// back once the session has closed, and a document deleted during the
    /// render is reported as not found.
    pub fn get_thumbnail(
        &self,
        id: &DocumentId,
        page: u32,
        scale: Option<f32>,
    ) -> ShelfResult<Vec<u8>> {
        if !self.index().contains(id) {
            return Err(ShelfError::document_not_found(id));
        }
        let requested = scale.unwrap_or(self.config.default_thumbnail_scale);

        if self.previews.has(id, page, requested) {
            match self.previews.get(id, page, requested) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => log::debug!("cached preview unreadable, rendering again: {err}"),
            }
        }

        let session = self.ensure_open(id)?;
        let effective = imaging::thumbnail_scale(
            session.viewport(page, 1.0)?,
            requested,
            self.config.min_thumbnail_scale,
            self.config.thumbnail_max_dimension,
        );
        let image = self.windows.render_shared(&session, page, effective)?;
        let bytes = imaging::encode(&image, self.previews.format())?;

        // Held across the write so a concurrent delete clears after it.
        let index = self.index();
        if !index.contains(id) {
            return Err(ShelfError::document_not_found(id));
        }
        if !session.is_live() {
            log::debug!("session for {id} closed during thumbnail render; not caching");
            return Ok(bytes);
        }
        if let Err(err) = self.previews.put(id, page, requested, bytes.clone()) {
            log::warn!("failed to cache preview of page {page} of {id}: {err}");
        }
        drop(index);

        Ok(bytes)
    }

    pub fn preview_stats(&self) -> PreviewStats {
        self.previews.stats()
    }

    /// Drops every in-memory preview. Disk copies stay.
    pub fn clear_preview_memory(&self) {
        self.previews.clear_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use chrono::{TimeZone, Utc};
    use doc_model::{AnnotationKind, Position};
    use tempfile::TempDir;

    fn letter(pages: u32) -> FakeEngine {
        FakeEngine::uniform(pages, PageSize::LETTER)
    }

    fn open_shelf(engine: FakeEngine, config: ShelfConfig) -> (TempDir, Shelf) {
        let dir = tempfile::tempdir().unwrap();
        let shelf = Shelf::init(config.with_data_dir(dir.path()), Arc::new(engine)).unwrap();
        (dir, shelf)
    }

    fn source() -> ByteSource {
        ByteSource::new(
            "paper.pdf",
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            b"%PDF-1.5 fake".to_vec(),
        )
    }

    #[test]
    fn blocking_import_stores_cover_and_page_count() {
        let (_dir, shelf) = open_shelf(letter(4), ShelfConfig::default());

        let record = shelf.import_document(source()).unwrap();

        assert_eq!(record.page_count, 4);
        assert!(record.cover_preview.unwrap().starts_with("data:image/png;base64,"));
        assert!(record.source_path.exists());
        assert!(!shelf.is_open(&record.id));
    }

    #[test]
    fn import_survives_an_undecodable_document() {
        let (_dir, shelf) = open_shelf(letter(1).rejecting(), ShelfConfig::default());

        let record = shelf.import_document(source()).unwrap();

        assert_eq!(record.page_count, 0);
        assert_eq!(record.cover_preview, None);
        assert!(matches!(shelf.open_for_viewing(&record.id), Err(ShelfError::Decode(_))));
    }

    #[test]
    fn deferred_cover_is_generated_on_first_open() {
        let engine = letter(2);
        let stats = engine.stats();
        let config = ShelfConfig::default().with_cover_mode(CoverMode::Deferred);
        let (_dir, shelf) = open_shelf(engine, config);

        let record = shelf.import_document(source()).unwrap();
        assert_eq!(stats.opens(), 0);
        assert_eq!(record.cover_preview, None);

        assert_eq!(shelf.open_for_viewing(&record.id).unwrap(), 2);
        let reopened = shelf.get_document(&record.id).unwrap();
        assert_eq!(reopened.page_count, 2);
        assert!(reopened.cover_preview.is_some());
    }

    #[test]
    fn unknown_documents_are_not_found() {
        let (_dir, shelf) = open_shelf(letter(1), ShelfConfig::default());
        let missing = DocumentId::from("missing");

        assert!(shelf.get_document(&missing).unwrap_err().is_not_found());
        assert!(shelf.open_for_viewing(&missing).unwrap_err().is_not_found());
        assert!(shelf.get_thumbnail(&missing, 1, None).unwrap_err().is_not_found());
        assert!(shelf.delete_document(&missing).unwrap_err().is_not_found());
        assert!(!shelf.close_viewing(&missing));
    }

    #[test]
    fn thumbnail_is_capped_and_cached() {
        let engine = letter(3);
        let stats = engine.stats();
        let (_dir, shelf) =
            open_shelf(engine, ShelfConfig::default().with_cover_mode(CoverMode::Deferred));
        let record = shelf.import_document(source()).unwrap();

        let first = shelf.get_thumbnail(&record.id, 2, Some(1.0)).unwrap();
        let decoded = image::load_from_memory(&first).unwrap();
        assert!(decoded.width() <= 200 && decoded.height() <= 200);

        let renders = stats.renders_of(2);
        let second = shelf.get_thumbnail(&record.id, 2, Some(1.0)).unwrap();
        assert_eq!(first, second);
        assert_eq!(stats.renders_of(2), renders);
        assert_eq!(shelf.preview_stats().memory.hits, 1);
    }

    #[test]
    fn thumbnail_out_of_range_page_is_reported() {
        let (_dir, shelf) = open_shelf(letter(2), ShelfConfig::default());
        let record = shelf.import_document(source()).unwrap();

        assert!(matches!(
            shelf.get_thumbnail(&record.id, 3, None),
            Err(ShelfError::OutOfRange { page: 3, page_count: 2 })
        ));
    }

    #[test]
    fn annotations_and_progress_go_through_the_index() {
        let (_dir, shelf) = open_shelf(letter(3), ShelfConfig::default());
        let record = shelf.import_document(source()).unwrap();

        let note = shelf
            .add_annotation(
                &record.id,
                NewAnnotation {
                    page_number: 2,
                    kind: AnnotationKind::Note,
                    content: "x".to_owned(),
                    position: Position::at(0.0, 0.0),
                },
            )
            .unwrap();
        shelf.delete_annotation(&record.id, &note.id).unwrap();
        assert!(shelf.get_annotations(&record.id).unwrap().is_empty());
        assert!(shelf.delete_annotation(&record.id, &note.id).unwrap_err().is_not_found());

        assert_eq!(shelf.get_progress(&record.id).unwrap(), None);
        shelf
            .save_progress(
                &record.id,
                ProgressUpdate { scroll_offset: 120.0, zoom_level: 1.25, current_page: 2 },
            )
            .unwrap();
        assert_eq!(shelf.get_progress(&record.id).unwrap().unwrap().current_page, 2);
    }

    #[test]
    fn layout_snapshot_reflects_the_last_pass() {
        let (_dir, shelf) = open_shelf(
            FakeEngine::uniform(5, PageSize { width_pt: 100.0, height_pt: 100.0 }),
            ShelfConfig::default().with_page_spacing(0.0).with_viewport_height(250.0),
        );
        let record = shelf.import_document(source()).unwrap();

        shelf
            .update_viewport(
                &record.id,
                ViewportRequest::initial(PageRange::new(1, 2), 1.0).with_buffer(0),
            )
            .unwrap();
        let snapshot = shelf.layout(&record.id).unwrap();

        assert_eq!(snapshot.slots.len(), 5);
        assert_eq!(snapshot.total_height, 500.0);
        assert_eq!(snapshot.surfaces.iter().map(|s| s.page).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(shelf.set_scroll_offset(&record.id, 1000.0).unwrap(), 250.0);
        assert_eq!(
            shelf.visible_range_at(&record.id, 150.0).unwrap(),
            Some(PageRange::new(2, 4))
        );
    }

    #[test]
    fn shutdown_closes_sessions() {
        let engine = letter(1);
        let (_dir, shelf) = open_shelf(engine, ShelfConfig::default());
        let record = shelf.import_document(source()).unwrap();
        shelf.open_for_viewing(&record.id).unwrap();

        assert!(shelf.is_open(&record.id));
        shelf.shutdown();
    }
}

//! Open renderer handles, one per document being viewed.

use crate::error::{ShelfError, ShelfResult};
use doc_model::DocumentId;
use pdf_engine::{PageSize, PdfDocument, RenderRequest, RgbaImage};
use shelf_scheduler::{CancellationRegistry, CancellationToken};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use viewer_core::{PageLayout, RetentionBand, SlotSize};

/// A materialized page surface.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page: u32,
    pub scale: f32,
    pub image: Arc<RgbaImage>,
}

/// Mutable view state of a session: the slot layout and the surfaces of
/// rendered pages, keyed by page number so iteration is in page order.
#[derive(Debug)]
pub(crate) struct SessionView {
    pub(crate) layout: PageLayout,
    pub(crate) surfaces: BTreeMap<u32, RenderedPage>,
    /// Generation of the most recently started pass.
    pub(crate) pass: u64,
    /// Retention band of that pass.
    pub(crate) newest_band: Option<RetentionBand>,
}

/// An open document.
///
/// Page numbers are 1-based here; the renderer underneath is 0-based.
pub struct RenderSession {
    id: DocumentId,
    document: Arc<dyn PdfDocument>,
    token: CancellationToken,
    view: Mutex<SessionView>,
}

impl RenderSession {
    pub(crate) fn new(
        id: DocumentId,
        document: Arc<dyn PdfDocument>,
        token: CancellationToken,
        page_spacing: f32,
        viewport_height: f32,
    ) -> Self {
        let view = SessionView {
            layout: PageLayout::new(page_spacing, viewport_height),
            surfaces: BTreeMap::new(),
            pass: 0,
            newest_band: None,
        };
        Self { id, document, token, view: Mutex::new(view) }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn page_count(&self) -> u32 {
        self.document.page_count()
    }

    /// `false` once the session has been closed.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn view(&self) -> MutexGuard<'_, SessionView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn check_page(&self, page: u32) -> ShelfResult<()> {
        let page_count = self.page_count();
        if page == 0 || page > page_count {
            return Err(ShelfError::OutOfRange { page, page_count });
        }
        Ok(())
    }

    /// Intrinsic size of `page` multiplied by `scale`.
    pub fn viewport(&self, page: u32, scale: f32) -> ShelfResult<PageSize> {
        self.check_page(page)?;
        Ok(self.document.page_size(page - 1)?.scaled(scale))
    }

    /// Placeholder sizes for every page at `scale`.
    pub(crate) fn slot_sizes(&self, scale: f32) -> ShelfResult<Vec<SlotSize>> {
        (1..=self.page_count())
            .map(|page| {
                self.viewport(page, scale)
                    .map(|size| SlotSize { width: size.width_pt, height: size.height_pt })
            })
            .collect()
    }

    pub fn render_page(&self, page: u32, scale: f32) -> ShelfResult<RgbaImage> {
        self.check_page(page)?;
        Ok(self.document.render_page(RenderRequest { page_index: page - 1, scale })?)
    }

    fn close(&self) {
        self.token.cancel();
        self.document.destroy();
    }
}

/// Open sessions keyed by document.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<DocumentId, Arc<RenderSession>>>,
    tokens: CancellationRegistry<DocumentId>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DocumentId) -> Option<Arc<RenderSession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.get(id).is_some()
    }

    /// Registers an opened document and returns its session.
    ///
    /// If another caller opened the same document first, the newer handle
    /// is destroyed and the existing session is returned.
    pub fn insert(
        &self,
        id: DocumentId,
        document: Box<dyn PdfDocument>,
        page_spacing: f32,
        viewport_height: f32,
    ) -> Arc<RenderSession> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = sessions.get(&id) {
            document.destroy();
            return Arc::clone(existing);
        }

        let token = self.tokens.register(id.clone());
        let session = Arc::new(RenderSession::new(
            id.clone(),
            Arc::from(document),
            token,
            page_spacing,
            viewport_height,
        ));
        sessions.insert(id.clone(), Arc::clone(&session));
        log::info!("opened session for {id} ({} pages)", session.page_count());
        session
    }

    /// Closes the session for `id`. Idempotent.
    pub fn close(&self, id: &DocumentId) -> bool {
        let removed = self.sessions.write().unwrap_or_else(PoisonError::into_inner).remove(id);
        self.tokens.cancel(id);

        match removed {
            Some(session) => {
                session.close();
                log::info!("closed session for {id}");
                true
            }
            None => false,
        }
    }

    /// Closes every session. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<RenderSession>> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect();
        self.tokens.cancel_all();

        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            log::info!("closed {} sessions", drained.len());
        }
        drained.len()
    }

    pub fn open_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

//! Viewport-driven render passes.
//!
//! A pass runs in three steps:
//!
//! 1. Under the session's view lock: rebuild the placeholder skeleton if
//!    needed, compute the render window and mark missing pages `Rendering`.
//! 2. Without the lock: render the marked pages on a small pool of scoped
//!    worker threads, visible pages first. Renders go through a
//!    single-flight set so overlapping passes share in-flight work.
//! 3. Under the lock again: publish results in ascending page order, demote
//!    failures, evict pages outside the retention band and apply the scroll
//!    anchor. Nothing is published into a session that closed meanwhile.
//!
//! Every pass takes a generation number in step 1. A pass that finishes
//! after a newer one started is superseded: it only publishes pages the
//! newest pass retains, and it neither evicts nor scrolls.

use crate::error::{ShelfError, ShelfResult};
use crate::session::{RenderSession, RenderedPage};
use doc_model::DocumentId;
use pdf_engine::RgbaImage;
use shelf_scheduler::{FlightRole, SingleFlight};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use viewer_core::{
    anchor_offset, pages_to_evict, pages_to_render, render_window, LoadMode, PageRange,
    RenderQueue, RetentionBand, ScrollAnchor,
};

/// Scale in millionths, so it can be part of a hashable key.
pub(crate) fn scale_key(scale: f32) -> u32 {
    (f64::from(scale) * 1_000_000.0).round() as u32
}

type RenderKey = (DocumentId, u32, u32);
type RenderOutcome = Result<Arc<RgbaImage>, String>;

/// One call to [`ViewportWindowManager::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRequest {
    pub visible: PageRange,
    /// Pages to render on each side of `visible`. `None` uses the
    /// configured default.
    pub buffer: Option<u32>,
    pub scale: f32,
    pub mode: LoadMode,
    pub anchor: ScrollAnchor,
}

impl ViewportRequest {
    pub fn initial(visible: PageRange, scale: f32) -> Self {
        Self { visible, buffer: None, scale, mode: LoadMode::Initial, anchor: ScrollAnchor::Top }
    }

    pub fn incremental(visible: PageRange, scale: f32) -> Self {
        Self { mode: LoadMode::Incremental, ..Self::initial(visible, scale) }
    }

    pub fn with_buffer(mut self, buffer: u32) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_anchor(mut self, anchor: ScrollAnchor) -> Self {
        self.anchor = anchor;
        self
    }
}

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowReport {
    /// `None` for a document without pages.
    pub window: Option<PageRange>,
    /// Pages that became `Rendered` in this pass.
    pub rendered: Vec<u32>,
    /// Pages whose render failed; they are placeholders again.
    pub failed: Vec<u32>,
    pub evicted: Vec<u32>,
    pub scroll_offset: f32,
    /// The session closed before results could be published.
    pub cancelled: bool,
    /// A newer pass started before this one published.
    pub superseded: bool,
}

/// Output of the locked prepare step.
struct PreparedPass {
    generation: u64,
    window: PageRange,
    pages: Vec<u32>,
    previous_offset: f32,
}

#[derive(Debug)]
pub struct ViewportWindowManager {
    renders: SingleFlight<RenderKey, RenderOutcome>,
    workers: usize,
}

impl ViewportWindowManager {
    pub fn new(workers: usize) -> Self {
        Self { renders: SingleFlight::new(), workers: workers.max(1) }
    }

    /// Renders currently in flight across all sessions.
    pub fn pending_renders(&self) -> usize {
        self.renders.pending_count()
    }

    /// Renders one page, sharing the work with any identical render already
    /// in flight.
    pub fn render_shared(
        &self,
        session: &RenderSession,
        page: u32,
        scale: f32,
    ) -> ShelfResult<Arc<RgbaImage>> {
        session.check_page(page)?;
        let (outcome, _) = self.render_deduplicated(session, page, scale);
        outcome.map_err(ShelfError::Render)
    }

    fn render_deduplicated(
        &self,
        session: &RenderSession,
        page: u32,
        scale: f32,
    ) -> (RenderOutcome, FlightRole) {
        let key = (session.id().clone(), page, scale_key(scale));
        self.renders.run(key, || {
            session.render_page(page, scale).map(Arc::new).map_err(|err| err.to_string())
        })
    }

    pub fn update(
        &self,
        session: &RenderSession,
        request: &ViewportRequest,
        buffer: u32,
    ) -> ShelfResult<WindowReport> {
        let scale = request.scale;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ShelfError::Render(format!("invalid render scale {scale}")));
        }

        let Some(pass) = self.prepare(session, request, buffer)? else {
            return Ok(WindowReport::default());
        };

        let results = self.render_all(session, &pass.pages, request.visible, scale);

        Ok(self.publish(session, request, buffer, pass, results))
    }

    fn prepare(
        &self,
        session: &RenderSession,
        request: &ViewportRequest,
        buffer: u32,
    ) -> ShelfResult<Option<PreparedPass>> {
        let mut view = session.view();
        let previous_offset = view.layout.scroll_offset();

        let rebuild = request.mode == LoadMode::Initial
            || !view.layout.is_built()
            || view.layout.scale() != request.scale;
        if rebuild {
            let sizes = session.slot_sizes(request.scale)?;
            let view = &mut *view;
            view.layout.rebuild_skeleton(&sizes, request.scale);

            let layout = &view.layout;
            view.surfaces
                .retain(|page, _| layout.state(*page).is_some_and(|state| state.is_rendered()));
        }

        let Some(window) = render_window(request.visible, buffer, view.layout.page_count()) else {
            return Ok(None);
        };

        view.pass += 1;
        view.newest_band = Some(RetentionBand::around(request.visible, buffer));

        let pages = pages_to_render(&view.layout, window);
        for &page in &pages {
            view.layout.mark_rendering(page);
        }

        log::debug!(
            "window {}-{} for {}: {} pages to render",
            window.start,
            window.end,
            session.id(),
            pages.len()
        );
        Ok(Some(PreparedPass { generation: view.pass, window, pages, previous_offset }))
    }

    fn render_all(
        &self,
        session: &RenderSession,
        pages: &[u32],
        visible: PageRange,
        scale: f32,
    ) -> Vec<(u32, RenderOutcome)> {
        if pages.is_empty() {
            return Vec::new();
        }

        let queue = Mutex::new(RenderQueue::for_pass(pages, visible));
        let results = Mutex::new(Vec::with_capacity(pages.len()));
        let joined = AtomicUsize::new(0);
        let workers = self.workers.min(pages.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if session.token().is_cancelled() {
                        break;
                    }
                    let Some(job) = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_next()
                    else {
                        break;
                    };

                    let (outcome, role) = self.render_deduplicated(session, job.page, scale);
                    if role == FlightRole::Follower {
                        joined.fetch_add(1, Ordering::Relaxed);
                    }
                    results.lock().unwrap_or_else(PoisonError::into_inner).push((job.page, outcome));
                });
            }
        });

        let joined = joined.into_inner();
        if joined > 0 {
            log::debug!("{joined} renders for {} joined an in-flight render", session.id());
        }

        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(
        &self,
        session: &RenderSession,
        request: &ViewportRequest,
        buffer: u32,
        pass: PreparedPass,
        mut results: Vec<(u32, RenderOutcome)>,
    ) -> WindowReport {
        let mut view = session.view();
        let mut report = WindowReport { window: Some(pass.window), ..WindowReport::default() };

        if !session.is_live() {
            log::debug!("session {} closed during render pass; dropping results", session.id());
            report.cancelled = true;
            report.scroll_offset = view.layout.scroll_offset();
            return report;
        }

        // A later pass rebuilt the skeleton at another scale.
        let same_scale = view.layout.scale() == request.scale;
        let superseded = view.pass != pass.generation;
        let newest_band = view.newest_band;
        let wanted =
            |page: u32| !superseded || newest_band.is_some_and(|band| band.retains(page));

        results.sort_by_key(|(page, _)| *page);
        for (page, outcome) in results {
            match outcome {
                Ok(_) if same_scale && !wanted(page) => {
                    if view.layout.state(page).is_some_and(|state| state.is_rendering()) {
                        view.layout.demote(page);
                    }
                }
                Ok(image) if same_scale => {
                    view.layout.mark_rendered(page, image.height() as f32);
                    view.surfaces.insert(page, RenderedPage { page, scale: request.scale, image });
                    report.rendered.push(page);
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("failed to render page {page} of {}: {err}", session.id());
                    if same_scale {
                        view.layout.demote(page);
                    }
                    report.failed.push(page);
                }
            }
        }

        if superseded {
            log::debug!(
                "pass {} for {} superseded by pass {}; skipping eviction",
                pass.generation,
                session.id(),
                view.pass
            );
            report.superseded = true;
            report.scroll_offset = view.layout.scroll_offset();
            return report;
        }

        let band = RetentionBand::around(request.visible, buffer);
        for page in pages_to_evict(&view.layout, band) {
            view.layout.demote(page);
            view.surfaces.remove(&page);
            report.evicted.push(page);
        }
        if !report.evicted.is_empty() {
            log::debug!("evicted {} pages of {}", report.evicted.len(), session.id());
        }

        if let Some(offset) = anchor_offset(
            &view.layout,
            pass.window,
            request.mode,
            request.anchor,
            pass.previous_offset,
        ) {
            view.layout.set_scroll_offset(offset);
        }
        report.scroll_offset = view.layout.scroll_offset();

        report
    }
}

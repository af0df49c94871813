//! In-memory renderer for tests.

use pdf_engine::{
    OpenSource, PageSize, PdfDocument, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Call counters shared by an engine and every document it opened.
#[derive(Debug, Default)]
pub struct FakeStats {
    opens: AtomicUsize,
    renders: AtomicUsize,
    per_page: Mutex<HashMap<u32, usize>>,
}

impl FakeStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Render calls for a 1-based page number.
    pub fn renders_of(&self, page: u32) -> usize {
        let per_page = self.per_page.lock().unwrap_or_else(PoisonError::into_inner);
        per_page.get(&page).copied().unwrap_or(0)
    }

    /// Pages rendered at least once, ascending.
    pub fn rendered_pages(&self) -> Vec<u32> {
        let per_page = self.per_page.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pages: Vec<u32> = per_page.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn reset(&self) {
        self.renders.store(0, Ordering::SeqCst);
        self.per_page.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record_render(&self, page: u32) {
        self.renders.fetch_add(1, Ordering::SeqCst);
        *self.per_page.lock().unwrap_or_else(PoisonError::into_inner).entry(page).or_insert(0) += 1;
    }
}

/// A [`PdfEngine`] that ignores its input and serves fixed page sizes.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    sizes: Vec<PageSize>,
    failing: HashSet<u32>,
    delay: Option<Duration>,
    reject: bool,
    stats: Arc<FakeStats>,
}

impl FakeEngine {
    pub fn new(sizes: Vec<PageSize>) -> Self {
        Self {
            sizes,
            failing: HashSet::new(),
            delay: None,
            reject: false,
            stats: Arc::new(FakeStats::default()),
        }
    }

    pub fn uniform(pages: u32, size: PageSize) -> Self {
        Self::new(vec![size; pages as usize])
    }

    /// Renders of these 1-based pages fail.
    pub fn failing_pages(mut self, pages: impl IntoIterator<Item = u32>) -> Self {
        self.failing.extend(pages);
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every open fails as undecodable.
    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }
}

impl PdfEngine for FakeEngine {
    fn open(&self, _source: OpenSource) -> Result<Box<dyn PdfDocument>, PdfEngineError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(PdfEngineError::Decode("fake engine rejects every document".to_owned()));
        }

        Ok(Box::new(FakeDocument {
            sizes: self.sizes.clone(),
            failing: self.failing.clone(),
            delay: self.delay,
            stats: Arc::clone(&self.stats),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct FakeDocument {
    sizes: Vec<PageSize>,
    failing: HashSet<u32>,
    delay: Option<Duration>,
    stats: Arc<FakeStats>,
    destroyed: AtomicBool,
}

impl PdfDocument for FakeDocument {
    fn page_count(&self) -> u32 {
        self.sizes.len() as u32
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PdfEngineError::Destroyed);
        }
        self.sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.page_count(),
        })
    }

    fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
        let size = self.page_size(request.page_index)?;
        let page = request.page_index + 1;
        self.stats.record_render(page);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(&page) {
            return Err(PdfEngineError::Backend(format!("injected failure on page {page}")));
        }

        let (width, height) = size.pixels(request.scale);
        Ok(RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255])))
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

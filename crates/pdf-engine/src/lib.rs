use image::{ImageBuffer, Rgba};
use lopdf::Document;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Page size in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

    pub fn scaled(self, scale: f32) -> PageSize {
        PageSize { width_pt: self.width_pt * scale, height_pt: self.height_pt * scale }
    }

    /// Pixel dimensions of a raster at `scale`, never smaller than 1x1.
    pub fn pixels(self, scale: f32) -> (u32, u32) {
        let scaled = self.scaled(scale);
        (scaled.width_pt.round().max(1.0) as u32, scaled.height_pt.round().max(1.0) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("cannot decode document: {0}")]
    Decode(String),
    #[error("document handle has been destroyed")]
    Destroyed,
    #[error("backend error: {0}")]
    Backend(String),
}

impl PdfEngineError {
    /// Whether the error came from reading the document rather than drawing
    /// one of its pages.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::EncryptedUnsupported | Self::Decode(_))
    }
}

/// Decodes documents into [`PdfDocument`] handles.
pub trait PdfEngine: Send + Sync {
    fn open(&self, source: OpenSource) -> Result<Box<dyn PdfDocument>, PdfEngineError>;
}

/// One open document. Page indices are zero-based.
///
/// Handles are shared between render workers, so every method takes `&self`.
/// After [`PdfDocument::destroy`] every call fails with
/// [`PdfEngineError::Destroyed`].
pub trait PdfDocument: Send + Sync {
    fn page_count(&self) -> u32;
    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError>;
    fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError>;
    fn destroy(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfEngine;

impl LopdfEngine {
    pub fn new() -> Self {
        Self
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| media_box_size(array))
                .unwrap_or(PageSize::LETTER);

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(sizes)
    }
}

fn media_box_size(array: &[lopdf::Object]) -> Option<PageSize> {
    if array.len() != 4 {
        return None;
    }
    let x0 = array[0].as_float().ok()?;
    let y0 = array[1].as_float().ok()?;
    let x1 = array[2].as_float().ok()?;
    let y1 = array[3].as_float().ok()?;
    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
}

impl PdfEngine for LopdfEngine {
    fn open(&self, source: OpenSource) -> Result<Box<dyn PdfDocument>, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = Self::parse_sizes(&bytes)?;
        log::debug!("lopdf opened document with {} pages", page_sizes.len());

        Ok(Box::new(LopdfDocument { page_sizes, destroyed: AtomicBool::new(false) }))
    }
}

/// Layout-only document: page geometry comes from each page's MediaBox and
/// rendering produces a blank bordered sheet of the right size.
#[derive(Debug)]
pub struct LopdfDocument {
    page_sizes: Vec<PageSize>,
    destroyed: AtomicBool,
}

impl LopdfDocument {
    fn check_live(&self) -> Result<(), PdfEngineError> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(PdfEngineError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.check_live()?;
        self.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.page_count(),
        })
    }

    fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };
        let (width, height) = page_size.pixels(scale);

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            let edge = Rgba([220, 220, 220, 255]);
            for x in 0..width {
                image.put_pixel(x, 0, edge);
                image.put_pixel(x, height - 1, edge);
            }
            for y in 0..height {
                image.put_pixel(0, y, edge);
                image.put_pixel(width - 1, y, edge);
            }
        }

        Ok(image)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

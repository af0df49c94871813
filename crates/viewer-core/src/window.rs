//! Window math for viewport-driven rendering.
//!
//! Given the visible pages, decide which pages to materialize, which to let
//! go, and where to scroll afterwards.

use crate::layout::{PageLayout, PageRange};

/// Extra pages kept on each side of the render window before eviction.
pub const EVICTION_SLACK: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Rebuild the placeholder skeleton and apply the scroll anchor.
    #[default]
    Initial,
    /// Reuse existing placeholders and leave scrolling alone.
    Incremental,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScrollAnchor {
    /// First page of the render window at the top edge.
    #[default]
    Top,
    /// Middle page of the render window centred in the viewport.
    Center,
    /// Restore the offset from before the pass.
    Exact,
}

/// `[visible.start - buffer, visible.end + buffer]` clamped to the document.
///
/// Returns `None` for an empty document, and when the widened range starts
/// past the last page.
pub fn render_window(visible: PageRange, buffer: u32, page_count: u32) -> Option<PageRange> {
    let start = visible.start.saturating_sub(buffer).max(1);
    let end = visible.end.saturating_add(buffer).min(page_count);
    if start > end {
        return None;
    }

    Some(PageRange { start, end })
}

/// Pages a pass keeps materialized: the visible range widened by
/// `buffer + EVICTION_SLACK` on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionBand {
    low: i64,
    high: i64,
}

impl RetentionBand {
    pub fn around(visible: PageRange, buffer: u32) -> Self {
        let threshold = i64::from(buffer) + i64::from(EVICTION_SLACK);
        Self {
            low: i64::from(visible.start) - threshold,
            high: i64::from(visible.end) + threshold,
        }
    }

    pub fn retains(&self, page: u32) -> bool {
        (self.low..=self.high).contains(&i64::from(page))
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }
}

/// Rendered pages of `layout` that fall outside `band`.
pub fn pages_to_evict(layout: &PageLayout, band: RetentionBand) -> Vec<u32> {
    layout.rendered_pages().filter(|page| !band.retains(*page)).collect()
}

/// Pages in `window` that still need a render at the layout's scale.
///
/// Pages in flight from an overlapping pass are included; the caller's
/// single-flight guard collapses the duplicate.
pub fn pages_to_render(layout: &PageLayout, window: PageRange) -> Vec<u32> {
    window
        .pages()
        .filter(|page| layout.state(*page).is_some_and(|state| !state.is_rendered()))
        .collect()
}

/// Scroll offset to apply after a pass, or `None` to leave it alone.
pub fn anchor_offset(
    layout: &PageLayout,
    window: PageRange,
    mode: LoadMode,
    anchor: ScrollAnchor,
    previous_offset: f32,
) -> Option<f32> {
    if mode == LoadMode::Incremental {
        return None;
    }

    let offset = match anchor {
        ScrollAnchor::Exact => previous_offset,
        ScrollAnchor::Top => layout.page_start_offset(window.start),
        ScrollAnchor::Center => {
            let middle = (window.start + window.end) / 2;
            let height = layout.state(middle).map(|state| state.height()).unwrap_or(0.0);
            layout.page_start_offset(middle) + height / 2.0 - layout.viewport_height() / 2.0
        }
    };

    Some(offset.clamp(0.0, layout.max_scroll_offset()))
}

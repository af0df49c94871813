use std::ops::RangeInclusive;

/// Inclusive range of 1-based page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// Builds a range, swapping the bounds if they arrive reversed.
    pub fn new(start: u32, end: u32) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// Range covering one page.
    pub fn single(page: u32) -> Self {
        Self { start: page, end: page }
    }

    /// Returns true if `page` lies within the range, bounds included.
    pub fn contains(&self, page: u32) -> bool {
        (self.start..=self.end).contains(&page)
    }

    /// Number of pages in the range.
    pub fn count(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Iterates the page numbers in ascending order.
    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

/// Size of a page slot in layout units at the layout's scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotSize {
    pub width: f32,
    pub height: f32,
}

/// Lifecycle of one page slot. Every state carries the slot height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageState {
    /// Reserves `height` without a surface.
    Placeholder { height: f32 },
    /// A render has been dispatched. The slot keeps its placeholder height.
    Rendering { height: f32 },
    /// A surface is mounted; `height` is the rendered height.
    Rendered { height: f32 },
}

impl PageState {
    /// Height the slot occupies in the layout.
    pub fn height(&self) -> f32 {
        match *self {
            Self::Placeholder { height } | Self::Rendering { height } | Self::Rendered { height } => {
                height
            }
        }
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }

    pub fn is_rendering(&self) -> bool {
        matches!(self, Self::Rendering { .. })
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

/// One page's place in the layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlot {
    pub page: u32,
    pub width: f32,
    pub state: PageState,
}

/// Vertical stack of page slots for one open document.
///
/// Slots are ordered by page number, separated by `page_spacing`. Every
/// slot always has a height, so the total scrollable height is known before
/// any page is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    slots: Vec<PageSlot>,
    scale: f32,
    page_spacing: f32,
    scroll_offset: f32,
    viewport_height: f32,
}

impl PageLayout {
    /// Empty layout; call [`PageLayout::rebuild_skeleton`] before use.
    pub fn new(page_spacing: f32, viewport_height: f32) -> Self {
        Self {
            slots: Vec::new(),
            scale: 1.0,
            page_spacing: page_spacing.max(0.0),
            scroll_offset: 0.0,
            viewport_height: viewport_height.max(0.0),
        }
    }

    /// Replaces every slot with a placeholder sized from `sizes`.
    ///
    /// When the page count and scale are unchanged, pages that are already
    /// rendered keep their state.
    pub fn rebuild_skeleton(&mut self, sizes: &[SlotSize], scale: f32) {
        let keep_rendered = sizes.len() == self.slots.len() && self.scale == scale;

        let slots = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                let state = match self.slots.get(index) {
                    Some(slot) if keep_rendered && slot.state.is_rendered() => slot.state,
                    _ => PageState::Placeholder { height: size.height },
                };
                PageSlot { page: index as u32 + 1, width: size.width, state }
            })
            .collect();

        self.slots = slots;
        self.scale = scale;
    }

    /// Returns true once a skeleton has been built.
    pub fn is_built(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Scale the slots were sized at.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Number of slots, which is the document's page count once built.
    pub fn page_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Every slot in page order.
    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    /// Slot for a 1-based page number.
    pub fn slot(&self, page: u32) -> Option<&PageSlot> {
        page.checked_sub(1).and_then(|index| self.slots.get(index as usize))
    }

    fn slot_mut(&mut self, page: u32) -> Option<&mut PageSlot> {
        page.checked_sub(1).and_then(|index| self.slots.get_mut(index as usize))
    }

    /// State of `page`, `None` for pages outside the layout.
    pub fn state(&self, page: u32) -> Option<PageState> {
        self.slot(page).map(|slot| slot.state)
    }

    pub fn page_spacing(&self) -> f32 {
        self.page_spacing
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn set_viewport_height(&mut self, height: f32) {
        self.viewport_height = height.max(0.0);
    }

    pub fn scroll_offset(&self) -> f32 {
        self.scroll_offset
    }

    /// Sets the scroll offset, clamped to the scrollable extent.
    pub fn set_scroll_offset(&mut self, offset: f32) {
        self.scroll_offset = offset.clamp(0.0, self.max_scroll_offset());
    }

    /// Largest offset that still fills the viewport.
    pub fn max_scroll_offset(&self) -> f32 {
        (self.total_height() - self.viewport_height).max(0.0)
    }

    /// Sum of slot heights plus the spacing between slots.
    pub fn total_height(&self) -> f32 {
        if self.slots.is_empty() {
            return 0.0;
        }

        let heights: f32 = self.slots.iter().map(|slot| slot.state.height()).sum();
        heights + self.page_spacing * (self.slots.len() - 1) as f32
    }

    /// Offset of the top edge of `page`. Pages past the end map to the end
    /// of the layout.
    pub fn page_start_offset(&self, page: u32) -> f32 {
        let mut cursor = 0.0;

        for slot in &self.slots {
            if slot.page == page {
                return cursor;
            }
            cursor += slot.state.height() + self.page_spacing;
        }

        (cursor - self.page_spacing).max(0.0)
    }

    /// Page whose slot contains `offset`. Offsets in the gap between two
    /// pages belong to the following page.
    pub fn page_at_offset(&self, offset: f32) -> u32 {
        let mut cursor = 0.0;

        for slot in &self.slots {
            let page_end = cursor + slot.state.height();
            if offset <= page_end {
                return slot.page;
            }

            cursor = page_end + self.page_spacing;
        }

        self.page_count()
    }

    /// Pages intersecting `[scroll_offset, scroll_offset + viewport_height]`.
    pub fn visible_range_at(&self, scroll_offset: f32, viewport_height: f32) -> Option<PageRange> {
        if self.slots.is_empty() {
            return None;
        }

        let start = self.page_at_offset(scroll_offset.max(0.0));
        let end = self.page_at_offset((scroll_offset + viewport_height).max(0.0));

        Some(PageRange::new(start, end))
    }

    /// Pages visible at the current scroll offset.
    pub fn visible_range(&self) -> Option<PageRange> {
        self.visible_range_at(self.scroll_offset, self.viewport_height)
    }

    /// Page containing the centre of the viewport.
    pub fn current_page(&self) -> Option<u32> {
        if self.slots.is_empty() {
            return None;
        }

        Some(self.page_at_offset((self.scroll_offset + self.viewport_height / 2.0).max(0.0)))
    }

    /// Placeholder or failed page moves to `Rendering`. Returns `false` for
    /// unknown pages and pages that are already rendered.
    pub fn mark_rendering(&mut self, page: u32) -> bool {
        match self.slot_mut(page) {
            Some(slot) if !slot.state.is_rendered() => {
                slot.state = PageState::Rendering { height: slot.state.height() };
                true
            }
            _ => false,
        }
    }

    /// Mounts `page` with its rendered height. Returns `false` for unknown
    /// pages.
    pub fn mark_rendered(&mut self, page: u32, height: f32) -> bool {
        match self.slot_mut(page) {
            Some(slot) => {
                slot.state = PageState::Rendered { height };
                true
            }
            None => false,
        }
    }

    /// Returns a page to `Placeholder`, keeping whatever height it had.
    ///
    /// Used both for failed renders and for eviction.
    pub fn demote(&mut self, page: u32) -> bool {
        match self.slot_mut(page) {
            Some(slot) if !slot.state.is_placeholder() => {
                slot.state = PageState::Placeholder { height: slot.state.height() };
                true
            }
            _ => false,
        }
    }

    /// Pages in the `Rendered` state, ascending.
    pub fn rendered_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().filter(|slot| slot.state.is_rendered()).map(|slot| slot.page)
    }

    pub fn pages_in_state(&self, predicate: impl Fn(&PageState) -> bool) -> Vec<u32> {
        self.slots.iter().filter(|slot| predicate(&slot.state)).map(|slot| slot.page).collect()
    }
}

//! Page layout and window planning for a virtualized document view.
//!
//! Nothing here touches a renderer or the filesystem: the types describe
//! which pages are placeholders, which are rendered, and what a window pass
//! should do next.

mod layout;
mod queue;
mod window;

pub use layout::{PageLayout, PageRange, PageSlot, PageState, SlotSize};
pub use queue::{RenderJob, RenderPriority, RenderQueue};
pub use window::{
    anchor_offset, pages_to_evict, pages_to_render, render_window, LoadMode, RetentionBand,
    ScrollAnchor, EVICTION_SLACK,
};

//! Shelf Core Library
//!
//! Page virtualization and preview caching for a document reader.
//!
//! [`Shelf`] ties the pieces together: the persisted document index, the
//! two-tier preview cache, one render session per open document, and the
//! viewport window manager that decides which pages are rendered and which
//! stay placeholders.

pub mod config;
pub mod error;
pub mod imaging;
pub mod session;
pub mod shelf;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{CoverMode, ShelfConfig, ENV_DATA_DIR};
pub use error::{NotFoundKind, ShelfError, ShelfResult};
pub use session::{RenderSession, RenderedPage, SessionManager};
pub use shelf::{LayoutSnapshot, Shelf};
pub use window::{ViewportRequest, ViewportWindowManager, WindowReport};

pub use viewer_core::{LoadMode, PageRange, PageSlot, PageState, ScrollAnchor};

//! Preview cache keys and their on-disk file names.

use doc_model::DocumentId;
use std::fmt;

const SCALE_UNITS: f64 = 1_000_000.0;

/// Identifies one preview: a page of a document rendered at a scale.
///
/// The scale is stored in millionths so keys hash and compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    document_id: DocumentId,
    page: u32,
    scale_micros: u64,
}

impl PreviewKey {
    pub fn new(document_id: DocumentId, page: u32, scale: f32) -> Self {
        let scale_micros = (f64::from(scale.max(0.0)) * SCALE_UNITS).round() as u64;
        Self { document_id, page, scale_micros }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn scale(&self) -> f32 {
        (self.scale_micros as f64 / SCALE_UNITS) as f32
    }

    /// `<sanitizedId>_<page>_<scale>` without extension.
    ///
    /// The scale is written in decimal with `.` replaced by `_`, so `0.25`
    /// becomes `0_25` and `1.0` becomes `1`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize_id(self.document_id.as_str()),
            self.page,
            scale_label(self.scale_micros)
        )
    }
}

impl fmt::Display for PreviewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.document_id, self.page, self.scale())
    }
}

/// Replaces anything outside `[A-Za-z0-9]` with `_`.
pub fn sanitize_id(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn scale_label(scale_micros: u64) -> String {
    let whole = scale_micros / 1_000_000;
    let fraction = scale_micros % 1_000_000;

    if fraction == 0 {
        return whole.to_string();
    }

    let digits = format!("{fraction:06}");
    format!("{whole}_{}", digits.trim_end_matches('0'))
}

/// Whether `file_name` is a preview file of the document whose sanitized id
/// is `sanitized`.
///
/// The remainder after `<sanitized>_` must be the page and scale parts: two
/// or three numeric groups followed by a known extension.
pub(crate) fn belongs_to(file_name: &str, sanitized: &str, extensions: &[&str]) -> bool {
    let Some(rest) = file_name.strip_prefix(sanitized).and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    let Some(stem) = extensions.iter().find_map(|ext| {
        rest.strip_suffix(ext).and_then(|stem| stem.strip_suffix('.'))
    }) else {
        return false;
    };

    let parts: Vec<&str> = stem.split('_').collect();
    (2..=3).contains(&parts.len())
        && parts.iter().all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

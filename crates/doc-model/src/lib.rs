use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnnotationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Metadata for one imported document.
///
/// Field names and aliases keep `pdf_cache.json` files written by earlier
/// releases readable (`path`, `size` and `coverUrl` were the old names).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub name: String,
    #[serde(alias = "path")]
    pub source_path: PathBuf,
    #[serde(alias = "size")]
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub page_count: u32,
    /// Encoded cover image as a `data:` URL.
    #[serde(
        default,
        alias = "coverUrl",
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_preview: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Note,
    Drawing,
    Bookmark,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
}

impl Position {
    pub fn at(x: f32, y: f32) -> Self {
        Self { x, y, width: None, height: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: AnnotationId,
    #[serde(default, alias = "pdfId")]
    pub document_id: DocumentId,
    pub page_number: u32,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub content: String,
    #[serde(default)]
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields of an annotation; ids and timestamps are assigned
/// by the index.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub page_number: u32,
    pub kind: AnnotationKind,
    pub content: String,
    pub position: Position,
}

impl NewAnnotation {
    pub fn into_annotation(self, document_id: DocumentId, now: DateTime<Utc>) -> Annotation {
        Annotation {
            id: AnnotationId::new_v4(),
            document_id,
            page_number: self.page_number,
            kind: self.kind,
            content: self.content,
            position: self.position,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationPatch {
    pub page_number: Option<u32>,
    pub kind: Option<AnnotationKind>,
    pub content: Option<String>,
    pub position: Option<Position>,
}

impl AnnotationPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Self::default() }
    }

    pub fn apply(self, annotation: &mut Annotation, now: DateTime<Utc>) {
        if let Some(page_number) = self.page_number {
            annotation.page_number = page_number;
        }
        if let Some(kind) = self.kind {
            annotation.kind = kind;
        }
        if let Some(content) = self.content {
            annotation.content = content;
        }
        if let Some(position) = self.position {
            annotation.position = position;
        }
        annotation.updated_at = now.max(annotation.created_at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    #[serde(alias = "scrollTop")]
    pub scroll_offset: f64,
    #[serde(alias = "zoom")]
    pub zoom_level: f64,
    pub current_page: u32,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub scroll_offset: f64,
    pub zoom_level: f64,
    pub current_page: u32,
}

impl ProgressUpdate {
    pub fn stamped(self, now: DateTime<Utc>) -> ReadingProgress {
        ReadingProgress {
            scroll_offset: self.scroll_offset,
            zoom_level: self.zoom_level,
            current_page: self.current_page,
            last_updated: now,
        }
    }
}

/// The persisted unit: one document and everything hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub metadata: DocumentRecord,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_progress: Option<ReadingProgress>,
}

impl CacheRecord {
    pub fn new(metadata: DocumentRecord, now: DateTime<Utc>) -> Self {
        Self { metadata, annotations: Vec::new(), last_accessed: now, reading_progress: None }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
    }

    pub fn annotation_mut(&mut self, id: &AnnotationId) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|annotation| &annotation.id == id)
    }

    /// Re-links annotations to their owning document.
    ///
    /// Older files did not store the owner on each annotation.
    pub fn relink_annotations(&mut self) {
        for annotation in &mut self.annotations {
            if annotation.document_id != self.metadata.id {
                annotation.document_id = self.metadata.id.clone();
            }
        }
    }
}

/// Raw bytes handed over by the host for a newly imported document.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteSource {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl ByteSource {
    pub fn new(name: impl Into<String>, last_modified: DateTime<Utc>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), size: bytes.len() as u64, last_modified, bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str) -> DocumentRecord {
        DocumentRecord {
            id: DocumentId::from(id),
            name: "paper.pdf".to_owned(),
            source_path: PathBuf::from("/data/pdfs/a.pdf"),
            size_bytes: 42,
            last_modified: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            page_count: 0,
            cover_preview: None,
        }
    }

    #[test]
    fn reads_legacy_cache_entry() {
        let json = r#"{
            "metadata": {
                "id": "abc",
                "name": "paper.pdf",
                "path": "/data/pdfs/abc.pdf",
                "size": 1024,
                "lastModified": "2024-03-01T12:00:00.000Z",
                "pageCount": 12,
                "thumbnail": "",
                "coverUrl": ""
            },
            "annotations": [{
                "id": "n1",
                "pageNumber": 2,
                "type": "bookmark",
                "content": "x",
                "createdAt": "2024-03-01T12:00:00.000Z",
                "updatedAt": "2024-03-01T12:00:00.000Z"
            }],
            "lastAccessed": "2024-03-02T08:00:00.000Z",
            "readingProgress": { "scrollTop": 120.5, "zoom": 1.25, "currentPage": 3 }
        }"#;

        let mut parsed: CacheRecord = serde_json::from_str(json).expect("legacy json should parse");
        parsed.relink_annotations();

        assert_eq!(parsed.metadata.source_path, PathBuf::from("/data/pdfs/abc.pdf"));
        assert_eq!(parsed.metadata.size_bytes, 1024);
        assert_eq!(parsed.metadata.cover_preview, None);
        assert_eq!(parsed.annotations[0].kind, AnnotationKind::Bookmark);
        assert_eq!(parsed.annotations[0].document_id, DocumentId::from("abc"));
        let progress = parsed.reading_progress.expect("progress should be present");
        assert_eq!(progress.scroll_offset, 120.5);
        assert_eq!(progress.zoom_level, 1.25);
    }

    #[test]
    fn writes_camel_case_field_names() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let value = serde_json::to_value(CacheRecord::new(record("abc"), now)).unwrap();

        assert_eq!(value["metadata"]["sourcePath"], "/data/pdfs/a.pdf");
        assert_eq!(value["metadata"]["pageCount"], 0);
        assert!(value["metadata"].get("coverPreview").is_none());
        assert!(value.get("readingProgress").is_none());
        assert!(value["lastAccessed"].is_string());
    }

    #[test]
    fn patch_only_touches_given_fields_and_refreshes_updated_at() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut annotation = NewAnnotation {
            page_number: 2,
            kind: AnnotationKind::Note,
            content: "x".to_owned(),
            position: Position::at(0.0, 0.0),
        }
        .into_annotation(DocumentId::from("abc"), created);

        let later = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap();
        AnnotationPatch::content("y").apply(&mut annotation, later);

        assert_eq!(annotation.content, "y");
        assert_eq!(annotation.page_number, 2);
        assert_eq!(annotation.kind, AnnotationKind::Note);
        assert_eq!(annotation.updated_at, later);
        assert!(annotation.updated_at >= annotation.created_at);
    }

    #[test]
    fn patch_never_moves_updated_at_before_created_at() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut annotation = NewAnnotation {
            page_number: 1,
            kind: AnnotationKind::Highlight,
            content: String::new(),
            position: Position::default(),
        }
        .into_annotation(DocumentId::from("abc"), created);

        let skewed = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        AnnotationPatch::default().apply(&mut annotation, skewed);

        assert_eq!(annotation.updated_at, created);
    }

    #[test]
    fn byte_source_reports_its_length() {
        let source = ByteSource::new("a.pdf", Utc::now(), vec![1, 2, 3]);
        assert_eq!(source.size, 3);
    }
}

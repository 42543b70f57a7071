use super::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DocumentId = String;
pub type AnnotationId = i64;

/// Durable reading position of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingState {
    pub document_id: DocumentId,
    pub position_index: u64,
    // Epoch milliseconds, so the lastUpdated index orders chronologically.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

impl ReadingState {
    /// `true` when the position addresses an existing content unit.
    pub fn is_within(&self, unit_count: usize) -> bool {
        self.position_index < unit_count as u64
    }
}

/// Bookmark / highlight discriminant together with the fields only that
/// variant carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKind {
    Bookmark {
        note: Option<String>,
    },
    Highlight {
        start_offset: u64,
        end_offset: u64,
        highlighted_text: String,
    },
}

impl AnnotationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bookmark { .. } => "bookmark",
            Self::Highlight { .. } => "highlight",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored bookmark or highlight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "AnnotationRecord", try_from = "AnnotationRecord")]
pub struct Annotation {
    pub id: AnnotationId,
    pub document_id: DocumentId,
    pub position_index: u64,
    pub kind: AnnotationKind,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn is_bookmark(&self) -> bool {
        matches!(self.kind, AnnotationKind::Bookmark { .. })
    }

    pub fn is_highlight(&self) -> bool {
        matches!(self.kind, AnnotationKind::Highlight { .. })
    }

    /// Start offset for highlights, 0 for everything else.
    pub fn start_offset_or_zero(&self) -> u64 {
        match self.kind {
            AnnotationKind::Highlight { start_offset, .. } => start_offset,
            AnnotationKind::Bookmark { .. } => 0,
        }
    }
}

/// Caller-supplied annotation data, before the store assigns `id` and
/// `created_at`.
///
/// `position_index` is optional on purpose: input coming from the UI layer
/// may lack it, and such input must be rejected rather than defaulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDraft {
    pub document_id: DocumentId,
    pub position_index: Option<u64>,
    pub kind: AnnotationKind,
}

impl AnnotationDraft {
    pub fn bookmark(document_id: impl Into<DocumentId>, position_index: u64) -> Self {
        Self {
            document_id: document_id.into(),
            position_index: Some(position_index),
            kind: AnnotationKind::Bookmark { note: None },
        }
    }

    pub fn highlight(
        document_id: impl Into<DocumentId>,
        position_index: u64,
        start_offset: u64,
        end_offset: u64,
        highlighted_text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            position_index: Some(position_index),
            kind: AnnotationKind::Highlight {
                start_offset,
                end_offset,
                highlighted_text: highlighted_text.into(),
            },
        }
    }

    /// Attaches a note. Only bookmarks carry notes; highlights are unchanged.
    pub fn with_note(mut self, text: impl Into<String>) -> Self {
        if let AnnotationKind::Bookmark { note } = &mut self.kind {
            *note = Some(text.into());
        }
        self
    }

    pub fn without_position(mut self) -> Self {
        self.position_index = None;
        self
    }

    pub fn validate(&self) -> Result<u64> {
        if self.document_id.is_empty() {
            return Err(StoreError::Validation(
                "Annotation must reference a document".to_string(),
            ));
        }
        let position_index = self.position_index.ok_or_else(|| {
            StoreError::Validation("Annotation data must include a positionIndex".to_string())
        })?;
        if let AnnotationKind::Highlight {
            start_offset,
            end_offset,
            ..
        } = &self.kind
            && start_offset > end_offset
        {
            return Err(StoreError::Validation(format!(
                "Highlight startOffset {} is past endOffset {}",
                start_offset, end_offset
            )));
        }
        Ok(position_index)
    }

    /// Builds the record to insert; `id` is left for the store to assign.
    pub(crate) fn into_record(self, created_at: DateTime<Utc>) -> Result<AnnotationRecord> {
        let position_index = self.validate()?;
        let mut record = AnnotationRecord {
            id: None,
            document_id: self.document_id,
            position_index,
            kind: None,
            start_offset: None,
            end_offset: None,
            highlighted_text: None,
            note: None,
            created_at,
        };
        record.set_kind(self.kind);
        Ok(record)
    }
}

/// Flat on-disk shape of an annotation. Variant-specific fields are simply
/// absent for the other variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnnotationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<AnnotationId>,
    pub(crate) document_id: DocumentId,
    pub(crate) position_index: u64,
    // Records written before the discriminant existed have no kind at all.
    #[serde(default, alias = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) start_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) end_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) highlighted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) note: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
}

impl AnnotationRecord {
    fn set_kind(&mut self, kind: AnnotationKind) {
        self.kind = Some(kind.name().to_string());
        match kind {
            AnnotationKind::Bookmark { note } => self.note = note,
            AnnotationKind::Highlight {
                start_offset,
                end_offset,
                highlighted_text,
            } => {
                self.start_offset = Some(start_offset);
                self.end_offset = Some(end_offset);
                self.highlighted_text = Some(highlighted_text);
            }
        }
    }

    fn take_kind(&mut self) -> AnnotationKind {
        match self.kind.as_deref() {
            Some("highlight") => {
                let start_offset = self.start_offset.unwrap_or(0);
                AnnotationKind::Highlight {
                    start_offset,
                    end_offset: self.end_offset.unwrap_or(start_offset),
                    highlighted_text: self.highlighted_text.take().unwrap_or_default(),
                }
            }
            _ => AnnotationKind::Bookmark {
                note: self.note.take(),
            },
        }
    }
}

impl From<Annotation> for AnnotationRecord {
    fn from(annotation: Annotation) -> Self {
        let mut record = AnnotationRecord {
            id: Some(annotation.id),
            document_id: annotation.document_id,
            position_index: annotation.position_index,
            kind: None,
            start_offset: None,
            end_offset: None,
            highlighted_text: None,
            note: None,
            created_at: annotation.created_at,
        };
        record.set_kind(annotation.kind);
        record
    }
}

impl TryFrom<AnnotationRecord> for Annotation {
    type Error = String;

    fn try_from(mut record: AnnotationRecord) -> std::result::Result<Self, Self::Error> {
        let id = record
            .id
            .ok_or_else(|| "annotation record has no id".to_string())?;
        let kind = record.take_kind();
        Ok(Annotation {
            id,
            document_id: record.document_id,
            position_index: record.position_index,
            kind,
            created_at: record.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draft_without_position_is_rejected() {
        let draft = AnnotationDraft::bookmark("alice", 4).without_position();
        assert!(matches!(draft.validate(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_inverted_highlight_is_rejected() {
        let draft = AnnotationDraft::highlight("alice", 1, 9, 3, "rabbit");
        assert!(matches!(draft.validate(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_note_only_sticks_to_bookmarks() {
        let highlight = AnnotationDraft::highlight("alice", 1, 0, 3, "The").with_note("ignored");
        assert!(matches!(highlight.kind, AnnotationKind::Highlight { .. }));

        let bookmark = AnnotationDraft::bookmark("alice", 1).with_note("chapter two");
        assert_eq!(
            bookmark.kind,
            AnnotationKind::Bookmark {
                note: Some("chapter two".into())
            }
        );
    }

    #[test]
    fn test_highlight_serializes_flat() {
        let annotation = Annotation {
            id: 7,
            document_id: "alice".into(),
            position_index: 2,
            kind: AnnotationKind::Highlight {
                start_offset: 4,
                end_offset: 10,
                highlighted_text: "rabbit".into(),
            },
            created_at: "2024-05-01T10:00:00Z".parse().unwrap(),
        };
        let value = serde_json::to_value(&annotation).unwrap();
        assert_eq!(value["kind"], "highlight");
        assert_eq!(value["startOffset"], 4);
        assert_eq!(value["documentId"], "alice");
        assert!(value.get("note").is_none());
    }

    #[test]
    fn test_record_without_kind_reads_as_bookmark() {
        let value = json!({
            "id": 3,
            "documentId": "alice",
            "positionIndex": 5,
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let annotation: Annotation = serde_json::from_value(value).unwrap();
        assert!(annotation.is_bookmark());
        assert_eq!(annotation.start_offset_or_zero(), 0);
    }

    #[test]
    fn test_legacy_type_field_is_accepted() {
        let value = json!({
            "id": 4,
            "documentId": "alice",
            "positionIndex": 1,
            "type": "highlight",
            "startOffset": 2,
            "endOffset": 6,
            "highlightedText": "down",
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let annotation: Annotation = serde_json::from_value(value).unwrap();
        assert!(annotation.is_highlight());
        assert_eq!(annotation.start_offset_or_zero(), 2);
    }

    #[test]
    fn test_reading_state_bounds() {
        let state = ReadingState {
            document_id: "alice".into(),
            position_index: 3,
            last_updated: Utc::now(),
        };
        assert!(state.is_within(4));
        assert!(!state.is_within(3));
        assert!(!state.is_within(0));
    }
}

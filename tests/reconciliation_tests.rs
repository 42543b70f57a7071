/// Position reconciliation between the durable store and the session cache.
///
/// Run with: cargo test --test reconciliation_tests
use async_trait::async_trait;
use readmark::reader::ContentUnit;
use readmark::{
    AnnotationDraft, Connector, Document, DocumentSource, DocumentSummary, PositionCache,
    ReaderSession, RecordStore, Result, StoreConfig, StoreError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Documents with a fixed number of paragraphs each.
struct Shelf {
    sizes: HashMap<String, usize>,
}

impl Shelf {
    fn new(sizes: &[(&str, usize)]) -> Self {
        Self {
            sizes: sizes.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
        }
    }
}

#[async_trait]
impl DocumentSource for Shelf {
    async fn fetch_manifest(&self) -> Result<Vec<DocumentSummary>> {
        let mut ids: Vec<&String> = self.sizes.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| DocumentSummary {
                id: id.clone(),
                title: id.to_uppercase(),
                author: None,
                year: None,
                cover_image: None,
            })
            .collect())
    }

    async fn fetch_document(&self, id: &str) -> Result<Document> {
        let size = *self
            .sizes
            .get(id)
            .ok_or_else(|| StoreError::Transport(format!("{} not found", id)))?;
        Ok(Document {
            id: id.to_string(),
            title: id.to_uppercase(),
            author: None,
            year: None,
            cover_image: None,
            content: (0..size)
                .map(|i| ContentUnit::Text(format!("Paragraph {}", i)))
                .collect(),
        })
    }
}

struct Fixture {
    records: RecordStore,
    cache: Arc<PositionCache>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(StoreConfig::in_memory())
    }

    fn with_config(config: StoreConfig) -> Self {
        Self {
            records: RecordStore::new(Connector::new(config)),
            cache: Arc::new(PositionCache::in_memory()),
        }
    }

    fn session(&self) -> ReaderSession<Shelf> {
        ReaderSession::new(
            self.records.clone(),
            Arc::clone(&self.cache),
            Shelf::new(&[("alice", 50), ("bob", 20), ("short", 3)]),
        )
    }
}

#[tokio::test]
async fn test_durable_position_wins_over_cache() {
    let fixture = Fixture::new();
    fixture.records.put_reading_state("alice", 5).await.unwrap();
    fixture.cache.set("alice", 2);

    let mut session = fixture.session();
    let position = session.open_document("alice").await.unwrap();

    assert_eq!(position, 5);
    assert_eq!(session.active_position(), 5);
    assert_eq!(fixture.cache.get("alice"), 5);
}

#[tokio::test]
async fn test_cache_is_fallback_when_store_has_nothing() {
    let fixture = Fixture::new();
    fixture.cache.set("alice", 3);

    let mut session = fixture.session();
    assert_eq!(session.open_document("alice").await.unwrap(), 3);
    assert_eq!(session.active_position(), 3);

    // The resolved value is mirrored into the durable tier as well
    let state = fixture.records.get_reading_state("alice").await.unwrap().unwrap();
    assert_eq!(state.position_index, 3);
}

#[tokio::test]
async fn test_switching_commits_latest_position() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    session.open_document("alice").await.unwrap();
    for position in 1..=10 {
        session.record_position("alice", position);
    }
    assert_eq!(session.active_position(), 10);

    // Nothing reaches the store while reading
    let state = fixture.records.get_reading_state("alice").await.unwrap().unwrap();
    assert_eq!(state.position_index, 0);

    session.open_document("bob").await.unwrap();
    let state = fixture.records.get_reading_state("alice").await.unwrap().unwrap();
    assert_eq!(state.position_index, 10);
    assert_eq!(fixture.cache.lookup("alice"), None);
    assert_eq!(session.selected(), Some("bob"));
}

#[tokio::test]
async fn test_close_commits_and_clears_cache() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    session.open_document("bob").await.unwrap();
    session.record_position("bob", 12);
    session.close_document().await;

    assert_eq!(session.selected(), None);
    assert!(session.document().is_none());
    assert_eq!(fixture.cache.lookup("bob"), None);
    let state = fixture.records.get_reading_state("bob").await.unwrap().unwrap();
    assert_eq!(state.position_index, 12);

    // Reopening picks the committed value up from the store
    assert_eq!(session.open_document("bob").await.unwrap(), 12);
}

#[tokio::test]
async fn test_out_of_range_position_resets_to_start() {
    let fixture = Fixture::new();
    fixture.records.put_reading_state("short", 7).await.unwrap();

    let mut session = fixture.session();
    assert_eq!(session.open_document("short").await.unwrap(), 0);
    assert_eq!(session.active_position(), 0);
}

#[tokio::test]
async fn test_out_of_range_cache_resets_to_start() {
    let fixture = Fixture::new();
    fixture.cache.set("short", 3);

    let mut session = fixture.session();
    assert_eq!(session.open_document("short").await.unwrap(), 0);
    assert_eq!(fixture.cache.get("short"), 0);
}

#[tokio::test]
async fn test_reselect_prefers_durable_position() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    session.open_document("alice").await.unwrap();
    session.record_position("alice", 7);

    fixture.records.put_reading_state("alice", 4).await.unwrap();
    assert_eq!(session.open_document("alice").await.unwrap(), 4);
    assert_eq!(session.active_position(), 4);
    assert_eq!(fixture.cache.get("alice"), 4);
}

#[tokio::test]
async fn test_reselect_keeps_position_when_store_has_none() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    session.open_document("alice").await.unwrap();
    session.record_position("alice", 9);
    fixture.records.delete_reading_state("alice").await.unwrap();

    assert_eq!(session.open_document("alice").await.unwrap(), 9);
    assert_eq!(fixture.cache.get("alice"), 9);
}

#[tokio::test]
async fn test_unavailable_store_keeps_cache() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"").unwrap();

    let fixture = Fixture::with_config(StoreConfig::new(&blocker));
    fixture.cache.set("alice", 6);

    let mut session = fixture.session();
    assert_eq!(session.open_document("alice").await.unwrap(), 6);

    session.record_position("alice", 8);
    session.close_document().await;
    // The commit failed, so the cache still carries the position
    assert_eq!(fixture.cache.lookup("alice"), Some(8));
}

#[tokio::test]
async fn test_unknown_document_fails_to_open() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    session.open_document("alice").await.unwrap();
    session.record_position("alice", 3);

    let err = session.open_document("nowhere").await.unwrap_err();
    assert!(matches!(err, StoreError::Transport(_)));
    assert_eq!(session.selected(), None);
    assert!(session.document_error().unwrap().contains("nowhere"));

    // alice was still committed on the way out
    let state = fixture.records.get_reading_state("alice").await.unwrap().unwrap();
    assert_eq!(state.position_index, 3);
}

#[tokio::test]
async fn test_manifest_loads_library() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    let ids: Vec<String> = session
        .load_manifest()
        .await
        .unwrap()
        .iter()
        .map(|d| d.id.clone())
        .collect();
    assert_eq!(ids, vec!["alice", "bob", "short"]);
    assert_eq!(session.manifest_error(), None);
}

#[tokio::test]
async fn test_session_annotation_list_follows_open_document() {
    let fixture = Fixture::new();
    fixture
        .records
        .add_annotation(AnnotationDraft::bookmark("alice", 10))
        .await
        .unwrap();

    let mut session = fixture.session();
    session.open_document("alice").await.unwrap();
    assert_eq!(session.annotations().len(), 1);

    let highlight = session
        .add_annotation(AnnotationDraft::highlight("alice", 4, 0, 9, "Down the"))
        .await
        .unwrap();
    session
        .add_annotation(AnnotationDraft::bookmark("bob", 1))
        .await
        .unwrap();

    let positions: Vec<u64> = session
        .annotations()
        .as_slice()
        .iter()
        .map(|a| a.position_index)
        .collect();
    assert_eq!(positions, vec![4, 10]);
    assert_eq!(session.annotations().highlights_for_unit(4).len(), 1);

    session.remove_annotation(highlight.id).await.unwrap();
    assert_eq!(session.annotations().len(), 1);
    assert_eq!(session.list_annotations("bob").await.len(), 1);

    let err = session
        .add_annotation(AnnotationDraft::bookmark("alice", 2).without_position())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(session.annotation_error().is_some());

    session.open_document("bob").await.unwrap();
    assert_eq!(session.annotations().len(), 1);
    assert_eq!(session.annotations().as_slice()[0].document_id, "bob");
}

#[tokio::test]
async fn test_positions_for_other_documents_leave_no_cache_entry() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    session.open_document("alice").await.unwrap();
    session.record_position("bob", 7);
    session.close_document().await;

    assert!(fixture.cache.documents().is_empty());
    assert!(fixture.records.get_reading_state("bob").await.unwrap().is_none());
    assert_eq!(session.open_document("bob").await.unwrap(), 0);
}

//! Reader session: which document is open, where the reader is in it, and
//! its annotations.
//!
//! Positions live in two tiers. While a document is open every change goes
//! to the [`PositionCache`] only; the durable store is written when the
//! reader switches away or closes. On open the durable tier answers first
//! and the cache is the fallback.

pub mod source;

pub use source::{
    ContentUnit, DirectorySource, Document, DocumentSource, DocumentSummary, HttpSource,
    document_id_from_title,
};

use crate::annotation::AnnotationList;
use crate::cache::PositionCache;
use crate::core::{
    Annotation, AnnotationDraft, AnnotationId, Degrade, DocumentId, Result, StoreError,
};
use crate::store::RecordStore;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct ReaderSession<S: DocumentSource> {
    records: RecordStore,
    cache: Arc<PositionCache>,
    source: S,

    library: Vec<DocumentSummary>,
    manifest_loading: bool,
    manifest_error: Option<String>,

    selected: Option<DocumentId>,
    document: Option<Document>,
    active_position: u64,
    document_loading: bool,
    document_error: Option<String>,

    annotations: AnnotationList,
    annotations_loading: bool,
    annotation_error: Option<String>,
}

impl<S: DocumentSource> ReaderSession<S> {
    pub fn new(records: RecordStore, cache: Arc<PositionCache>, source: S) -> Self {
        Self {
            records,
            cache,
            source,
            library: Vec::new(),
            manifest_loading: false,
            manifest_error: None,
            selected: None,
            document: None,
            active_position: 0,
            document_loading: false,
            document_error: None,
            annotations: AnnotationList::new(),
            annotations_loading: false,
            annotation_error: None,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn cache(&self) -> &Arc<PositionCache> {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn library(&self) -> &[DocumentSummary] {
        &self.library
    }

    pub fn is_manifest_loading(&self) -> bool {
        self.manifest_loading
    }

    pub fn manifest_error(&self) -> Option<&str> {
        self.manifest_error.as_deref()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn is_document_open(&self) -> bool {
        self.selected.is_some() && self.document.is_some()
    }

    pub fn active_position(&self) -> u64 {
        self.active_position
    }

    pub fn is_document_loading(&self) -> bool {
        self.document_loading
    }

    pub fn document_error(&self) -> Option<&str> {
        self.document_error.as_deref()
    }

    pub fn annotations(&self) -> &AnnotationList {
        &self.annotations
    }

    pub fn is_annotations_loading(&self) -> bool {
        self.annotations_loading
    }

    pub fn annotation_error(&self) -> Option<&str> {
        self.annotation_error.as_deref()
    }

    /// Fetches the library listing. On failure the previous listing is kept
    /// and the error is exposed through [`manifest_error`](Self::manifest_error).
    pub async fn load_manifest(&mut self) -> Result<&[DocumentSummary]> {
        self.manifest_loading = true;
        self.manifest_error = None;
        let fetched = self.source.fetch_manifest().await;
        self.manifest_loading = false;
        match fetched {
            Ok(library) => {
                self.library = library;
                Ok(&self.library)
            }
            Err(err) => {
                warn!("Failed to load document manifest: {}", err);
                self.manifest_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Opens `id`, committing the position of the document open before it.
    ///
    /// Opening the document that is already open re-reads its durable
    /// position instead of fetching it again. Returns the resolved position.
    pub async fn open_document(&mut self, id: &str) -> Result<u64> {
        if self.selected.as_deref() == Some(id) && self.document.is_some() {
            return Ok(self.reselect(id).await);
        }

        if let Some(previous) = self.selected.take()
            && self.document.is_some()
        {
            self.commit_position(&previous).await;
        }
        self.annotations.clear();

        self.selected = Some(id.to_string());
        self.document = None;
        self.active_position = 0;
        self.document_loading = true;
        self.document_error = None;

        let fetched = self.source.fetch_document(id).await;
        self.document_loading = false;
        let document = match fetched {
            Ok(document) => document,
            Err(err) => {
                warn!("Failed to load document '{}': {}", id, err);
                self.document_error = Some(err.to_string());
                self.selected = None;
                return Err(err);
            }
        };
        let unit_count = document.unit_count();
        self.document = Some(document);

        let position = self.restore_position(id, unit_count).await;
        self.load_annotations(id).await;
        Ok(position)
    }

    /// Commits the open document's position and forgets it.
    pub async fn close_document(&mut self) {
        if let Some(previous) = self.selected.take()
            && self.document.is_some()
        {
            self.commit_position(&previous).await;
        }
        self.document = None;
        self.active_position = 0;
        self.document_error = None;
        self.annotations.clear();
        self.annotation_error = None;
    }

    /// Records a position change for the open document. Only the cache is
    /// written; the durable store catches up on switch or close. Positions
    /// for any other id are dropped.
    pub fn record_position(&mut self, id: &str, position_index: u64) {
        if id.is_empty() || self.selected.as_deref() != Some(id) {
            debug!(
                "Ignoring position {} for '{}': not the open document",
                position_index, id
            );
            return;
        }
        self.cache.set(id, position_index);
        self.active_position = position_index;
    }

    /// Stores a new annotation and, when it belongs to the open document,
    /// inserts it into the in-memory list in display order.
    pub async fn add_annotation(&mut self, draft: AnnotationDraft) -> Result<Annotation> {
        self.annotation_error = None;
        match self.records.add_annotation(draft).await {
            Ok(annotation) => {
                if self.selected.as_deref() == Some(annotation.document_id.as_str()) {
                    self.annotations.insert(annotation.clone());
                }
                Ok(annotation)
            }
            Err(err) => {
                warn!("Failed to add annotation: {}", err);
                self.annotation_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn remove_annotation(&mut self, id: AnnotationId) -> Result<()> {
        self.annotation_error = None;
        match self.records.delete_annotation(id).await {
            Ok(()) => {
                self.annotations.remove(id);
                Ok(())
            }
            Err(err) => {
                warn!("Failed to delete annotation {}: {}", id, err);
                self.annotation_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Annotations of `id` in display order, read from the durable store.
    /// Listing the open document also refreshes the in-memory list.
    pub async fn list_annotations(&mut self, id: &str) -> Vec<Annotation> {
        if self.selected.as_deref() == Some(id) {
            self.load_annotations(id).await;
            return self.annotations.as_slice().to_vec();
        }
        self.records
            .get_annotations_for_document(id)
            .await
            .degrade("listing annotations")
    }

    /// Durable position if it is present and inside the document, else the
    /// cached one clamped to the document. The result is mirrored into the
    /// cache, and into the durable store when it did not come from there.
    async fn restore_position(&mut self, id: &str, unit_count: usize) -> u64 {
        let durable = self
            .records
            .get_reading_state(id)
            .await
            .degrade("reading stored position");

        let position = match durable {
            Some(state) if state.is_within(unit_count) => {
                info!("Restored position {} for '{}' from the store", state.position_index, id);
                self.cache.set(id, state.position_index);
                self.active_position = state.position_index;
                return state.position_index;
            }
            Some(state) => {
                let err = StoreError::Bounds {
                    position: state.position_index,
                    unit_count,
                };
                debug!("Ignoring stored position for '{}': {}", id, err);
                self.cache.get(id)
            }
            None => self.cache.get(id),
        };
        let position = clamp(id, position, unit_count);
        info!("Restored position {} for '{}' from the session cache", position, id);

        self.cache.set(id, position);
        self.active_position = position;
        if let Err(err) = self.records.put_reading_state(id, position).await {
            warn!("Could not store restored position for '{}': {}", id, err);
        }
        position
    }

    /// Re-reads the durable position of the open document. The durable tier
    /// wins over the in-memory position; without a usable stored value the
    /// in-memory position stays.
    async fn reselect(&mut self, id: &str) -> u64 {
        let unit_count = self.document.as_ref().map(Document::unit_count).unwrap_or(0);
        let durable = self
            .records
            .get_reading_state(id)
            .await
            .degrade("reading stored position");

        match durable {
            Some(state) if state.is_within(unit_count) => {
                self.active_position = state.position_index;
            }
            _ => self.active_position = clamp(id, self.active_position, unit_count),
        }
        self.cache.set(id, self.active_position);
        self.active_position
    }

    /// Writes the latest position of `id` to the durable store, then drops its
    /// cache entry. A failed write keeps the cache entry for the next open.
    async fn commit_position(&mut self, id: &str) {
        let position = self.cache.lookup(id).unwrap_or(self.active_position);
        match self.records.put_reading_state(id, position).await {
            Ok(_) => {
                debug!("Committed position {} for '{}'", position, id);
                self.cache.clear(id);
            }
            Err(err) => warn!("Could not commit position for '{}': {}", id, err),
        }
    }

    async fn load_annotations(&mut self, id: &str) {
        self.annotations_loading = true;
        self.annotation_error = None;
        let loaded = self.records.get_annotations_for_document(id).await;
        self.annotations_loading = false;
        match loaded {
            Ok(annotations) => self.annotations = AnnotationList::from_unsorted(annotations),
            Err(err) => {
                warn!("Failed to load annotations for '{}': {}", id, err);
                self.annotation_error = Some(err.to_string());
                self.annotations.clear();
            }
        }
    }
}

fn clamp(id: &str, position: u64, unit_count: usize) -> u64 {
    if position < unit_count as u64 {
        return position;
    }
    if position > 0 {
        let err = StoreError::Bounds { position, unit_count };
        debug!("Resetting position for '{}': {}", id, err);
    }
    0
}

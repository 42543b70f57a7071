use super::{bookmarks, highlights, highlights_for_unit, ordering_key, sort_annotations};
use crate::core::{Annotation, AnnotationId};

/// Annotations of the open document, always kept in display order.
#[derive(Debug, Clone, Default)]
pub struct AnnotationList {
    items: Vec<Annotation>,
}

impl AnnotationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_unsorted(mut items: Vec<Annotation>) -> Self {
        sort_annotations(&mut items);
        Self { items }
    }

    /// Inserts after every annotation with an equal or smaller key, which is
    /// where a stable sort of the appended list would put it.
    pub fn insert(&mut self, annotation: Annotation) {
        let key = ordering_key(&annotation);
        let at = self.items.partition_point(|a| ordering_key(a) <= key);
        self.items.insert(at, annotation);
    }

    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let at = self.items.iter().position(|a| a.id == id)?;
        Some(self.items.remove(at))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[Annotation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn bookmarks(&self) -> Vec<&Annotation> {
        bookmarks(&self.items).collect()
    }

    pub fn highlights(&self) -> Vec<&Annotation> {
        highlights(&self.items).collect()
    }

    pub fn highlights_for_unit(&self, position_index: u64) -> Vec<&Annotation> {
        highlights_for_unit(&self.items, position_index).collect()
    }
}

//! Ordering and classification of a document's annotations.
//!
//! Annotations are ordered by `(position_index, start offset)` where anything
//! that is not a highlight counts as offset 0. The sort is stable, and
//! records come out of the store in id order, so equal keys keep insertion
//! order.

mod list;

pub use list::AnnotationList;

use crate::core::{Annotation, AnnotationId};

/// Sort key of an annotation.
pub fn ordering_key(annotation: &Annotation) -> (u64, u64) {
    (annotation.position_index, annotation.start_offset_or_zero())
}

pub fn sort_annotations(annotations: &mut [Annotation]) {
    annotations.sort_by_key(ordering_key);
}

pub fn bookmarks(annotations: &[Annotation]) -> impl Iterator<Item = &Annotation> {
    annotations.iter().filter(|a| a.is_bookmark())
}

pub fn highlights(annotations: &[Annotation]) -> impl Iterator<Item = &Annotation> {
    annotations.iter().filter(|a| a.is_highlight())
}

/// Highlights anchored at content unit `position_index`, in list order.
pub fn highlights_for_unit(
    annotations: &[Annotation],
    position_index: u64,
) -> impl Iterator<Item = &Annotation> {
    highlights(annotations).filter(move |a| a.position_index == position_index)
}

pub fn find(annotations: &[Annotation], id: AnnotationId) -> Option<&Annotation> {
    annotations.iter().find(|a| a.id == id)
}

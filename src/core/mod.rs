pub mod error;
pub mod types;
pub mod value;

pub use error::{Degrade, Result, StoreError};
pub use types::{Annotation, AnnotationDraft, AnnotationId, AnnotationKind, DocumentId, ReadingState};
pub use value::Key;

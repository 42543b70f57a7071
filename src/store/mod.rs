//! Durable record store: reading states and annotations.
//!
//! Every operation runs in its own short transaction on the shared
//! connection. Errors are returned typed; reads come back as
//! [`StoreError::TransientRead`] so callers can `.degrade()` them, annotation
//! mutations as [`StoreError::WriteConfirmation`] (validation keeps its own
//! kind).

use crate::annotation::sort_annotations;
use crate::connection::Connector;
use crate::core::{
    Annotation, AnnotationDraft, AnnotationId, Key, ReadingState, Result, StoreError,
};
use crate::migration::{ANNOTATIONS, BY_DOCUMENT_INDEX, BY_LAST_UPDATED_INDEX, READING_STATES};
use crate::storage::{Database, Record};
use chrono::{SubsecRound, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[derive(Clone)]
pub struct RecordStore {
    connector: Arc<Connector>,
}

fn decode<T: DeserializeOwned>(record: &Record) -> Result<T> {
    Ok(serde_json::from_value(record.clone())?)
}

fn require_document_id(document_id: &str) -> Result<()> {
    if document_id.is_empty() {
        return Err(StoreError::Validation(
            "Document id must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl RecordStore {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    async fn db(&self) -> Result<Arc<Database>> {
        self.connector.connection().await
    }

    /// Stored reading state of `document_id`, `None` when there is none.
    pub async fn get_reading_state(&self, document_id: &str) -> Result<Option<ReadingState>> {
        if document_id.is_empty() {
            return Ok(None);
        }
        let lookup = async {
            let db = self.db().await?;
            db.read(&[READING_STATES], |tx| {
                tx.get(READING_STATES, &Key::from(document_id))?
                    .map(decode::<ReadingState>)
                    .transpose()
            })
            .await
        };
        lookup.await.map_err(StoreError::into_transient_read)
    }

    /// Upserts the position of `document_id`, stamping `last_updated` with
    /// the current time (millisecond precision, as stored).
    pub async fn put_reading_state(
        &self,
        document_id: &str,
        position_index: u64,
    ) -> Result<ReadingState> {
        require_document_id(document_id)?;
        let state = ReadingState {
            document_id: document_id.to_string(),
            position_index,
            last_updated: Utc::now().trunc_subsecs(3),
        };
        let record = serde_json::to_value(&state)?;
        let db = self.db().await?;
        db.write(&[READING_STATES], |tx| tx.put(READING_STATES, record))
            .await?;
        debug!("Saved position {} for '{}'", position_index, document_id);
        Ok(state)
    }

    /// Removing a state that does not exist is not an error.
    pub async fn delete_reading_state(&self, document_id: &str) -> Result<()> {
        require_document_id(document_id)?;
        let db = self.db().await?;
        db.write(&[READING_STATES], |tx| {
            tx.delete(READING_STATES, &Key::from(document_id))
        })
        .await?;
        Ok(())
    }

    /// Up to `limit` reading states, most recently updated first.
    pub async fn recent_reading_states(&self, limit: usize) -> Result<Vec<ReadingState>> {
        let lookup = async {
            let db = self.db().await?;
            db.read(&[READING_STATES], |tx| {
                let collection = tx.collection(READING_STATES)?;
                let mut states = Vec::new();
                for (_, keys) in collection.index_entries(BY_LAST_UPDATED_INDEX)?.into_iter().rev() {
                    for key in keys {
                        if states.len() == limit {
                            return Ok(states);
                        }
                        if let Some(record) = collection.get(key) {
                            states.push(decode::<ReadingState>(record)?);
                        }
                    }
                }
                Ok(states)
            })
            .await
        };
        lookup.await.map_err(StoreError::into_transient_read)
    }

    /// Validates and stores `draft`, returning it with its assigned `id` and
    /// `created_at`. Nothing is written when validation fails.
    pub async fn add_annotation(&self, draft: AnnotationDraft) -> Result<Annotation> {
        let record = draft.into_record(Utc::now())?;
        let record = serde_json::to_value(record)?;
        let insert = async {
            let db = self.db().await?;
            db.write(&[ANNOTATIONS], |tx| {
                let key = tx.add(ANNOTATIONS, record)?;
                let stored = tx.get(ANNOTATIONS, &key)?.ok_or_else(|| {
                    StoreError::WriteConfirmation(format!("Annotation {} missing after insert", key))
                })?;
                decode::<Annotation>(stored)
            })
            .await
        };
        let annotation = insert.await.map_err(StoreError::into_write_confirmation)?;
        debug!(
            "Added {} {} to '{}' at {}",
            annotation.kind, annotation.id, annotation.document_id, annotation.position_index
        );
        Ok(annotation)
    }

    /// Annotations of `document_id` in display order.
    pub async fn get_annotations_for_document(&self, document_id: &str) -> Result<Vec<Annotation>> {
        let lookup = async {
            let db = self.db().await?;
            db.read(&[ANNOTATIONS], |tx| {
                tx.get_all_by_index(ANNOTATIONS, BY_DOCUMENT_INDEX, &Key::from(document_id))?
                    .into_iter()
                    .map(decode::<Annotation>)
                    .collect::<Result<Vec<_>>>()
            })
            .await
        };
        let mut annotations = lookup.await.map_err(StoreError::into_transient_read)?;
        sort_annotations(&mut annotations);
        Ok(annotations)
    }

    /// Deleting an id that is not stored succeeds without effect.
    pub async fn delete_annotation(&self, id: AnnotationId) -> Result<()> {
        let remove = async {
            let db = self.db().await?;
            db.write(&[ANNOTATIONS], |tx| tx.delete(ANNOTATIONS, &Key::from(id)))
                .await
        };
        let removed = remove.await.map_err(StoreError::into_write_confirmation)?;
        if removed {
            debug!("Deleted annotation {}", id);
        }
        Ok(())
    }
}

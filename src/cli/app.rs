use super::{AnnotationAction, Cli, Command, PositionAction};
use anyhow::{Context, Result, bail};
use readmark::annotation::highlights_for_unit;
use readmark::reader::document_id_from_title;
use readmark::{Annotation, AnnotationDraft, AnnotationKind, Connector, RecordStore, StoreConfig};
use std::sync::Arc;

pub struct App {
    config: StoreConfig,
}

impl App {
    pub fn new(cli: &Cli) -> Self {
        let mut config = StoreConfig::from_env();
        if let Some(dir) = &cli.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(database) = &cli.database {
            config.database = database.clone();
        }
        if let Some(mode) = cli.durability {
            config.durability = mode;
        }
        Self { config }
    }

    fn records(&self) -> RecordStore {
        RecordStore::new(Connector::new(self.config.clone()))
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Status => self.status().await,
            Command::Position { action } => self.position(action).await,
            Command::Annotations { action } => self.annotations(action).await,
            Command::Recent { limit } => {
                for state in self.records().recent_reading_states(limit).await? {
                    println!(
                        "{}\t{}\t{}",
                        state.document_id,
                        state.position_index,
                        state.last_updated.to_rfc3339()
                    );
                }
                Ok(())
            }
            Command::Slug { title } => {
                let slug = document_id_from_title(&title);
                if slug.is_empty() {
                    bail!("'{}' has no characters usable in a document id", title);
                }
                println!("{}", slug);
                Ok(())
            }
            Command::Checkpoint => {
                let db = self.connect().await?;
                db.checkpoint().await.context("checkpoint failed")?;
                println!("checkpointed {}", self.config.snapshot_path().display());
                Ok(())
            }
        }
    }

    async fn connect(&self) -> Result<Arc<readmark::Database>> {
        Connector::new(self.config.clone())
            .connection()
            .await
            .with_context(|| format!("failed to open {}", self.config.data_dir.display()))
    }

    async fn status(&self) -> Result<()> {
        let db = self.connect().await?;
        println!("database:       {}", db.name());
        println!("schema version: {}", db.version());
        println!("durable:        {}", db.is_durable());
        let counts = db.record_counts().await;
        for schema in db.schemas().await {
            let indexes: Vec<&str> = schema.indexes().iter().map(|i| i.name.as_str()).collect();
            println!(
                "collection {} (key {}{}) indexes [{}] records {}",
                schema.name(),
                schema.key_path(),
                if schema.is_auto_increment() { ", auto" } else { "" },
                indexes.join(", "),
                counts.get(schema.name()).copied().unwrap_or(0)
            );
        }
        Ok(())
    }

    async fn position(&self, action: PositionAction) -> Result<()> {
        let records = self.records();
        match action {
            PositionAction::Get { document } => {
                match records.get_reading_state(&document).await? {
                    Some(state) => println!(
                        "{}\t{}",
                        state.position_index,
                        state.last_updated.to_rfc3339()
                    ),
                    None => println!("no stored position for '{}'", document),
                }
            }
            PositionAction::Set { document, position } => {
                records
                    .put_reading_state(&document, position)
                    .await
                    .with_context(|| format!("failed to store position for '{}'", document))?;
            }
            PositionAction::Clear { document } => {
                records.delete_reading_state(&document).await?;
            }
        }
        Ok(())
    }

    async fn annotations(&self, action: AnnotationAction) -> Result<()> {
        let records = self.records();
        match action {
            AnnotationAction::List { document, unit } => {
                let annotations = records.get_annotations_for_document(&document).await?;
                match unit {
                    Some(unit) => highlights_for_unit(&annotations, unit).for_each(print_annotation),
                    None => annotations.iter().for_each(print_annotation),
                }
            }
            AnnotationAction::Bookmark {
                document,
                position,
                note,
            } => {
                let mut draft = AnnotationDraft::bookmark(document, position);
                if let Some(note) = note {
                    draft = draft.with_note(note);
                }
                print_annotation(&records.add_annotation(draft).await?);
            }
            AnnotationAction::Highlight {
                document,
                position,
                start,
                end,
                text,
            } => {
                let draft = AnnotationDraft::highlight(document, position, start, end, text);
                print_annotation(&records.add_annotation(draft).await?);
            }
            AnnotationAction::Remove { id } => {
                records
                    .delete_annotation(id)
                    .await
                    .with_context(|| format!("failed to delete annotation {}", id))?;
            }
        }
        Ok(())
    }
}

fn print_annotation(annotation: &Annotation) {
    let detail = match &annotation.kind {
        AnnotationKind::Bookmark { note } => note.clone().unwrap_or_default(),
        AnnotationKind::Highlight {
            start_offset,
            end_offset,
            highlighted_text,
        } => format!("[{}..{}] {}", start_offset, end_offset, highlighted_text),
    };
    println!(
        "{}\t{}\t{}\t{}",
        annotation.id, annotation.position_index, annotation.kind, detail
    );
}

pub mod app;

use clap::{Parser, Subcommand};
use readmark::DurabilityMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "readmark")]
#[command(about = "Inspect and edit reading positions and annotations")]
pub struct Cli {
    /// Data directory (defaults to READMARK_DATA_DIR or ./.readmark)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Database name
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// sync, async or memory
    #[arg(long, global = true)]
    pub durability: Option<DurabilityMode>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Schema version, collections and record counts
    Status,
    Position {
        #[command(subcommand)]
        action: PositionAction,
    },
    Annotations {
        #[command(subcommand)]
        action: AnnotationAction,
    },
    /// Most recently updated reading states
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Document id derived from a title
    Slug { title: String },
    /// Fold the write-ahead log into a fresh snapshot
    Checkpoint,
}

#[derive(Subcommand)]
pub enum PositionAction {
    Get { document: String },
    Set { document: String, position: u64 },
    Clear { document: String },
}

#[derive(Subcommand)]
pub enum AnnotationAction {
    List {
        document: String,
        /// Only highlights anchored at this content unit
        #[arg(long)]
        unit: Option<u64>,
    },
    Bookmark {
        document: String,
        position: u64,
        #[arg(long)]
        note: Option<String>,
    },
    Highlight {
        document: String,
        position: u64,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        #[arg(long)]
        text: String,
    },
    Remove { id: i64 },
}

use crate::core::{DocumentId, Result, StoreError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Library entry as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

/// One addressable unit of a document. Paragraph documents list plain
/// strings; paginated ones list `{ "page_content", "page" }` objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentUnit {
    Text(String),
    Page { page_content: String, page: u32 },
}

impl ContentUnit {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Page { page_content, .. } => page_content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentUnit>,
}

impl Document {
    pub fn unit_count(&self) -> usize {
        self.content.len()
    }
}

/// Where manifests and document bodies come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_manifest(&self) -> Result<Vec<DocumentSummary>>;
    async fn fetch_document(&self, id: &str) -> Result<Document>;
}

fn transport(context: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Transport(format!("{}: {}", context, err))
}

/// Reads `manifest.json` and `<id>.json` from a local directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.root.join(file);
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| transport(&format!("Failed to read {}", path.display()), e))?;
        serde_json::from_slice(&raw)
            .map_err(|e| transport(&format!("Malformed {}", path.display()), e))
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn fetch_manifest(&self) -> Result<Vec<DocumentSummary>> {
        self.read_json("manifest.json").await
    }

    async fn fetch_document(&self, id: &str) -> Result<Document> {
        check_id(id)?;
        self.read_json(&format!("{}.json", id)).await
    }
}

/// GETs `<base>/manifest.json` and `<base>/<id>.json`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, file);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport(&format!("GET {}", url), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Transport(format!("GET {} returned {}", url, status)));
        }
        response
            .json()
            .await
            .map_err(|e| transport(&format!("Malformed body from {}", url), e))
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn fetch_manifest(&self) -> Result<Vec<DocumentSummary>> {
        self.get_json("manifest.json").await
    }

    async fn fetch_document(&self, id: &str) -> Result<Document> {
        check_id(id)?;
        self.get_json(&format!("{}.json", id)).await
    }
}

// Ids become file names and URL segments.
fn check_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(StoreError::Validation(format!("Invalid document id '{}'", id)));
    }
    Ok(())
}

/// Derives a document id from a title: lowercase, only `[a-z0-9-]`, each run
/// of whitespace replaced by one hyphen. Hyphens already in the title are kept
/// as they are, apart from leading and trailing ones.
///
/// ```
/// use readmark::reader::document_id_from_title;
///
/// assert_eq!(document_id_from_title("Alice's Adventures in Wonderland"), "alices-adventures-in-wonderland");
/// assert_eq!(document_id_from_title("  --The   Time Machine!  "), "the-time-machine");
/// ```
pub fn document_id_from_title(title: &str) -> String {
    static DISALLOWED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9\s-]").expect("static pattern"));
    static SEPARATORS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

    let lowered = title.to_lowercase();
    let cleaned = DISALLOWED.replace_all(&lowered, "");
    SEPARATORS
        .replace_all(cleaned.trim(), "-")
        .trim_matches('-')
        .to_string()
}

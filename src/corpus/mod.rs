// Markdown policy/definition documents are loaded once at process start and
// split into heading-delimited chunks. The retriever indexes these chunks.

pub mod retriever;

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug)]
pub enum CorpusError {
    IoError(std::io::Error),
    NotFound(PathBuf),
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusError::IoError(err) => write!(f, "IO error: {}", err),
            CorpusError::NotFound(path) => {
                write!(f, "Documents directory not found: {}", path.display())
            }
        }
    }
}

impl Error for CorpusError {}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::IoError(err)
    }
}

/// A span of document text with a stable identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub source: String,
}

#[derive(Debug)]
pub struct Corpus {
    chunks: Vec<DocumentChunk>,
}

impl Corpus {
    /// Load all markdown files from a directory and split them into chunks.
    /// A missing directory is an error; an empty one yields an empty corpus.
    pub fn load(docs_dir: &Path) -> Result<Self, CorpusError> {
        if !docs_dir.exists() {
            return Err(CorpusError::NotFound(docs_dir.to_path_buf()));
        }

        let mut chunks = Vec::new();
        let mut entries: Vec<PathBuf> = std::fs::read_dir(docs_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        // Stable chunk ids require a stable file order.
        entries.sort();

        for path in entries {
            let source = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("doc")
                .to_string();
            let content = std::fs::read_to_string(&path)?;

            for (idx, section) in split_sections(&content).into_iter().enumerate() {
                let id = format!("{}::chunk{}", source, idx);
                debug!("Loaded chunk {} ({} chars)", id, section.len());
                chunks.push(DocumentChunk {
                    id,
                    text: section,
                    source: source.clone(),
                });
            }
        }

        info!("Loaded {} corpus chunks from {}", chunks.len(), docs_dir.display());
        Ok(Self { chunks })
    }

    pub fn from_chunks(chunks: Vec<DocumentChunk>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Split markdown content into sections on `#`/`##` headings. Text before the
/// first heading forms its own section.
fn split_sections(content: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        let is_heading = trimmed.starts_with("# ") || trimmed.starts_with("## ");
        if is_heading && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }

    sections
}

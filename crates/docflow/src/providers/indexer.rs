//! Document indexer trait for retrieval over converted markdown

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Metadata;

/// A piece of text handed to the indexer
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub content: String,
    pub metadata: Metadata,
}

/// Search result from the indexer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    /// The matched text
    pub content: String,
    /// Similarity score (0.0 to 1.0, higher is more similar)
    pub score: f32,
    pub metadata: Metadata,
}

/// Trait for indexing documents and searching them
///
/// Implementations:
/// - `MemoryIndexer`: in-process term-overlap index
#[async_trait]
pub trait DocumentIndexer: Send + Sync {
    /// Add documents, returning how many were indexed
    async fn add_documents(&self, documents: &[IndexDocument]) -> Result<usize>;

    /// Search for documents similar to `query`, best first
    async fn search(&self, query: &str, top_k: usize, threshold: f32) -> Result<Vec<SearchHit>>;

    /// Index statistics
    async fn stats(&self) -> Result<Metadata>;

    /// Label stored on records indexed by this indexer
    fn vector_type(&self) -> &str;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Splits markdown into header-scoped chunks of bounded size
pub struct MarkdownSplitter {
    /// Target chunk size in characters
    chunk_size: usize,
}

impl MarkdownSplitter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Split `text`, starting a new chunk at every heading and whenever a
    /// paragraph would push the current chunk past `chunk_size`
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            let starts_section = paragraph.starts_with('#');
            let overflow = current.len() + paragraph.len() + 2 > self.chunk_size;

            if !current.is_empty() && (starts_section || overflow) {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

impl Default for MarkdownSplitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_headings() {
        let chunks = MarkdownSplitter::new(1000).split("# Title\n\nIntro.\n\n## Part\n\nBody one.\n\nBody two.");
        assert_eq!(
            chunks,
            vec![
                "# Title\n\nIntro.".to_string(),
                "## Part\n\nBody one.\n\nBody two.".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_on_size() {
        let chunks = MarkdownSplitter::new(12).split("aaaa bbbb\n\ncccc dddd\n\ne");
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd\n\ne"]);
    }

    #[test]
    fn test_split_empty() {
        assert!(MarkdownSplitter::default().split("\n\n  \n\n").is_empty());
    }
}

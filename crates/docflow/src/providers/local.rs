//! Local provider implementations that need no external services
//!
//! `TextFileConverter` reads text-based uploads from disk; `MemoryIndexer`
//! keeps indexed chunks in process and ranks them by query term overlap.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::Metadata;

use super::converter::{ConvertedDocument, DocumentConverter, Section};
use super::indexer::{DocumentIndexer, IndexDocument, SearchHit};

/// Extensions read as prose
const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "log"];
/// Extensions already in markdown
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];
/// Delimited extensions kept verbatim in a fenced block
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv", "json"];

/// Converter for text, markdown and delimited files
#[derive(Debug, Default, Clone)]
pub struct TextFileConverter;

impl TextFileConverter {
    fn delimiter(ext: &str) -> Option<u8> {
        match ext {
            "csv" => Some(b','),
            "tsv" => Some(b'\t'),
            _ => None,
        }
    }

    /// Header and rows as `a | b | c` lines
    fn render_delimited(content: &str, delimiter: u8) -> std::result::Result<String, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(content.as_bytes());
        let mut rendered = String::new();

        let headers = reader.headers()?;
        rendered.push_str(&headers.iter().collect::<Vec<_>>().join(" | "));
        rendered.push('\n');

        for record in reader.records() {
            let record = record?;
            rendered.push_str(&record.iter().collect::<Vec<_>>().join(" | "));
            rendered.push('\n');
        }

        Ok(rendered)
    }

    pub fn new() -> Self {
        Self
    }

    fn extension(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    fn parse_markdown(content: &str) -> (Option<String>, Vec<Section>) {
        let mut title = None;
        let mut sections = Vec::new();
        let mut heading: Option<String> = None;
        let mut body = String::new();

        for line in content.lines() {
            if let Some(text) = line.strip_prefix("# ") {
                if title.is_none() && sections.is_empty() && heading.is_none() && body.trim().is_empty() {
                    title = Some(text.trim().to_string());
                    body.clear();
                    continue;
                }
            }

            if let Some(text) = line.strip_prefix("## ") {
                if heading.is_some() || !body.trim().is_empty() {
                    sections.push(Section {
                        heading: heading.take(),
                        body: std::mem::take(&mut body),
                    });
                }
                heading = Some(text.trim().to_string());
                body.clear();
                continue;
            }

            body.push_str(line);
            body.push('\n');
        }

        if heading.is_some() || !body.trim().is_empty() {
            sections.push(Section { heading, body });
        }

        (title, sections)
    }
}

#[async_trait]
impl DocumentConverter for TextFileConverter {
    async fn convert(&self, path: &Path) -> Result<ConvertedDocument> {
        let ext = Self::extension(path).unwrap_or_default();
        if !self.supports(path) {
            return Err(Error::conversion(format!(
                "unsupported file type '{}' for {}",
                ext,
                path.display()
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::conversion(format!("failed to read {}: {}", path.display(), e)))?;
        let content = String::from_utf8(bytes)
            .map_err(|_| Error::conversion(format!("{} is not valid UTF-8 text", path.display())))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string());

        let (title, sections) = if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
            let (title, sections) = Self::parse_markdown(&content);
            (title.or(stem), sections)
        } else if let Some(delimiter) = Self::delimiter(&ext) {
            let body = Self::render_delimited(&content, delimiter)
                .map_err(|e| Error::conversion(format!("{}: {}", path.display(), e)))?;
            (stem, vec![Section { heading: None, body }])
        } else if DELIMITED_EXTENSIONS.contains(&ext.as_str()) {
            let body = format!("```{}\n{}\n```", ext, content.trim_end());
            (stem, vec![Section { heading: None, body }])
        } else {
            (
                stem,
                vec![Section {
                    heading: None,
                    body: content,
                }],
            )
        };

        tracing::debug!("Converted {} into {} sections", path.display(), sections.len());

        Ok(ConvertedDocument {
            source: path.to_path_buf(),
            title,
            sections,
        })
    }

    fn supports(&self, path: &Path) -> bool {
        match Self::extension(path) {
            Some(ext) => {
                let ext = ext.as_str();
                TEXT_EXTENSIONS.contains(&ext)
                    || MARKDOWN_EXTENSIONS.contains(&ext)
                    || DELIMITED_EXTENSIONS.contains(&ext)
            }
            None => false,
        }
    }

    fn name(&self) -> &str {
        "text-file"
    }
}

struct IndexedEntry {
    content: String,
    terms: HashSet<String>,
    metadata: Metadata,
}

/// In-memory index scored by the fraction of query terms a chunk contains
#[derive(Default)]
pub struct MemoryIndexer {
    entries: RwLock<Vec<IndexedEntry>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lowercased alphanumeric terms longer than one character
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl DocumentIndexer for MemoryIndexer {
    async fn add_documents(&self, documents: &[IndexDocument]) -> Result<usize> {
        let mut entries = self.entries.write();
        let mut added = 0;
        for doc in documents {
            if doc.content.trim().is_empty() {
                continue;
            }
            entries.push(IndexedEntry {
                terms: terms(&doc.content),
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
            });
            added += 1;
        }
        Ok(added)
    }

    async fn search(&self, query: &str, top_k: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        let query_terms = terms(query);
        if query_terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter_map(|entry| {
                let matched = query_terms.intersection(&entry.terms).count();
                let score = matched as f32 / query_terms.len() as f32;
                (matched > 0 && score >= threshold).then(|| SearchHit {
                    content: entry.content.clone(),
                    score,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn stats(&self) -> Result<Metadata> {
        let entries = self.entries.read();
        let unique_terms: HashSet<&String> = entries.iter().flat_map(|e| e.terms.iter()).collect();

        let mut stats = Metadata::new();
        stats.insert("vector_type".to_string(), Value::from(self.vector_type()));
        stats.insert("document_count".to_string(), Value::from(entries.len()));
        stats.insert("term_count".to_string(), Value::from(unique_terms.len()));
        Ok(stats)
    }

    fn vector_type(&self) -> &str {
        "memory"
    }

    fn name(&self) -> &str {
        "memory-terms"
    }
}

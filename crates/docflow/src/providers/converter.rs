//! Document converter trait for turning uploads into markdown

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Output format of an exported document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    PlainText,
}

/// A titled block of converted content
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: Option<String>,
    pub body: String,
}

/// Structured result of a conversion
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedDocument {
    /// File the document was converted from
    pub source: PathBuf,
    pub title: Option<String>,
    pub sections: Vec<Section>,
}

impl ConvertedDocument {
    /// Render the document in the requested format
    pub fn export(&self, format: ExportFormat) -> String {
        let mut out = String::new();

        match format {
            ExportFormat::Markdown => {
                if let Some(title) = &self.title {
                    out.push_str("# ");
                    out.push_str(title);
                    out.push_str("\n\n");
                }
                for section in &self.sections {
                    if let Some(heading) = &section.heading {
                        out.push_str("## ");
                        out.push_str(heading);
                        out.push_str("\n\n");
                    }
                    let body = section.body.trim();
                    if !body.is_empty() {
                        out.push_str(body);
                        out.push_str("\n\n");
                    }
                }
            }
            ExportFormat::PlainText => {
                if let Some(title) = &self.title {
                    out.push_str(title);
                    out.push_str("\n\n");
                }
                for section in &self.sections {
                    if let Some(heading) = &section.heading {
                        out.push_str(heading);
                        out.push('\n');
                    }
                    let body = section.body.trim();
                    if !body.is_empty() {
                        out.push_str(body);
                        out.push_str("\n\n");
                    }
                }
            }
        }

        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out.push('\n');
        out
    }
}

/// Trait for converting a stored upload into a structured document
///
/// Implementations:
/// - `TextFileConverter`: text, markdown and delimited files read from disk
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the file at `path`
    async fn convert(&self, path: &Path) -> Result<ConvertedDocument>;

    /// Whether this converter accepts the file's extension
    fn supports(&self, _path: &Path) -> bool {
        true
    }

    /// Get provider name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> ConvertedDocument {
        ConvertedDocument {
            source: PathBuf::from("q3.txt"),
            title: Some("Q3 Report".to_string()),
            sections: vec![
                Section {
                    heading: None,
                    body: "Intro text.".to_string(),
                },
                Section {
                    heading: Some("Revenue".to_string()),
                    body: "Up 4%.\n".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_export_markdown() {
        assert_eq!(
            doc().export(ExportFormat::Markdown),
            "# Q3 Report\n\nIntro text.\n\n## Revenue\n\nUp 4%.\n"
        );
    }

    #[test]
    fn test_export_plain_text() {
        assert_eq!(
            doc().export(ExportFormat::PlainText),
            "Q3 Report\n\nIntro text.\n\nRevenue\nUp 4%.\n"
        );
    }
}

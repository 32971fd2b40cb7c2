//! Collaborator abstractions for document conversion and indexing
//!
//! The orchestrator only sees the traits; `local` ships implementations that
//! run without external services.

pub mod converter;
pub mod indexer;
pub mod local;

pub use converter::{ConvertedDocument, DocumentConverter, ExportFormat, Section};
pub use indexer::{DocumentIndexer, IndexDocument, MarkdownSplitter, SearchHit};
pub use local::{MemoryIndexer, TextFileConverter};

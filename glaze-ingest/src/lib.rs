//! Product catalogue ingestion: parse uploaded catalogue JSON and cut each
//! product into the snippets that get embedded for retrieval.

pub mod catalog;
pub mod chunk;
pub mod snippets;

pub use catalog::{parse_catalog, CatalogEntry, Document, Faq, IngestError};
pub use chunk::chunk_text;
pub use snippets::{build_snippets, Snippet};
